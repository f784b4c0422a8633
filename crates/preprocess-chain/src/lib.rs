//! Native Svelte preprocessor chain.
//!
//! Mirrors how the Svelte compiler applies preprocessor groups: every step
//! sees the whole markup first, then each `<script>` block, then each
//! `<style>` block. [`ChainPreprocessor`] wraps a list of steps with two
//! capture steps that record every region before and after the chain, and
//! plugs the whole thing into the synchronous bridge.

mod blocks;
mod capture;
mod chain;
mod pipeline;
mod replace;
mod step;

pub use blocks::{find_blocks, Block, BlockKind};
pub use capture::{bracket, CaptureOriginal, CaptureResult, Captures};
pub use chain::ChainPreprocessor;
pub use pipeline::run_chain;
pub use replace::ReplaceStep;
pub use step::{AttrValue, Attributes, StepInput, StepOutput, StepResult, TransformStep};
