//! Synchronous bridge to an asynchronous preprocessing worker.
//!
//! Lint rules and other synchronous hosts cannot await the preprocessing
//! pipeline, so the [`Bridge`] hands each request to a dedicated worker
//! thread that runs the pipeline on its own async runtime, then blocks the
//! calling thread until the worker signals completion or the wait strategy
//! gives up. On timeout or worker failure the last successful result is
//! returned instead of an error.
//!
//! # Example
//!
//! ```ignore
//! use preprocess_bridge::{Bridge, BridgeConfig};
//! use std::sync::Arc;
//!
//! let mut bridge = Bridge::new(Arc::new(my_preprocessor), BridgeConfig::default(), config);
//! let resolution = bridge.preprocess(source, "Counter.svelte")?;
//! if let Some(result) = resolution.into_result() {
//!     println!("{}", result.code);
//! }
//! ```

mod bridge;
mod channel;
mod codec;
mod preprocessor;
mod types;
mod wait;
mod worker;

pub use bridge::{Bridge, BridgeConfig, BridgeError, FallbackReason, Lifecycle, Resolution};
pub use channel::{CompletionSignal, Exchange, ReadError, DEFAULT_CAPACITY};
pub use codec::{decode, encode, strip, CodecError};
pub use preprocessor::{
    BlockCapture, BoxFuture, PreprocessError, Preprocessed, Processed, Preprocessor,
    ScriptCapture, SyntaxTree,
};
pub use types::{Request, SubResult, TransformResult};
pub use wait::{BlockingWait, PollPhase, PollingWait, WaitConfig, WaitOutcome, WaitStrategy};
