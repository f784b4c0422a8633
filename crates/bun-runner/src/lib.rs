//! bun-backed Svelte preprocessor.
//!
//! Runs `svelte/compiler`'s `preprocess` with `svelte-preprocess` inside a
//! long-lived bun process and speaks line-delimited JSON with it.

mod runner;

pub use runner::{BunError, BunPreprocessor};
