//! The asynchronous preprocessing seam run inside the worker.

use crate::types::{Request, SubResult};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A boxed future driven by the worker's single-threaded runtime.
///
/// Not `Send`: preprocessing futures never leave the worker thread.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Errors raised while preprocessing inside the worker.
///
/// These never reach the synchronous caller; the worker reports them as
/// an empty result.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// A transform step failed.
    #[error("transform step failed: {0}")]
    Step(String),

    /// A script block could not be parsed.
    #[error("syntax error in {filename}: {message}")]
    Syntax { filename: String, message: String },

    /// The preprocessing backend is unavailable or crashed.
    #[error("preprocessing backend failed: {0}")]
    Backend(String),

    /// The backend answered with something unexpected.
    #[error("preprocessing protocol error: {0}")]
    Protocol(String),
}

/// An asynchronous preprocessing pipeline.
///
/// Implementations are shared with the worker thread, so they must be
/// `Send + Sync`; the futures they return are not.
pub trait Preprocessor: Send + Sync {
    /// Prepares the backend. Runs once per worker before it reports ready;
    /// an error here fails the worker spawn.
    fn warm_up(&self) -> BoxFuture<'_, Result<(), PreprocessError>> {
        Box::pin(async { Ok(()) })
    }

    /// Preprocesses one component.
    fn preprocess<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Processed, PreprocessError>>;
}

/// Raw pipeline output: the rewritten source and the files it depended on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Preprocessed {
    pub code: String,
    pub dependencies: Vec<String>,
}

/// A parsed script, either already serialized or held as a live handle.
pub enum SyntaxTree {
    /// A tree in serialized form; crosses the worker boundary as-is.
    Json(Value),
    /// A parser-owned tree that only makes sense inside the worker.
    Live(Box<dyn Any>),
}

impl fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxTree::Json(value) => f.debug_tuple("Json").field(value).finish(),
            SyntaxTree::Live(_) => f.write_str("Live(..)"),
        }
    }
}

/// A captured script block together with its syntax tree.
#[derive(Debug, Default)]
pub struct ScriptCapture {
    pub block: SubResult,
    pub syntax: Option<SyntaxTree>,
}

impl ScriptCapture {
    /// Captures a script's original content with the given extension.
    pub fn new(original: impl Into<String>, ext: &str, syntax: Option<SyntaxTree>) -> Self {
        let mut block = SubResult::original(original);
        block.ext = Some(ext.to_string());
        Self { block, syntax }
    }
}

/// The worker-side result, before non-transferable parts are stripped.
#[derive(Debug, Default)]
pub struct Processed {
    pub code: String,
    pub dependencies: Vec<String>,
    pub module: Option<ScriptCapture>,
    pub instance: Option<ScriptCapture>,
    pub markup: Option<SubResult>,
    pub style: Option<SubResult>,
}

impl From<Preprocessed> for Processed {
    fn from(raw: Preprocessed) -> Self {
        Self {
            code: raw.code,
            dependencies: raw.dependencies,
            ..Self::default()
        }
    }
}

/// Capture of the markup or a style block, before and after transformation.
pub type BlockCapture = SubResult;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_tree_debug_is_opaque() {
        let tree = SyntaxTree::Live(Box::new(42_u32));
        assert_eq!(format!("{tree:?}"), "Live(..)");
    }

    #[test]
    fn test_script_capture_sets_ext() {
        let capture = ScriptCapture::new("let x = 1", "ts", None);
        assert_eq!(capture.block.original_text, "let x = 1");
        assert_eq!(capture.block.ext.as_deref(), Some("ts"));
        assert!(capture.block.result_text.is_none());
    }
}
