//! Encoding of results for the trip across the worker boundary.
//!
//! Results travel as JSON bytes. An empty payload is the explicit
//! "no result" sentinel the worker publishes when preprocessing failed.

use crate::preprocessor::{Processed, ScriptCapture, SyntaxTree};
use crate::types::{SubResult, TransformResult};
use thiserror::Error;

/// Encoding and decoding failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The result could not be serialized.
    #[error("failed to encode preprocess result: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload is not a complete result.
    #[error("malformed preprocess payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Drops everything that only exists inside the worker.
///
/// Live syntax trees are discarded; serialized trees are kept.
pub fn strip(processed: Processed) -> TransformResult {
    TransformResult {
        code: processed.code,
        dependencies: processed.dependencies,
        module: processed.module.map(strip_script),
        instance: processed.instance.map(strip_script),
        markup: processed.markup,
        style: processed.style,
    }
}

fn strip_script(capture: ScriptCapture) -> SubResult {
    let mut block = capture.block;
    block.parsed_syntax_tree = match capture.syntax {
        Some(SyntaxTree::Json(value)) => Some(value),
        Some(SyntaxTree::Live(_)) => {
            tracing::trace!("Dropping worker-local syntax tree");
            None
        }
        None => None,
    };
    block
}

/// Encodes a result, or the empty sentinel for `None`.
pub fn encode(result: Option<&TransformResult>) -> Result<Vec<u8>, CodecError> {
    match result {
        Some(result) => serde_json::to_vec(result).map_err(CodecError::Encode),
        None => Ok(Vec::new()),
    }
}

/// Decodes a payload. The empty sentinel decodes to `Ok(None)`.
pub fn decode(bytes: &[u8]) -> Result<Option<TransformResult>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(CodecError::Malformed)
}
