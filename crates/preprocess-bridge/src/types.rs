//! Request and result types that cross the worker boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A preprocessing request handed to the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The component source text.
    pub source: String,
    /// The file the source came from.
    pub filename: String,
    /// Opaque transform configuration forwarded to the pipeline.
    pub config: Value,
}

impl Request {
    /// Creates a request, substituting `"unknown"` for an empty filename.
    pub fn new(source: impl Into<String>, filename: impl Into<String>, config: Value) -> Self {
        let filename = filename.into();
        Self {
            source: source.into(),
            filename: if filename.is_empty() {
                "unknown".to_string()
            } else {
                filename
            },
            config,
        }
    }
}

/// The transferable preprocessing result returned to the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformResult {
    /// The fully preprocessed component source.
    pub code: String,
    /// Files the pipeline read while preprocessing.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The `<script context="module">` block, when it is TypeScript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<SubResult>,
    /// The instance `<script>` block, when it is TypeScript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<SubResult>,
    /// The whole markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<SubResult>,
    /// The `<style>` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<SubResult>,
}

/// Before/after snapshot of one region of the component.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubResult {
    /// Content before the preprocessor chain ran.
    pub original_text: String,
    /// Content after the preprocessor chain ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    /// `len(original_text) - len(result_text)`, in UTF-16 code units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_delta: Option<i64>,
    /// Script language extension (`ts`), scripts only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    /// Serialized syntax tree of the original script, when the pipeline
    /// produced one in a transferable form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_syntax_tree: Option<Value>,
}

impl SubResult {
    /// Creates a snapshot holding only the original text.
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            original_text: text.into(),
            ..Self::default()
        }
    }

    /// Records the post-chain text and the resulting size delta.
    pub fn finish(&mut self, result: impl Into<String>) {
        let result = result.into();
        self.size_delta = Some(size_delta(&self.original_text, &result));
        self.result_text = Some(result);
    }
}

/// Length difference between two strings, measured in UTF-16 code units.
pub fn size_delta(original: &str, result: &str) -> i64 {
    original.encode_utf16().count() as i64 - result.encode_utf16().count() as i64
}
