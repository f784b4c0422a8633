//! Transform step handlers and their inputs.

use indexmap::IndexMap;
use preprocess_bridge::{BoxFuture, PreprocessError};
use serde_json::Value;

/// A tag attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    /// Attribute present without a value (`<script context>`).
    Flag,
    /// Attribute with a value.
    Text(String),
}

/// Tag attributes in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes(IndexMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AttrValue) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<AttrValue> {
        self.0.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.0.get(name)
    }

    /// Returns the attribute's text value, if it has one.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(AttrValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether the attribute is present and not an empty string.
    pub fn is_truthy(&self, name: &str) -> bool {
        match self.0.get(name) {
            Some(AttrValue::Flag) => true,
            Some(AttrValue::Text(value)) => !value.is_empty(),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Renders the attributes as tag text, each preceded by a space.
    pub fn to_tag_text(&self) -> String {
        let mut text = String::new();
        for (name, value) in self.iter() {
            text.push(' ');
            text.push_str(name);
            if let AttrValue::Text(value) = value {
                text.push_str("=\"");
                text.push_str(value);
                text.push('"');
            }
        }
        text
    }
}

impl<K: Into<String>> FromIterator<(K, AttrValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, AttrValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// What a handler sees.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// The region's content: the whole markup, or a block's inner text.
    pub content: &'a str,
    /// The block's attributes. Empty for markup.
    pub attributes: &'a Attributes,
    /// The whole component source as it stands before this handler.
    pub markup: &'a str,
    pub filename: &'a str,
    /// Transform configuration from the request.
    pub config: &'a Value,
}

/// A handler's replacement for its region.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutput {
    pub code: String,
    pub dependencies: Vec<String>,
    /// Replacement attributes for the block's opening tag.
    pub attributes: Option<Attributes>,
}

impl StepOutput {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

/// `Ok(None)` leaves the region unchanged.
pub type StepResult = Result<Option<StepOutput>, PreprocessError>;

/// One preprocessor group. Every handler is optional.
pub trait TransformStep {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Handles the whole component source.
    fn markup<'a>(&'a self, _input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async { Ok(None) })
    }

    /// Handles each `<script>` block.
    fn script<'a>(&'a self, _input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async { Ok(None) })
    }

    /// Handles each `<style>` block.
    fn style<'a>(&'a self, _input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async { Ok(None) })
    }
}
