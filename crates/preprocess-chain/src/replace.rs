//! Literal text replacements driven by the transform configuration.

use crate::step::{StepInput, StepOutput, StepResult, TransformStep};
use preprocess_bridge::{BoxFuture, PreprocessError};
use serde_json::Value;

/// Applies `config.replace`, a list of `[from, to]` pairs, to the markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceStep;

impl ReplaceStep {
    fn pairs(config: &Value) -> Result<Vec<(&str, &str)>, PreprocessError> {
        let Some(replace) = config.get("replace") else {
            return Ok(Vec::new());
        };
        let invalid = || PreprocessError::Step("`replace` must be a list of [from, to] pairs".into());

        replace
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([Value::String(from), Value::String(to)]) => Ok((from.as_str(), to.as_str())),
                _ => Err(invalid()),
            })
            .collect()
    }
}

impl TransformStep for ReplaceStep {
    fn name(&self) -> &str {
        "replace"
    }

    fn markup<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let pairs = Self::pairs(input.config)?;
            if pairs.is_empty() {
                return Ok(None);
            }

            let mut code = input.content.to_string();
            for (from, to) in pairs {
                if !from.is_empty() {
                    code = code.replace(from, to);
                }
            }
            Ok(Some(StepOutput::code(code)))
        })
    }
}
