//! Runs a chain of transform steps over a component.

use crate::blocks::{find_blocks, BlockKind};
use crate::step::{Attributes, StepInput, TransformStep};
use preprocess_bridge::{PreprocessError, Preprocessed};
use serde_json::Value;

/// Applies `steps` in order.
///
/// For each step the markup handler runs on the whole source, then the
/// script handler on every `<script>` block, then the style handler on
/// every `<style>` block. A block is rewritten as
/// `<tag{attributes}>{code}</tag>` only when its handler changed the code
/// or the attributes.
pub async fn run_chain(
    source: &str,
    steps: &[&dyn TransformStep],
    filename: &str,
    config: &Value,
) -> Result<Preprocessed, PreprocessError> {
    let mut code = source.to_string();
    let mut dependencies = Vec::new();
    let no_attributes = Attributes::new();

    for step in steps {
        tracing::trace!(step = step.name(), filename, "Running transform step");

        let processed = step
            .markup(StepInput {
                content: &code,
                attributes: &no_attributes,
                markup: &code,
                filename,
                config,
            })
            .await?;
        if let Some(output) = processed {
            dependencies.extend(output.dependencies);
            code = output.code;
        }

        code = process_blocks(&code, BlockKind::Script, *step, filename, config, &mut dependencies)
            .await?;
        code = process_blocks(&code, BlockKind::Style, *step, filename, config, &mut dependencies)
            .await?;
    }

    Ok(Preprocessed { code, dependencies })
}

async fn process_blocks(
    source: &str,
    kind: BlockKind,
    step: &dyn TransformStep,
    filename: &str,
    config: &Value,
    dependencies: &mut Vec<String>,
) -> Result<String, PreprocessError> {
    let blocks = find_blocks(source, kind);
    if blocks.is_empty() {
        return Ok(source.to_string());
    }

    let tag = kind.tag();
    let mut output = String::with_capacity(source.len());
    let mut last = 0;

    for block in blocks {
        output.push_str(&source[last..block.range.start]);
        last = block.range.end;

        let element = &source[block.range.clone()];
        let content = &source[block.content.clone()];
        let attributes_text = &source[block.attributes_text.clone()];

        // Bare empty tags are left alone.
        if attributes_text.is_empty() && content.is_empty() {
            output.push_str(element);
            continue;
        }

        let input = StepInput {
            content,
            attributes: &block.attributes,
            markup: source,
            filename,
            config,
        };
        let processed = match kind {
            BlockKind::Script => step.script(input).await?,
            BlockKind::Style => step.style(input).await?,
        };

        let Some(processed) = processed else {
            output.push_str(element);
            continue;
        };
        dependencies.extend(processed.dependencies);

        let attributes = match &processed.attributes {
            Some(attributes) => attributes.to_tag_text(),
            None => attributes_text.to_string(),
        };
        if processed.attributes.is_none() && processed.code == content {
            output.push_str(element);
        } else {
            output.push('<');
            output.push_str(tag);
            output.push_str(&attributes);
            output.push('>');
            output.push_str(&processed.code);
            output.push_str("</");
            output.push_str(tag);
            output.push('>');
        }
    }

    output.push_str(&source[last..]);
    Ok(output)
}
