//! Steps that bracket a chain and record each region before and after it.

use crate::step::{Attributes, StepInput, StepResult, TransformStep};
use preprocess_bridge::{
    BlockCapture, BoxFuture, PreprocessError, Preprocessed, Processed, ScriptCapture, SyntaxTree,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use swc_common::SourceMap;
use swc_ecma_parser::{parse_file_as_module, Syntax, TsSyntax};

/// Regions recorded while a chain runs.
#[derive(Debug, Default)]
pub struct Captures {
    pub markup: Option<BlockCapture>,
    pub module: Option<ScriptCapture>,
    pub instance: Option<ScriptCapture>,
    pub style: Option<BlockCapture>,
}

impl Captures {
    /// Combines the captures with the chain's raw output.
    pub fn into_processed(self, raw: Preprocessed) -> Processed {
        Processed {
            code: raw.code,
            dependencies: raw.dependencies,
            module: self.module,
            instance: self.instance,
            markup: self.markup,
            style: self.style,
        }
    }

    fn script_slot(&mut self, attributes: &Attributes) -> &mut Option<ScriptCapture> {
        if attributes.is_truthy("context") {
            &mut self.module
        } else {
            &mut self.instance
        }
    }
}

/// Creates the pair of steps to place first and last in a chain, plus the
/// shared captures they fill in.
pub fn bracket() -> (CaptureOriginal, CaptureResult, Rc<RefCell<Captures>>) {
    let captures = Rc::new(RefCell::new(Captures::default()));
    (
        CaptureOriginal {
            captures: Rc::clone(&captures),
        },
        CaptureResult {
            captures: Rc::clone(&captures),
        },
        captures,
    )
}

/// Records original content. Only TypeScript scripts are captured.
pub struct CaptureOriginal {
    captures: Rc<RefCell<Captures>>,
}

/// Records final content and size deltas for whatever was captured.
pub struct CaptureResult {
    captures: Rc<RefCell<Captures>>,
}

fn is_typescript(attributes: &Attributes) -> bool {
    matches!(attributes.text("lang"), Some("ts" | "typescript"))
        || attributes.text("type") == Some("text/typescript")
}

/// Parses a TypeScript script into a tree that stays in the worker.
fn parse_typescript(content: &str, filename: &str) -> Result<SyntaxTree, PreprocessError> {
    let cm: Arc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        swc_common::FileName::Custom(filename.to_string()).into(),
        content.to_string(),
    );

    let syntax_error = |e: swc_ecma_parser::error::Error| PreprocessError::Syntax {
        filename: filename.to_string(),
        message: format!("{:?}", e.kind()),
    };

    let mut recovered = Vec::new();
    let module = parse_file_as_module(
        &fm,
        Syntax::Typescript(TsSyntax::default()),
        swc_ecma_ast::EsVersion::Es2022,
        None,
        &mut recovered,
    )
    .map_err(syntax_error)?;

    // Recoverable errors still mean the script does not parse.
    if let Some(e) = recovered.into_iter().next() {
        return Err(syntax_error(e));
    }

    Ok(SyntaxTree::Live(Box::new(module)))
}

impl TransformStep for CaptureOriginal {
    fn name(&self) -> &str {
        "capture-original"
    }

    fn markup<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            self.captures.borrow_mut().markup = Some(BlockCapture::original(input.content));
            Ok(None)
        })
    }

    fn script<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if !is_typescript(input.attributes) {
                return Ok(None);
            }

            let tree = parse_typescript(input.content, input.filename)?;
            let capture = ScriptCapture::new(input.content, "ts", Some(tree));
            *self.captures.borrow_mut().script_slot(input.attributes) = Some(capture);
            Ok(None)
        })
    }

    fn style<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            self.captures.borrow_mut().style = Some(BlockCapture::original(input.content));
            Ok(None)
        })
    }
}

impl TransformStep for CaptureResult {
    fn name(&self) -> &str {
        "capture-result"
    }

    fn markup<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if let Some(markup) = self.captures.borrow_mut().markup.as_mut() {
                markup.finish(input.content);
            }
            Ok(None)
        })
    }

    fn script<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let mut captures = self.captures.borrow_mut();
            if let Some(script) = captures.script_slot(input.attributes).as_mut() {
                script.block.finish(input.content);
            }
            Ok(None)
        })
    }

    fn style<'a>(&'a self, input: StepInput<'a>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if let Some(style) = self.captures.borrow_mut().style.as_mut() {
                style.finish(input.content);
            }
            Ok(None)
        })
    }
}
