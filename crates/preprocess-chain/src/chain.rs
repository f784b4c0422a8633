//! The native chain as a bridge [`Preprocessor`].

use crate::capture::bracket;
use crate::pipeline::run_chain;
use crate::replace::ReplaceStep;
use crate::step::TransformStep;
use preprocess_bridge::{BoxFuture, PreprocessError, Preprocessor, Processed, Request};
use std::sync::Arc;

type SharedStep = Arc<dyn TransformStep + Send + Sync>;

/// Runs user steps between the two capture steps.
#[derive(Clone, Default)]
pub struct ChainPreprocessor {
    steps: Vec<SharedStep>,
}

impl ChainPreprocessor {
    /// Creates an empty chain; only the capture steps run.
    pub fn new() -> Self {
        Self::default()
    }

    /// The chain used when no steps are configured explicitly.
    pub fn standard() -> Self {
        Self::new().with_step(ReplaceStep)
    }

    /// Appends a step.
    pub fn with_step(mut self, step: impl TransformStep + Send + Sync + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }
}

impl Preprocessor for ChainPreprocessor {
    fn preprocess<'a>(
        &'a self,
        request: &'a Request,
    ) -> BoxFuture<'a, Result<Processed, PreprocessError>> {
        Box::pin(async move {
            let (before, after, captures) = bracket();

            let mut chain: Vec<&dyn TransformStep> = Vec::with_capacity(self.steps.len() + 2);
            chain.push(&before);
            chain.extend(self.steps.iter().map(|step| step.as_ref() as &dyn TransformStep));
            chain.push(&after);

            let raw = run_chain(&request.source, &chain, &request.filename, &request.config).await?;
            let captures = captures.take();
            Ok(captures.into_processed(raw))
        })
    }
}

impl std::fmt::Debug for ChainPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainPreprocessor")
            .field("steps", &self.step_names())
            .finish()
    }
}
