//! The synchronous entry point and its fallback policy.

use crate::channel::{Exchange, DEFAULT_CAPACITY};
use crate::codec::decode;
use crate::preprocessor::Preprocessor;
use crate::types::{Request, TransformResult};
use crate::wait::{WaitConfig, WaitOutcome, WaitStrategy};
use crate::worker::{Job, WorkerHandle};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the synchronous caller.
///
/// Only worker startup can fail; transformation problems are reported
/// through [`Resolution`] instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn preprocess worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker started but its preprocessor could not warm up.
    #[error("preprocess worker failed to start: {0}")]
    WarmUp(String),

    /// The worker did not report ready in time.
    #[error("preprocess worker did not become ready within {0:?}")]
    StartupTimeout(Duration),
}

/// When the worker is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Keep the worker alive for the lifetime of the bridge.
    #[default]
    Persistent,
    /// Terminate the worker after every response cycle and respawn lazily.
    ///
    /// Suits one-shot host processes that should exit promptly, at the cost
    /// of a worker startup per call.
    OneShot,
}

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How the caller waits for the worker.
    pub wait: WaitConfig,
    /// Worker teardown policy.
    pub lifecycle: Lifecycle,
    /// Size of the response region in bytes.
    pub capacity: usize,
    /// How long to wait for a new worker to report ready.
    pub startup_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig::default(),
            lifecycle: Lifecycle::default(),
            capacity: DEFAULT_CAPACITY,
            startup_timeout_ms: 30_000,
        }
    }
}

/// Why a call did not produce a fresh result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No completion was observed within the wait budget.
    TimedOut,
    /// The worker reported that preprocessing produced no result.
    WorkerFailed,
    /// The published payload could not be decoded.
    DecodeFailed,
    /// The worker stopped and could not take the request.
    WorkerGone,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::TimedOut => "timed out",
            FallbackReason::WorkerFailed => "preprocessing failed",
            FallbackReason::DecodeFailed => "malformed response",
            FallbackReason::WorkerGone => "worker unavailable",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a synchronous preprocess call.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The worker answered this request.
    Fresh(TransformResult),
    /// The worker did not answer; this is the last successful result.
    Stale {
        result: TransformResult,
        reason: FallbackReason,
    },
    /// The worker did not answer and nothing has succeeded yet.
    Empty(FallbackReason),
}

impl Resolution {
    /// The result to hand to the host, fresh or stale.
    pub fn into_result(self) -> Option<TransformResult> {
        match self {
            Resolution::Fresh(result) | Resolution::Stale { result, .. } => Some(result),
            Resolution::Empty(_) => None,
        }
    }

    pub fn result(&self) -> Option<&TransformResult> {
        match self {
            Resolution::Fresh(result) | Resolution::Stale { result, .. } => Some(result),
            Resolution::Empty(_) => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Resolution::Fresh(_))
    }

    /// Why the call fell back, if it did.
    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Resolution::Fresh(_) => None,
            Resolution::Stale { reason, .. } | Resolution::Empty(reason) => Some(*reason),
        }
    }
}

/// Synchronous front for an asynchronous [`Preprocessor`].
///
/// Owns the worker and the last-known-good result. Calls take `&mut self`,
/// so a bridge never has two requests in flight.
pub struct Bridge {
    preprocessor: Arc<dyn Preprocessor>,
    transform_config: Value,
    config: BridgeConfig,
    wait: Box<dyn WaitStrategy>,
    worker: Option<WorkerHandle>,
    last_known_good: Option<TransformResult>,
    next_seq: u64,
}

impl Bridge {
    /// Creates a bridge. The worker is spawned on the first call.
    pub fn new(
        preprocessor: Arc<dyn Preprocessor>,
        config: BridgeConfig,
        transform_config: Value,
    ) -> Self {
        let wait = config.wait.strategy();
        Self {
            preprocessor,
            transform_config,
            config,
            wait,
            worker: None,
            last_known_good: None,
            next_seq: 0,
        }
    }

    /// Replaces the wait strategy built from the configuration.
    pub fn with_wait_strategy(mut self, wait: Box<dyn WaitStrategy>) -> Self {
        self.wait = wait;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The most recent fresh result.
    pub fn last_known_good(&self) -> Option<&TransformResult> {
        self.last_known_good.as_ref()
    }

    /// Whether a worker is currently attached.
    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().is_some_and(WorkerHandle::is_alive)
    }

    /// Preprocesses `source`, blocking until the worker answers or the wait
    /// strategy gives up.
    ///
    /// Returns an error only when no worker can be started.
    pub fn preprocess(&mut self, source: &str, filename: &str) -> Result<Resolution, BridgeError> {
        self.next_seq += 1;
        let job = Job {
            seq: self.next_seq,
            request: Request::new(source, filename, self.transform_config.clone()),
        };
        let seq = job.seq;

        let resolution = match self.dispatch(job)? {
            Some(exchange) => match self.wait.wait(exchange.signal(), seq) {
                WaitOutcome::Resolved => self.collect(&exchange, seq),
                WaitOutcome::TimedOut => {
                    let reason = if self.has_worker() {
                        FallbackReason::TimedOut
                    } else {
                        FallbackReason::WorkerGone
                    };
                    self.fall_back(reason)
                }
            },
            None => self.fall_back(FallbackReason::WorkerGone),
        };

        if self.config.lifecycle == Lifecycle::OneShot {
            self.shutdown();
        }

        Ok(resolution)
    }

    /// Closes the worker's request channel. The next call spawns a new one.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
    }

    /// Resets the signal and queues the job, respawning a dead worker once.
    fn dispatch(&mut self, mut job: Job) -> Result<Option<Arc<Exchange>>, BridgeError> {
        for _ in 0..2 {
            let worker = self.ensure_worker()?;
            worker.exchange().signal().reset();
            match worker.send(job) {
                Ok(()) => return Ok(Some(Arc::clone(worker.exchange()))),
                Err(returned) => {
                    tracing::warn!(seq = returned.seq, "Preprocess worker stopped, respawning");
                    self.worker = None;
                    job = returned;
                }
            }
        }
        Ok(None)
    }

    fn ensure_worker(&mut self) -> Result<&WorkerHandle, BridgeError> {
        let worker = match self.worker.take() {
            Some(worker) if worker.is_alive() => worker,
            Some(_) => {
                tracing::debug!("Preprocess worker exited, spawning a new one");
                self.spawn_worker()?
            }
            None => self.spawn_worker()?,
        };
        Ok(self.worker.insert(worker))
    }

    fn spawn_worker(&self) -> Result<WorkerHandle, BridgeError> {
        WorkerHandle::spawn(
            Arc::clone(&self.preprocessor),
            self.config.capacity,
            Duration::from_millis(self.config.startup_timeout_ms),
        )
    }

    fn collect(&mut self, exchange: &Exchange, seq: u64) -> Resolution {
        exchange.signal().consume(seq);

        let bytes = match exchange.read(seq) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(seq, error = ?e, "Response region holds another job");
                return self.fall_back(FallbackReason::DecodeFailed);
            }
        };

        match decode(&bytes) {
            Ok(Some(result)) => {
                self.last_known_good = Some(result.clone());
                Resolution::Fresh(result)
            }
            Ok(None) => self.fall_back(FallbackReason::WorkerFailed),
            Err(e) => {
                tracing::warn!(seq, error = %e, "Discarding undecodable response");
                self.fall_back(FallbackReason::DecodeFailed)
            }
        }
    }

    fn fall_back(&self, reason: FallbackReason) -> Resolution {
        match &self.last_known_good {
            Some(result) => {
                tracing::debug!(%reason, "Returning last known good result");
                Resolution::Stale {
                    result: result.clone(),
                    reason,
                }
            }
            None => {
                tracing::debug!(%reason, "No result available");
                Resolution::Empty(reason)
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("has_worker", &self.worker.is_some())
            .field("has_last_known_good", &self.last_known_good.is_some())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}
