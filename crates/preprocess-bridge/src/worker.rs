//! The worker thread and its handle.

use crate::bridge::BridgeError;
use crate::channel::Exchange;
use crate::codec::{encode, strip};
use crate::preprocessor::Preprocessor;
use crate::types::Request;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, LocalSet};

const WORKER_THREAD_NAME: &str = "preprocess-worker";

/// A request tagged with its sequence number.
#[derive(Debug)]
pub(crate) struct Job {
    pub seq: u64,
    pub request: Request,
}

/// Handle to a running worker thread.
pub(crate) struct WorkerHandle {
    requests: mpsc::UnboundedSender<Job>,
    exchange: Arc<Exchange>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns a worker and waits until its preprocessor has warmed up.
    pub fn spawn(
        preprocessor: Arc<dyn Preprocessor>,
        capacity: usize,
        startup_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let exchange = Arc::new(Exchange::new(capacity));
        let worker_exchange = Arc::clone(&exchange);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(preprocessor, worker_exchange, rx, ready_tx))
            .map_err(BridgeError::Spawn)?;

        match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(BridgeError::WarmUp(message)),
            Err(RecvTimeoutError::Timeout) => {
                return Err(BridgeError::StartupTimeout(startup_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BridgeError::WarmUp(
                    "worker exited during startup".to_string(),
                ))
            }
        }

        tracing::debug!(capacity, "Spawned preprocess worker");

        Ok(Self {
            requests: tx,
            exchange,
            thread,
        })
    }

    /// Queues a job. Hands the job back if the worker is no longer receiving.
    pub fn send(&self, job: Job) -> Result<(), Job> {
        self.requests.send(job).map_err(|err| err.0)
    }

    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Whether the worker thread is still running and accepting jobs.
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished() && !self.requests.is_closed()
    }

    /// Closes the request channel. The thread finishes its current job,
    /// if any, and exits on its own.
    pub fn terminate(self) {
        tracing::debug!("Terminating preprocess worker");
        drop(self.requests);
    }
}

fn run(
    preprocessor: Arc<dyn Preprocessor>,
    exchange: Arc<Exchange>,
    mut requests: mpsc::UnboundedReceiver<Job>,
    ready: SyncSender<Result<(), String>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(format!("failed to build worker runtime: {e}")));
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        if let Err(e) = preprocessor.warm_up().await {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
        let _ = ready.send(Ok(()));

        while let Some(job) = requests.recv().await {
            let job = newest(job, &mut requests);
            let seq = job.seq;
            tracing::debug!(seq, filename = %job.request.filename, "Worker received request");
            let payload = process(Arc::clone(&preprocessor), job).await;
            exchange.publish(seq, &payload);
            tracing::debug!(seq, "Worker published response");
        }

        tracing::debug!("Preprocess worker shutting down");
    });
}

/// Skips to the most recently queued job. Callers of the older ones have
/// already given up waiting.
fn newest(mut job: Job, requests: &mut mpsc::UnboundedReceiver<Job>) -> Job {
    while let Ok(newer) = requests.try_recv() {
        tracing::debug!(skipped = job.seq, seq = newer.seq, "Skipping superseded request");
        job = newer;
    }
    job
}

/// Runs one job to an encoded payload. Failures and panics become the empty
/// sentinel.
async fn process(preprocessor: Arc<dyn Preprocessor>, job: Job) -> Vec<u8> {
    let Job { seq, request } = job;
    let filename = request.filename.clone();

    let task = task::spawn_local(async move {
        preprocessor.preprocess(&request).await.map(strip)
    });

    let result = match task.await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(e)) => {
            tracing::warn!(seq, filename = %filename, error = %e, "Preprocessing failed");
            None
        }
        Err(e) if e.is_panic() => {
            tracing::error!(seq, filename = %filename, "Preprocessor panicked");
            None
        }
        Err(e) => {
            tracing::warn!(seq, filename = %filename, error = %e, "Preprocessing task aborted");
            None
        }
    };

    encode(result.as_ref()).unwrap_or_else(|e| {
        tracing::warn!(seq, error = %e, "Dropping unencodable result");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::preprocessor::{BoxFuture, PreprocessError, Processed};
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    struct Panicking;

    impl Preprocessor for Panicking {
        fn preprocess<'a>(
            &'a self,
            _request: &'a Request,
        ) -> BoxFuture<'a, Result<Processed, PreprocessError>> {
            Box::pin(async move { explode() })
        }
    }

    fn explode() -> Result<Processed, PreprocessError> {
        panic!("preprocessor bug")
    }

    fn job(seq: u64) -> Job {
        Job {
            seq,
            request: Request::new("<p/>", format!("{seq}.svelte"), Value::Null),
        }
    }

    #[test]
    fn test_newest_skips_superseded_jobs() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for seq in 2..=4 {
            tx.send(job(seq)).unwrap();
        }

        let picked = newest(job(1), &mut rx);

        assert_eq!(picked.seq, 4);
        assert_eq!(picked.request.filename, "4.svelte");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_newest_keeps_only_job() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(newest(job(7), &mut rx).seq, 7);
    }

    #[test]
    fn test_panic_becomes_empty_sentinel() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = LocalSet::new();

        let payload = local.block_on(&runtime, process(Arc::new(Panicking), job(1)));

        assert_eq!(decode(&payload).unwrap(), None);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let handle =
            WorkerHandle::spawn(Arc::new(Panicking), 1024, Duration::from_secs(5)).unwrap();

        handle.send(job(1)).unwrap();
        assert!(handle
            .exchange()
            .signal()
            .wait_timeout(1, Duration::from_secs(5)));

        assert_eq!(decode(&handle.exchange().read(1).unwrap()).unwrap(), None);
        assert!(handle.is_alive());
    }
}
