//! Response half of the transfer channel: a fixed-capacity payload region
//! plus the completion signal the caller blocks on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default payload capacity (8 MiB).
pub const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

/// Completion flag shared between the caller and the worker.
///
/// Holds `0` when reset, otherwise the sequence number of the job whose
/// response has been published. The worker is the only writer of non-zero
/// values; the caller is the only one that resets it.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    value: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CompletionSignal {
    /// Creates a reset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the signal before a new request is sent.
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }

    /// Marks `seq` as completed and wakes any waiter.
    pub fn signal(&self, seq: u64) {
        self.value.store(seq, Ordering::Release);
        // Taking the lock orders this notify after a waiter's check.
        let _guard = self.guard();
        self.cond.notify_all();
    }

    /// Returns whether `seq` has completed, without consuming it.
    pub fn is_set(&self, seq: u64) -> bool {
        self.value.load(Ordering::Acquire) == seq
    }

    /// Consumes the completion of `seq`. Returns `false` if it was not set.
    pub fn consume(&self, seq: u64) -> bool {
        self.value
            .compare_exchange(seq, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Blocks until `seq` completes or `timeout` elapses.
    pub fn wait_timeout(&self, seq: u64, timeout: Duration) -> bool {
        let guard = self.guard();
        let (_guard, result) = self
            .cond
            .wait_timeout_while(guard, timeout, |_| !self.is_set(seq))
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out() || self.is_set(seq)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct Region {
    bytes: Box<[u8]>,
    len: usize,
    seq: u64,
}

/// Why a published payload could not be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The region holds the response to a different job.
    SequenceMismatch { expected: u64, found: u64 },
}

/// The shared response region for one worker.
#[derive(Debug)]
pub struct Exchange {
    signal: CompletionSignal,
    region: Mutex<Region>,
}

impl Exchange {
    /// Creates an exchange whose payload region holds `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            signal: CompletionSignal::new(),
            region: Mutex::new(Region {
                bytes: vec![0; capacity].into_boxed_slice(),
                len: 0,
                seq: 0,
            }),
        }
    }

    /// The completion signal for this exchange.
    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// Size of the payload region in bytes.
    pub fn capacity(&self) -> usize {
        self.lock_region().bytes.len()
    }

    /// Writes the response for `seq` and then raises the signal.
    ///
    /// A payload that does not fit is replaced by the empty sentinel.
    /// Returns `false` in that case.
    pub fn publish(&self, seq: u64, payload: &[u8]) -> bool {
        let fits = {
            let mut region = self.lock_region();
            let fits = payload.len() <= region.bytes.len();
            if fits {
                region.bytes[..payload.len()].copy_from_slice(payload);
                region.len = payload.len();
            } else {
                tracing::error!(
                    seq,
                    size = payload.len(),
                    capacity = region.bytes.len(),
                    "Preprocess result exceeds exchange capacity, publishing empty result"
                );
                region.len = 0;
            }
            region.seq = seq;
            fits
        };
        self.signal.signal(seq);
        fits
    }

    /// Copies out exactly the recorded payload for `seq`.
    pub fn read(&self, seq: u64) -> Result<Vec<u8>, ReadError> {
        let region = self.lock_region();
        if region.seq != seq {
            return Err(ReadError::SequenceMismatch {
                expected: seq,
                found: region.seq,
            });
        }
        Ok(region.bytes[..region.len].to_vec())
    }

    fn lock_region(&self) -> MutexGuard<'_, Region> {
        self.region.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
