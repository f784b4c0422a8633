//! How the synchronous caller waits for the worker.

use crate::channel::CompletionSignal;
use serde::Deserialize;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The completion signal for the job was observed.
    Resolved,
    /// Every wait window elapsed without a completion.
    TimedOut,
}

/// Blocks the calling thread until a job completes or a deadline passes.
///
/// Implementations never yield control to the caller's host until they
/// return.
pub trait WaitStrategy: Send + Sync {
    /// Waits for the completion of job `seq`.
    fn wait(&self, signal: &CompletionSignal, seq: u64) -> WaitOutcome;
}

/// Suspends on the completion signal with a single bounded timeout.
#[derive(Debug, Clone, Copy)]
pub struct BlockingWait {
    pub timeout: Duration,
}

impl Default for BlockingWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
        }
    }
}

impl WaitStrategy for BlockingWait {
    fn wait(&self, signal: &CompletionSignal, seq: u64) -> WaitOutcome {
        if signal.wait_timeout(seq, self.timeout) {
            WaitOutcome::Resolved
        } else {
            tracing::debug!(seq, timeout = ?self.timeout, "Blocking wait timed out");
            WaitOutcome::TimedOut
        }
    }
}

/// One polling window: check every `interval` for at most `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPhase {
    pub interval: Duration,
    pub total: Duration,
}

impl PollPhase {
    /// Creates a phase from millisecond values.
    pub const fn from_millis(interval: u64, total: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval),
            total: Duration::from_millis(total),
        }
    }

    /// Number of checks this phase performs.
    pub fn attempts(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let attempts = (self.total.as_nanos() / self.interval.as_nanos()).max(1);
        u32::try_from(attempts).unwrap_or(u32::MAX)
    }
}

/// Where a polling wait currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitState {
    Sent,
    WaitingFast { attempt: u32 },
    WaitingSlow { attempt: u32 },
    Resolved,
    TimedOut,
}

/// Two-tier polling: a fast window for quick answers, then a slower one.
///
/// Portable fallback for hosts where parking the thread on the signal is
/// not wanted; each check is a discrete poll followed by a sleep.
#[derive(Debug, Clone, Copy)]
pub struct PollingWait {
    pub fast: PollPhase,
    pub slow: PollPhase,
}

impl Default for PollingWait {
    fn default() -> Self {
        Self {
            fast: PollPhase::from_millis(10, 2000),
            slow: PollPhase::from_millis(100, 2000),
        }
    }
}

impl PollingWait {
    fn next(&self, state: WaitState, signal: &CompletionSignal, seq: u64) -> WaitState {
        match state {
            WaitState::Sent => WaitState::WaitingFast { attempt: 0 },
            WaitState::WaitingFast { attempt } => {
                if signal.is_set(seq) {
                    return WaitState::Resolved;
                }
                if attempt >= self.fast.attempts() {
                    tracing::debug!(seq, "No response in fast window, slowing down");
                    return WaitState::WaitingSlow { attempt: 0 };
                }
                tracing::trace!(seq, attempt, "Polling for response (fast)");
                thread::sleep(self.fast.interval);
                WaitState::WaitingFast {
                    attempt: attempt + 1,
                }
            }
            WaitState::WaitingSlow { attempt } => {
                if signal.is_set(seq) {
                    return WaitState::Resolved;
                }
                if attempt >= self.slow.attempts() {
                    return WaitState::TimedOut;
                }
                tracing::trace!(seq, attempt, "Polling for response (slow)");
                thread::sleep(self.slow.interval);
                WaitState::WaitingSlow {
                    attempt: attempt + 1,
                }
            }
            terminal => terminal,
        }
    }
}

impl WaitStrategy for PollingWait {
    fn wait(&self, signal: &CompletionSignal, seq: u64) -> WaitOutcome {
        let start = Instant::now();
        let mut state = WaitState::Sent;
        loop {
            state = self.next(state, signal, seq);
            match state {
                WaitState::Resolved => return WaitOutcome::Resolved,
                WaitState::TimedOut => {
                    tracing::debug!(seq, elapsed = ?start.elapsed(), "Polling wait timed out");
                    return WaitOutcome::TimedOut;
                }
                _ => {}
            }
        }
    }
}

/// Serializable choice of wait strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WaitConfig {
    /// Park on the signal for up to `timeout_ms`.
    Blocking {
        #[serde(default = "default_blocking_timeout_ms")]
        timeout_ms: u64,
    },
    /// Poll in a fast window, then a slow one.
    Polling {
        #[serde(default = "default_fast_interval_ms")]
        fast_interval_ms: u64,
        #[serde(default = "default_fast_total_ms")]
        fast_total_ms: u64,
        #[serde(default = "default_slow_interval_ms")]
        slow_interval_ms: u64,
        #[serde(default = "default_slow_total_ms")]
        slow_total_ms: u64,
    },
}

fn default_blocking_timeout_ms() -> u64 {
    5000
}

fn default_fast_interval_ms() -> u64 {
    10
}

fn default_fast_total_ms() -> u64 {
    2000
}

fn default_slow_interval_ms() -> u64 {
    100
}

fn default_slow_total_ms() -> u64 {
    2000
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::blocking(Duration::from_millis(default_blocking_timeout_ms()))
    }
}

impl WaitConfig {
    /// Blocking wait with the given timeout.
    pub fn blocking(timeout: Duration) -> Self {
        Self::Blocking {
            timeout_ms: saturating_millis(timeout),
        }
    }

    /// Polling wait with the default fast and slow windows.
    pub fn polling() -> Self {
        Self::Polling {
            fast_interval_ms: default_fast_interval_ms(),
            fast_total_ms: default_fast_total_ms(),
            slow_interval_ms: default_slow_interval_ms(),
            slow_total_ms: default_slow_total_ms(),
        }
    }

    /// Polling wait whose two windows add up to `total`, keeping the default
    /// intervals.
    pub fn polling_within(total: Duration) -> Self {
        let half = saturating_millis(total / 2);
        Self::Polling {
            fast_interval_ms: default_fast_interval_ms(),
            fast_total_ms: half,
            slow_interval_ms: default_slow_interval_ms(),
            slow_total_ms: half,
        }
    }

    /// Upper bound on how long a single call may wait.
    pub fn budget(&self) -> Duration {
        match *self {
            WaitConfig::Blocking { timeout_ms } => Duration::from_millis(timeout_ms),
            WaitConfig::Polling {
                fast_total_ms,
                slow_total_ms,
                ..
            } => Duration::from_millis(fast_total_ms.saturating_add(slow_total_ms)),
        }
    }

    /// Builds the strategy this configuration describes.
    pub fn strategy(&self) -> Box<dyn WaitStrategy> {
        match *self {
            WaitConfig::Blocking { timeout_ms } => Box::new(BlockingWait {
                timeout: Duration::from_millis(timeout_ms),
            }),
            WaitConfig::Polling {
                fast_interval_ms,
                fast_total_ms,
                slow_interval_ms,
                slow_total_ms,
            } => Box::new(PollingWait {
                fast: PollPhase::from_millis(fast_interval_ms, fast_total_ms),
                slow: PollPhase::from_millis(slow_interval_ms, slow_total_ms),
            }),
        }
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
