//! Per-instance circuit breaker for the sideband path.
//!
//! Two states only: CLOSED (calls pass) and OPEN (calls are rejected without
//! touching the network). There is no half-open probing; the breaker closes
//! lazily on the first call after `opened_at + retry_after` has elapsed.
//!
//! The breaker is the only cross-request mutable state in the plugin. All
//! fields live in one record behind a single mutex; critical sections hold
//! only field reads/writes and a clock comparison, never I/O.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default retry-after for triggers that carry no provider hint.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// What caused the circuit to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Circuit is closed; no trigger recorded.
    None,
    /// Provider returned HTTP 429.
    RateLimit,
    /// Provider returned 5xx after retry exhaustion.
    ServerError,
    /// Connect/read/write failure or timeout after retry exhaustion.
    Timeout,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::None => "none",
            Trigger::RateLimit => "rate_limit",
            Trigger::ServerError => "server_error",
            Trigger::Timeout => "timeout",
        })
    }
}

/// Snapshot handed to callers when the breaker rejects a call.
///
/// `remaining_ms` is computed inside the critical section, so it is
/// consistent with the decision to reject.
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpenSnapshot {
    /// What opened the circuit
    pub trigger: Trigger,
    /// Configured retry-after duration in seconds
    pub retry_after_secs: u64,
    /// Milliseconds until the circuit closes
    pub remaining_ms: u64,
}

impl CircuitOpenSnapshot {
    /// Seconds until the circuit closes, rounded up, minimum 1.
    ///
    /// This is the value clients see in `Retry-After`.
    pub fn remaining_secs_ceil(&self) -> u64 {
        ((self.remaining_ms + 999) / 1000).max(1)
    }
}

#[derive(Debug)]
struct BreakerState {
    closed: bool,
    opened_at: Instant,
    retry_after: Duration,
    trigger: Trigger,
}

/// Mutex-guarded circuit breaker, one per plugin instance.
///
/// A disabled breaker is a no-op wrapper: [`CircuitBreaker::allow`] always
/// passes and [`CircuitBreaker::trip`] does nothing.
#[derive(Debug)]
pub struct CircuitBreaker {
    enabled: bool,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a breaker in the CLOSED state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(BreakerState {
                closed: true,
                opened_at: Instant::now(),
                retry_after: Duration::ZERO,
                trigger: Trigger::None,
            }),
        }
    }

    /// Whether the breaker participates at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks whether a call may proceed.
    ///
    /// An open circuit whose retry timer has expired transitions back to
    /// CLOSED here and the call is allowed.
    ///
    /// # Errors
    ///
    /// Returns a [`CircuitOpenSnapshot`] while the circuit is open.
    pub fn allow(&self) -> Result<(), CircuitOpenSnapshot> {
        if !self.enabled {
            return Ok(());
        }

        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if state.closed {
            return Ok(());
        }

        let elapsed = state.opened_at.elapsed();
        if elapsed >= state.retry_after {
            state.closed = true;
            state.trigger = Trigger::None;
            return Ok(());
        }

        let remaining = state.retry_after - elapsed;
        Err(CircuitOpenSnapshot {
            trigger: state.trigger,
            retry_after_secs: state.retry_after.as_secs(),
            remaining_ms: remaining.as_millis() as u64,
        })
    }

    /// Opens the circuit for `retry_after_secs` (falls back to the 30 s
    /// default when zero).
    pub fn trip(&self, trigger: Trigger, retry_after_secs: u64) {
        if !self.enabled {
            return;
        }

        let secs = if retry_after_secs > 0 {
            retry_after_secs
        } else {
            DEFAULT_RETRY_AFTER_SECS
        };

        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.closed = false;
        state.opened_at = Instant::now();
        state.retry_after = Duration::from_secs(secs);
        state.trigger = trigger;
    }

    /// Closes the circuit immediately.
    pub fn reset(&self) {
        if !self.enabled {
            return;
        }
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.closed = true;
        state.trigger = Trigger::None;
    }

    /// True when calls currently pass (without side effects on state).
    pub fn is_closed(&self) -> bool {
        if !self.enabled {
            return true;
        }
        self.state.lock().expect("breaker mutex poisoned").closed
    }

    /// Rewinds `opened_at` so tests can simulate elapsed time.
    #[cfg(test)]
    fn backdate(&self, by: Duration) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.opened_at -= by;
    }
}
