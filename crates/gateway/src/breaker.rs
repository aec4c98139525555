//! Circuit breaker for the upstream credential authority.
//!
//! States: `CLOSED -> OPEN -> HALF_OPEN -> CLOSED`. Failures are counted
//! over a rolling window anchored at the first tracked failure; reaching
//! the threshold within the window opens the circuit for a cooldown.
//! While open, calls are rejected without a network attempt. After the
//! cooldown, exactly one probe is admitted at a time; its outcome decides
//! the next state.
//!
//! Only 5xx and network/timeout failures should be reported as failures.
//! A 4xx proves the upstream is reachable and counts as success.
//!
//! Counters are shared by every concurrent caller, so all mutation
//! happens under one mutex. Time comes from `tokio::time::Instant` so
//! tests can drive the window and cooldown with a paused clock.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker to admit a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call normally.
    Allowed,
    /// Circuit half-open, this call is the single probe. The caller must
    /// report the outcome (or abort) so the probe slot is released.
    Probe,
    /// Circuit open, fail fast.
    Rejected,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failures: u32,
    first_failure_at: Option<Instant>,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-rate-triggered fast-fail gate.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    rolling_window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, rolling_window: Duration, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                first_failure_at: None,
                open_until: None,
                probe_in_flight: false,
            }),
            failure_threshold,
            rolling_window,
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to admit one call.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let cooled_down = inner
                    .open_until
                    .is_some_and(|until| Instant::now() >= until);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    debug!(target: "gateway.breaker", "Cooldown elapsed, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Report a successful call. `probe` must be true when the call was
    /// admitted as [`Admission::Probe`].
    pub fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        if probe {
            info!(target: "gateway.breaker", "Probe succeeded, circuit closed");
            inner.state = BreakerState::Closed;
            inner.probe_in_flight = false;
        }
        inner.failures = 0;
        inner.first_failure_at = None;
    }

    /// Report a failed call.
    pub fn record_failure(&self, probe: bool) {
        let now = Instant::now();
        let mut inner = self.lock();

        if probe {
            warn!(target: "gateway.breaker", "Probe failed, circuit reopened");
            inner.state = BreakerState::Open;
            inner.open_until = Some(now + self.cooldown);
            inner.probe_in_flight = false;
            inner.failures = 0;
            inner.first_failure_at = None;
            return;
        }

        if inner.state != BreakerState::Closed {
            // A straggler from before the circuit opened. Ignore.
            return;
        }

        // Restart the window if the tracked failures have aged out.
        if inner
            .first_failure_at
            .is_some_and(|first| now.duration_since(first) > self.rolling_window)
        {
            inner.failures = 0;
            inner.first_failure_at = None;
        }

        inner.failures += 1;
        inner.first_failure_at.get_or_insert(now);

        if inner.failures >= self.failure_threshold {
            warn!(
                target: "gateway.breaker",
                failures = inner.failures,
                "Failure threshold reached, circuit opened"
            );
            inner.state = BreakerState::Open;
            inner.open_until = Some(now + self.cooldown);
            inner.failures = 0;
            inner.first_failure_at = None;
        }
    }

    /// Release a probe admission without reporting an outcome, e.g. when
    /// the call was rejected by the bulkhead before any attempt was made.
    pub fn abort_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }

    /// Current state, for logging and tests.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }
}
