//! Circuit breaker with a mutex-guarded state tracker.
//!
//! The tracker (state, consecutive failure count, last failure stamp)
//! is shared by every clone of the policy; cloning a breaker does not
//! fork its state. All reads and writes happen under one mutex, and the
//! state-change callback fires under that mutex so observers see every
//! transition exactly once, in order.
//!
//! Half-open admits every arriving request, not just a single probe; a
//! failed probe flips the breaker back to open, which is what gates
//! subsequent arrivals.

use crate::clock::{Clock, MonotonicClock};
use crate::error::ConfigError;
use crate::PolicyError;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct TrackerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<u64>,
}

type BreakPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;
type OnStateChange = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Circuit breaker policy.
///
/// Configuration is immutable; the tracker is shared across clones.
#[derive(Clone)]
pub struct CircuitBreakerPolicy<E> {
    failure_threshold: u32,
    reset_timeout: Duration,
    break_predicate: Option<BreakPredicate<E>>,
    on_state_change: Option<OnStateChange>,
    tracker: Arc<Mutex<TrackerState>>,
    clock: Arc<dyn Clock>,
}

impl<E> std::fmt::Debug for CircuitBreakerPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl<E> CircuitBreakerPolicy<E> {
    /// Create a breaker that opens after `failure_threshold`
    /// consecutive failures and probes again after `reset_timeout`.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(failure_threshold));
        }
        if reset_timeout.is_zero() {
            return Err(ConfigError::ZeroResetTimeout);
        }
        Ok(Self {
            failure_threshold,
            reset_timeout,
            break_predicate: None,
            on_state_change: None,
            tracker: Arc::new(Mutex::new(TrackerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            })),
            clock: Arc::new(MonotonicClock::default()),
        })
    }

    /// Count only failures matching the predicate toward the threshold.
    ///
    /// Non-matching failures still surface to the caller; they just do
    /// not move the breaker.
    #[must_use]
    pub fn break_if(mut self, predicate: impl Fn(&PolicyError<E>) -> bool + Send + Sync + 'static) -> Self {
        self.break_predicate = Some(Arc::new(predicate));
        self
    }

    /// Observe state transitions. Called under the tracker lock; keep
    /// it short and non-blocking.
    #[must_use]
    pub fn on_state_change(
        mut self,
        callback: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    /// Override the clock (deterministic tests).
    #[must_use]
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current state as of now, without admitting a request.
    pub fn state(&self) -> CircuitState {
        self.tracker.lock().state
    }

    /// Run the operation if the breaker admits it.
    pub async fn execute<T, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        self.admit()?;

        let result = operation(cancel.clone()).await;

        match &result {
            Ok(_) => self.record_success(),
            // Cancellation says nothing about the dependency's health.
            Err(PolicyError::Cancelled) => {}
            Err(error) => self.record_failure(error),
        }

        result
    }

    fn admit(&self) -> Result<(), PolicyError<E>> {
        let mut tracker = self.tracker.lock();
        match tracker.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = self.clock.now_millis();
                let since_failure = now.saturating_sub(tracker.last_failure_at.unwrap_or(0));
                let reset_millis = self.reset_timeout.as_millis() as u64;

                if since_failure >= reset_millis {
                    self.transition(&mut tracker, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    let remaining = reset_millis - since_failure;
                    Err(PolicyError::CircuitOpen {
                        retry_after: Some(Duration::from_millis(remaining)),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut tracker = self.tracker.lock();
        tracker.consecutive_failures = 0;
        if tracker.state != CircuitState::Closed {
            self.transition(&mut tracker, CircuitState::Closed);
        }
    }

    fn record_failure(&self, error: &PolicyError<E>) {
        if let Some(predicate) = &self.break_predicate {
            if !predicate(error) {
                return;
            }
        }

        let mut tracker = self.tracker.lock();
        tracker.consecutive_failures += 1;
        tracker.last_failure_at = Some(self.clock.now_millis());

        match tracker.state {
            CircuitState::HalfOpen => self.transition(&mut tracker, CircuitState::Open),
            CircuitState::Closed if tracker.consecutive_failures >= self.failure_threshold => {
                self.transition(&mut tracker, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn transition(&self, tracker: &mut TrackerState, to: CircuitState) {
        let from = tracker.state;
        if from == to {
            return;
        }
        tracker.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                failures = tracker.consecutive_failures,
                ?from,
                "circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!("circuit breaker half-open, probing"),
            CircuitState::Closed => tracing::info!("circuit breaker closed"),
        }
        if let Some(callback) = &self.on_state_change {
            callback(from, to);
        }
    }
}
