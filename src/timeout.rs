//! Timeout policy bounding async operation duration.
//!
//! Semantics
//! - The operation is raced against the budget and against the caller's
//!   cancellation token. Completion within the budget passes the result
//!   through verbatim.
//! - When the budget elapses first, the child token handed to the
//!   operation is cancelled and the caller sees
//!   `PolicyError::Timeout { timeout, elapsed }` (or the configured
//!   factory's error).
//! - External cancellation is propagated as `PolicyError::Cancelled`,
//!   never converted into a timeout.
//! - When the budget and the operation land on the same poll, the
//!   budget wins; this keeps nested per-attempt/overall deadlines
//!   deterministic.

use crate::error::ConfigError;
use crate::PolicyError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type ErrorFactory<E> = Arc<dyn Fn(Duration) -> E + Send + Sync>;

/// Policy that enforces a maximum duration on async operations.
pub struct TimeoutPolicy<E> {
    duration: Duration,
    error_factory: Option<ErrorFactory<E>>,
}

impl<E> Clone for TimeoutPolicy<E> {
    fn clone(&self) -> Self {
        Self { duration: self.duration, error_factory: self.error_factory.clone() }
    }
}

impl<E> std::fmt::Debug for TimeoutPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("duration", &self.duration)
            .field("error_factory", &self.error_factory.as_ref().map(|_| ".."))
            .finish()
    }
}

impl<E> TimeoutPolicy<E> {
    /// Create a timeout policy; the duration must be positive.
    pub fn new(duration: Duration) -> Result<Self, ConfigError> {
        if duration.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self { duration, error_factory: None })
    }

    /// Replace the default `Timeout` error with one built by `factory`
    /// from the elapsed time.
    #[must_use]
    pub fn with_error_factory(mut self, factory: impl Fn(Duration) -> E + Send + Sync + 'static) -> Self {
        self.error_factory = Some(Arc::new(factory));
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn budget_error(&self, elapsed: Duration) -> PolicyError<E> {
        match &self.error_factory {
            Some(factory) => PolicyError::Inner(factory(elapsed)),
            None => PolicyError::Timeout { timeout: self.duration, elapsed },
        }
    }

    /// Execute an operation under the budget.
    ///
    /// The operation receives a child token that fires when the budget
    /// elapses or the caller's token fires, so cancellation-aware work
    /// can stop promptly.
    pub async fn execute<T, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        let start = Instant::now();
        let child = cancel.child_token();
        let guard = child.clone().drop_guard();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PolicyError::Cancelled),
            _ = tokio::time::sleep(self.duration) => {
                drop(guard); // cancels the child so the operation can stop
                let elapsed = start.elapsed();
                tracing::debug!(timeout = ?self.duration, ?elapsed, "operation timed out");
                Err(self.budget_error(elapsed))
            }
            result = operation(child.clone()) => {
                let _ = guard.disarm();
                result
            }
        }
    }

    /// Execute an operation returning a plain value, wrapping it in
    /// `Ok` on completion.
    ///
    /// This is the bridge for non-`Result` operations; a panic inside
    /// the operation is captured as `PolicyError::Internal` instead of
    /// unwinding through the policy.
    pub async fn execute_value<T, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = T>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        self.execute(
            |token| {
                AssertUnwindSafe(operation(token)).catch_unwind().map(|caught| match caught {
                    Ok(value) => Ok(value),
                    Err(payload) => {
                        let (message, payload_type) = describe_panic(payload.as_ref());
                        Err(PolicyError::Internal { message, payload_type })
                    }
                })
            },
            cancel,
        )
        .await
    }
}

pub(crate) fn describe_panic(payload: &(dyn std::any::Any + Send)) -> (String, &'static str) {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        ((*msg).to_string(), "&str")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        (msg.clone(), "String")
    } else {
        ("non-string panic payload".to_string(), "opaque")
    }
}
