//! Composite resilience stack.
//!
//! `build()` wires the configured policies around the operation from
//! innermost to outermost:
//!
//! ```text
//! overall timeout ( retry ( per-attempt timeout ( circuit breaker ( bulkhead ( op ) ) ) ) )
//! ```
//!
//! Every layer is optional and skipped when unset. The per-attempt
//! timeout lives strictly inside the retry loop so each attempt gets
//! its own deadline; the overall timeout covers all attempts plus the
//! backoff sleeps between them. The caller's cancellation token threads
//! through every layer; timeouts hand the operation a child token so
//! external cancellation and budget expiry stay distinguishable.

use crate::{BulkheadPolicy, CircuitBreakerPolicy, PolicyError, RetryPolicy, TimeoutPolicy};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Composite of the four resilience policies plus an optional
/// per-attempt timeout.
#[derive(Clone)]
pub struct ResilienceStack<E> {
    overall_timeout: Option<TimeoutPolicy<E>>,
    retry: Option<RetryPolicy<E>>,
    attempt_timeout: Option<TimeoutPolicy<E>>,
    circuit_breaker: Option<CircuitBreakerPolicy<E>>,
    bulkhead: Option<BulkheadPolicy>,
}

impl<E> std::fmt::Debug for ResilienceStack<E>
where
    E: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceStack")
            .field("overall_timeout", &self.overall_timeout.as_ref().map(|t| t.duration()))
            .field("retry", &self.retry.as_ref().map(|r| r.max_attempts()))
            .field("attempt_timeout", &self.attempt_timeout.as_ref().map(|t| t.duration()))
            .field("circuit_breaker", &self.circuit_breaker.is_some())
            .field("bulkhead", &self.bulkhead.is_some())
            .finish()
    }
}

impl<E> ResilienceStack<E>
where
    E: Send + Sync + 'static,
{
    pub fn builder() -> ResilienceStackBuilder<E> {
        ResilienceStackBuilder::new()
    }

    /// Execute the operation under the composed policies.
    pub async fn execute<T, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        // Retry re-invokes the operation, so it lives in a shared cell
        // that each attempt closure can lock and call.
        let op_cell = Arc::new(Mutex::new(operation));

        match &self.overall_timeout {
            Some(overall) => {
                overall
                    .execute(|token| self.retry_layer(op_cell.clone(), token), cancel)
                    .await
            }
            None => self.retry_layer(op_cell.clone(), cancel.clone()).await,
        }
    }

    /// Execute an operation returning a plain value, wrapping it in
    /// `Ok` on completion and capturing panics as
    /// [`PolicyError::Internal`].
    pub async fn execute_value<T, Fut, Op>(
        &self,
        mut operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = T> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        use futures::FutureExt;
        self.execute(
            move |token| {
                std::panic::AssertUnwindSafe(operation(token)).catch_unwind().map(|caught| {
                    match caught {
                        Ok(value) => Ok(value),
                        Err(payload) => {
                            let (message, payload_type) =
                                crate::timeout::describe_panic(payload.as_ref());
                            Err(PolicyError::Internal { message, payload_type })
                        }
                    }
                })
            },
            cancel,
        )
        .await
    }

    async fn retry_layer<T, Fut, Op>(
        &self,
        op_cell: Arc<Mutex<Op>>,
        token: CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        match &self.retry {
            Some(retry) => {
                retry
                    .execute(|attempt_token| self.attempt_layer(op_cell.clone(), attempt_token), &token)
                    .await
            }
            None => self.attempt_layer(op_cell, token).await,
        }
    }

    async fn attempt_layer<T, Fut, Op>(
        &self,
        op_cell: Arc<Mutex<Op>>,
        token: CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        match &self.attempt_timeout {
            Some(attempt) => {
                attempt
                    .execute(|child| self.guarded_layer(op_cell.clone(), child), &token)
                    .await
            }
            None => self.guarded_layer(op_cell, token).await,
        }
    }

    async fn guarded_layer<T, Fut, Op>(
        &self,
        op_cell: Arc<Mutex<Op>>,
        token: CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        match &self.circuit_breaker {
            Some(breaker) => {
                breaker
                    .execute(|inner| self.bulkhead_layer(op_cell.clone(), inner), &token)
                    .await
            }
            None => self.bulkhead_layer(op_cell, token).await,
        }
    }

    async fn bulkhead_layer<T, Fut, Op>(
        &self,
        op_cell: Arc<Mutex<Op>>,
        token: CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>> + Send,
        Op: FnMut(CancellationToken) -> Fut + Send,
    {
        match &self.bulkhead {
            Some(bulkhead) => {
                bulkhead
                    .execute(|inner| invoke(&op_cell, inner), &token)
                    .await
            }
            None => invoke(&op_cell, token).await,
        }
    }
}

fn invoke<T, E, Fut, Op>(op_cell: &Arc<Mutex<Op>>, token: CancellationToken) -> Fut
where
    Fut: Future<Output = Result<T, PolicyError<E>>>,
    Op: FnMut(CancellationToken) -> Fut,
{
    let mut op = op_cell.lock();
    op(token)
}

/// Fluent builder for [`ResilienceStack`]; layers may be configured in
/// any order, the wrapping order is fixed.
pub struct ResilienceStackBuilder<E> {
    overall_timeout: Option<TimeoutPolicy<E>>,
    retry: Option<RetryPolicy<E>>,
    attempt_timeout: Option<TimeoutPolicy<E>>,
    circuit_breaker: Option<CircuitBreakerPolicy<E>>,
    bulkhead: Option<BulkheadPolicy>,
}

impl<E> ResilienceStackBuilder<E>
where
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            overall_timeout: None,
            retry: None,
            attempt_timeout: None,
            circuit_breaker: None,
            bulkhead: None,
        }
    }

    /// Deadline covering the whole execution: all attempts plus
    /// backoff sleeps.
    pub fn overall_timeout(mut self, policy: TimeoutPolicy<E>) -> Self {
        self.overall_timeout = Some(policy);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Deadline applied to each individual attempt inside the retry
    /// loop.
    pub fn attempt_timeout(mut self, policy: TimeoutPolicy<E>) -> Self {
        self.attempt_timeout = Some(policy);
        self
    }

    pub fn circuit_breaker(mut self, policy: CircuitBreakerPolicy<E>) -> Self {
        self.circuit_breaker = Some(policy);
        self
    }

    pub fn bulkhead(mut self, policy: BulkheadPolicy) -> Self {
        self.bulkhead = Some(policy);
        self
    }

    pub fn build(self) -> ResilienceStack<E> {
        ResilienceStack {
            overall_timeout: self.overall_timeout,
            retry: self.retry,
            attempt_timeout: self.attempt_timeout,
            circuit_breaker: self.circuit_breaker,
            bulkhead: self.bulkhead,
        }
    }
}

impl<E> Default for ResilienceStackBuilder<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
