//! Retry policy with deterministic backoff and cancellation-aware
//! sleeps.
//!
//! Attempts are strictly sequential; at most one is in flight per
//! invocation. The final attempt's failure is returned verbatim, so a
//! retry-exhausted caller sees the underlying error, not a wrapper.

use crate::{Backoff, PolicyError, Sleeper, TokioSleeper};
use crate::error::ConfigError;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type RetryPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;
type OnRetry<E> = Arc<dyn Fn(u32, &PolicyError<E>) + Send + Sync>;

/// Retry policy: attempt count, backoff, optional predicate and
/// per-retry callback.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: Backoff,
    retry_predicate: Option<RetryPredicate<E>>,
    on_retry: Option<OnRetry<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_predicate", &self.retry_predicate.as_ref().map(|_| ".."))
            .field("on_retry", &self.on_retry.as_ref().map(|_| ".."))
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: Send + Sync + 'static,
{
    /// Policy with the given attempt budget and backoff, retrying every
    /// failure except cancellation.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Result<Self, ConfigError> {
        Self::builder().max_attempts(max_attempts)?.backoff(backoff).build()
    }

    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run the operation, retrying failures according to the policy.
    ///
    /// The cancellation token is handed to every attempt; cancellation
    /// observed between attempts or during a backoff sleep propagates
    /// immediately and is never retried.
    pub async fn execute<T, Fut, Op>(
        &self,
        mut operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>>,
        Op: FnMut(CancellationToken) -> Fut,
    {
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(PolicyError::Cancelled);
            }

            match operation(cancel.clone()).await {
                Ok(value) => return Ok(value),
                Err(PolicyError::Cancelled) => return Err(PolicyError::Cancelled),
                Err(error) => {
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    if let Some(predicate) = &self.retry_predicate {
                        if !predicate(&error) {
                            return Err(error);
                        }
                    }
                    if let Some(on_retry) = &self.on_retry {
                        on_retry(attempt, &error);
                    }

                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(attempt, ?delay, "retrying after failure");
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(PolicyError::Cancelled),
                    }
                }
            }
        }

        unreachable!("retry loop returns from its final attempt")
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: u32,
    backoff: Backoff,
    retry_predicate: Option<RetryPredicate<E>>,
    on_retry: Option<OnRetry<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicyBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicyBuilder")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_predicate", &self.retry_predicate.as_ref().map(|_| ".."))
            .field("on_retry", &self.on_retry.as_ref().map(|_| ".."))
            .finish()
    }
}

impl<E> RetryPolicyBuilder<E>
where
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(std::time::Duration::from_secs(1)),
            retry_predicate: None,
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Result<Self, ConfigError> {
        if attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retry only when the predicate holds for the failure.
    ///
    /// The predicate sees the full [`PolicyError`], so it can match on
    /// library-emitted failures (timeouts, circuit open, bulkhead
    /// rejections) as well as the underlying error.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Observe each failure that is about to be retried.
    ///
    /// Called with the 1-based attempt number that just failed; must be
    /// short and non-blocking.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &PolicyError<E>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, ConfigError> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            retry_predicate: self.retry_predicate,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstantSleeper, TrackingSleeper};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn policy(max_attempts: u32) -> RetryPolicy<TestError> {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .expect("max_attempts > 0")
            .backoff(Backoff::constant(Duration::from_millis(10)))
            .with_sleeper(InstantSleeper)
            .build()
            .expect("valid policy")
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy(3)
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, PolicyError<TestError>>(42)
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result = policy(5)
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            Err(PolicyError::Inner(TestError(format!("attempt {n}"))))
                        } else {
                            Ok(42)
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_final_failure_verbatim() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result: Result<(), _> = policy(3)
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        Err(PolicyError::Inner(TestError(format!("attempt {n}"))))
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            PolicyError::Inner(e) => assert_eq!(e.0, "attempt 2"),
            e => panic!("expected final inner error, got {e:?}"),
        }
    }

    #[tokio::test]
    async fn backoff_delays_follow_the_strategy() {
        let sleeper = TrackingSleeper::new();
        let retry_policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .max_attempts(4)
            .expect("max_attempts > 0")
            .backoff(Backoff::linear(Duration::from_millis(100), Duration::from_millis(100)))
            .with_sleeper(sleeper.clone())
            .build()
            .expect("valid policy");

        let _ = retry_policy
            .execute(
                |_cancel| async {
                    Err::<(), _>(PolicyError::Inner(TestError("always".into())))
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300)
            ]
        );
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_one_attempt() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let retry_policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .max_attempts(5)
            .expect("max_attempts > 0")
            .with_sleeper(InstantSleeper)
            .retry_if(|e| {
                e.as_inner().map_or(true, |inner: &TestError| inner.0.contains("transient"))
            })
            .build()
            .expect("valid policy");

        let result: Result<(), _> = retry_policy
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PolicyError::Inner(TestError("fatal".into())))
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeouts_are_retryable_by_default() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result: Result<(), _> = policy(3)
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PolicyError::<TestError>::Timeout {
                            timeout: Duration::from_secs(1),
                            elapsed: Duration::from_secs(1),
                        })
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(counter.load(Ordering::SeqCst), 3, "timeout failures retried");
    }

    #[tokio::test]
    async fn cancellation_is_never_retried() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        let result: Result<(), _> = policy(5)
            .execute(
                |_cancel| {
                    let counter = counter_op.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PolicyError::<TestError>::Cancelled)
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_sleep_propagates() {
        let cancel = CancellationToken::new();
        let cancel_for_op = cancel.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_op = counter.clone();

        // Real sleeper with a long delay; the token fires mid-sleep.
        let retry_policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .max_attempts(5)
            .expect("max_attempts > 0")
            .backoff(Backoff::constant(Duration::from_secs(30)))
            .build()
            .expect("valid policy");

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let result: Result<(), _> = retry_policy
            .execute(
                move |_c| {
                    let counter = counter_op.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(PolicyError::Inner(TestError("transient".into())))
                    }
                },
                &cancel_for_op,
            )
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(counter.load(Ordering::SeqCst), 1, "no attempt after cancelled sleep");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn on_retry_sees_each_failed_attempt() {
        let observed: Arc<Mutex<Vec<(u32, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let observed_cb = observed.clone();

        let retry_policy: RetryPolicy<TestError> = RetryPolicy::builder()
            .max_attempts(3)
            .expect("max_attempts > 0")
            .with_sleeper(InstantSleeper)
            .on_retry(move |attempt, error| {
                observed_cb.lock().push((attempt, error.to_string()));
            })
            .build()
            .expect("valid policy");

        let attempt_no = Arc::new(AtomicU32::new(0));
        let attempt_op = attempt_no.clone();
        let _ = retry_policy
            .execute(
                move |_c| {
                    let n = attempt_op.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err::<(), _>(PolicyError::Inner(TestError(format!("a{n}")))) }
                },
                &CancellationToken::new(),
            )
            .await;

        let calls = observed.lock().clone();
        // Two retries between three attempts; the final failure is not a retry.
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, 1);
        assert!(calls[0].1.contains("a1"));
        assert_eq!(calls[1].0, 2);
        assert!(calls[1].1.contains("a2"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = RetryPolicy::<TestError>::builder().max_attempts(0).unwrap_err();
        assert_eq!(err, ConfigError::InvalidMaxAttempts(0));
    }
}
