//! End-to-end scenarios across composed policies.

use railguard::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DependencyError(String);

impl std::fmt::Display for DependencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dependency error: {}", self.0)
    }
}

impl std::error::Error for DependencyError {}

#[tokio::test]
async fn capped_exponential_backoff_produces_the_documented_delays() {
    let sleeper = TrackingSleeper::new();
    let retry: RetryPolicy<DependencyError> = RetryPolicy::builder()
        .max_attempts(10)
        .expect("valid")
        .backoff(Backoff::exponential_with(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(5),
        ))
        .with_sleeper(sleeper.clone())
        .build()
        .expect("valid");

    let _ = retry
        .execute(
            |_t| async { Err::<(), _>(PolicyError::Inner(DependencyError("down".into()))) },
            &CancellationToken::new(),
        )
        .await;

    let expected: Vec<Duration> = [100u64, 200, 400, 800, 1600, 3200, 5000, 5000, 5000]
        .iter()
        .map(|ms| Duration::from_millis(*ms))
        .collect();
    assert_eq!(sleeper.calls(), expected, "nine sleeps between ten attempts");
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_recovers_via_half_open() {
    let clock = ManualClock::new();
    let transitions: Arc<parking_lot::Mutex<Vec<(CircuitState, CircuitState)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let transitions_cb = transitions.clone();

    let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(30))
        .expect("valid")
        .with_clock(clock.clone())
        .on_state_change(move |from, to| transitions_cb.lock().push((from, to)));

    // Three consecutive failures open the circuit.
    for _ in 0..3 {
        let _ = breaker
            .execute(
                |_t| async { Err::<(), _>(PolicyError::Inner(DependencyError("down".into()))) },
                &CancellationToken::new(),
            )
            .await;
    }

    // The fourth call is rejected with the remaining reset window.
    match breaker
        .execute(|_t| async { Ok(1) }, &CancellationToken::new())
        .await
        .unwrap_err()
    {
        PolicyError::CircuitOpen { retry_after } => {
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        e => panic!("expected CircuitOpen, got {e:?}"),
    }

    // After the reset window, the next call probes half-open and closes.
    clock.advance(30_000);
    let recovered = breaker.execute(|_t| async { Ok(7) }, &CancellationToken::new()).await;
    assert_eq!(recovered.unwrap(), 7);
    assert_eq!(breaker.state(), CircuitState::Closed);

    // A failed probe would have re-opened instead; verify the recorded
    // transition history matches exactly one callback per transition.
    assert_eq!(
        transitions.lock().clone(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test]
async fn failed_probe_reopens_the_circuit() {
    let clock = ManualClock::new();
    let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(30))
        .expect("valid")
        .with_clock(clock.clone());

    let _ = breaker
        .execute(
            |_t| async { Err::<(), _>(PolicyError::Inner(DependencyError("down".into()))) },
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(30_000);
    let _ = breaker
        .execute(
            |_t| async { Err::<(), _>(PolicyError::Inner(DependencyError("still down".into()))) },
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(breaker.state(), CircuitState::Open, "failed probe re-opens");
}

#[tokio::test]
async fn bulkhead_runs_two_queues_one_rejects_one() {
    let rejected = Arc::new(AtomicUsize::new(0));
    let rejected_cb = rejected.clone();
    let bulkhead = BulkheadPolicy::new(2, 1)
        .expect("valid")
        .on_rejected(move || {
            rejected_cb.fetch_add(1, Ordering::SeqCst);
        });
    let stack: ResilienceStack<DependencyError> =
        ResilienceStack::builder().bulkhead(bulkhead.clone()).build();

    let started = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let (gate_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Two slow operations take both slots.
    let mut slow = Vec::new();
    for _ in 0..2 {
        let stack = stack.clone();
        let started = started.clone();
        let completed = completed.clone();
        let gate = Arc::new(tokio::sync::Mutex::new(gate_tx.subscribe()));
        slow.push(tokio::spawn(async move {
            stack
                .execute(
                    move |_t| {
                        let started = started.clone();
                        let completed = completed.clone();
                        let gate = gate.clone();
                        async move {
                            started.fetch_add(1, Ordering::SeqCst);
                            let _ = gate.lock().await.recv().await;
                            completed.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, PolicyError<DependencyError>>(())
                        }
                    },
                    &CancellationToken::new(),
                )
                .await
        }));
    }
    while started.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The third queues.
    let queued = tokio::spawn({
        let stack = stack.clone();
        let completed = completed.clone();
        async move {
            stack
                .execute(
                    move |_t| {
                        let completed = completed.clone();
                        async move {
                            completed.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, PolicyError<DependencyError>>(())
                        }
                    },
                    &CancellationToken::new(),
                )
                .await
        }
    });
    while bulkhead.queue_len() != 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The fourth is rejected immediately.
    let result = stack
        .execute(
            |_t| async { Ok::<_, PolicyError<DependencyError>>(()) },
            &CancellationToken::new(),
        )
        .await;
    match result.unwrap_err() {
        PolicyError::BulkheadRejected { max_concurrency, max_queue_size } => {
            assert_eq!(max_concurrency, 2);
            assert_eq!(max_queue_size, 1);
        }
        e => panic!("expected BulkheadRejected, got {e:?}"),
    }
    assert_eq!(rejected.load(Ordering::SeqCst), 1, "on_rejected fired exactly once");

    // Everyone else eventually runs.
    gate_tx.send(()).unwrap();
    for handle in slow {
        handle.await.unwrap().unwrap();
    }
    queued.await.unwrap().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn per_attempt_timeouts_retry_until_the_overall_budget_fires() {
    let retry: RetryPolicy<DependencyError> = RetryPolicy::builder()
        .max_attempts(5)
        .expect("valid")
        .backoff(Backoff::None)
        .with_sleeper(InstantSleeper)
        .build()
        .expect("valid");

    let stack: ResilienceStack<DependencyError> = ResilienceStack::builder()
        .overall_timeout(TimeoutPolicy::new(Duration::from_secs(10)).expect("valid"))
        .retry(retry)
        .attempt_timeout(TimeoutPolicy::new(Duration::from_secs(2)).expect("valid"))
        .build();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let result: Result<(), _> = stack
        .execute(
            move |_t| {
                let attempts = attempts_op.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Ok(())
                }
            },
            &CancellationToken::new(),
        )
        .await;

    // Attempts start at 0s, 2s, 4s, 6s, 8s; the first four time out at
    // 2s each and the overall budget cuts the fifth at 10s.
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
    match result.unwrap_err() {
        PolicyError::Timeout { timeout, elapsed } => {
            assert_eq!(timeout, Duration::from_secs(10), "the overall layer reports");
            assert!(elapsed >= Duration::from_secs(10));
        }
        e => panic!("expected overall timeout, got {e:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_surfaces_the_attempt_timeout() {
    // Without an overall budget, an operation that always overruns its
    // per-attempt deadline exhausts the retries and the caller sees the
    // final attempt's timeout.
    let retry: RetryPolicy<DependencyError> = RetryPolicy::builder()
        .max_attempts(3)
        .expect("valid")
        .backoff(Backoff::None)
        .with_sleeper(InstantSleeper)
        .build()
        .expect("valid");

    let stack: ResilienceStack<DependencyError> = ResilienceStack::builder()
        .retry(retry)
        .attempt_timeout(TimeoutPolicy::new(Duration::from_secs(1)).expect("valid"))
        .build();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let result: Result<(), _> = stack
        .execute(
            move |_t| {
                let attempts = attempts_op.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            },
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match result.unwrap_err() {
        PolicyError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(1)),
        e => panic!("expected attempt timeout, got {e:?}"),
    }
}

#[tokio::test]
async fn external_cancellation_beats_the_overall_timeout() {
    let stack: ResilienceStack<DependencyError> = ResilienceStack::builder()
        .overall_timeout(TimeoutPolicy::new(Duration::from_secs(30)).expect("valid"))
        .build();

    let cancel = CancellationToken::new();
    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    });

    let result: Result<(), _> = stack
        .execute(
            |_t| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            &cancel,
        )
        .await;

    assert!(result.unwrap_err().is_cancelled(), "cancellation must not become a timeout");
    canceller.await.unwrap();
}

#[tokio::test]
async fn retry_predicate_stops_on_circuit_open() {
    // A breaker inside the retry loop: once the circuit opens, the
    // retry predicate gives up instead of hammering the open circuit.
    let breaker = CircuitBreakerPolicy::new(2, Duration::from_secs(30)).expect("valid");
    let retry: RetryPolicy<DependencyError> = RetryPolicy::builder()
        .max_attempts(10)
        .expect("valid")
        .backoff(Backoff::None)
        .with_sleeper(InstantSleeper)
        .retry_if(|error| !error.is_circuit_open())
        .build()
        .expect("valid");

    let stack: ResilienceStack<DependencyError> =
        ResilienceStack::builder().retry(retry).circuit_breaker(breaker).build();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_op = attempts.clone();
    let result: Result<(), _> = stack
        .execute(
            move |_t| {
                let attempts = attempts_op.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(PolicyError::Inner(DependencyError("down".into())))
                }
            },
            &CancellationToken::new(),
        )
        .await;

    // Two failing attempts open the circuit; the third attempt is
    // short-circuited and the predicate ends the loop.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(result.unwrap_err().is_circuit_open());
}
