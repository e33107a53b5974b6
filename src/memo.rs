//! Function memoization.
//!
//! Three families:
//! - unbounded sync memoizers over a concurrent map (`memoize`,
//!   `memoize2`);
//! - the async memoizer (`memoize_async`), which parks concurrent
//!   callers for the same key on one shared in-flight computation;
//! - result-aware memoization (`memoize_result`), which caches only
//!   successful outcomes and lets failures re-execute, while still
//!   collapsing concurrent callers onto a single in-flight computation.
//!
//! Options-driven caching (TTL, LRU, external provider) lives in
//! [`crate::cache`]; `memoize_with`/`memoize_with_async` wrap a
//! [`MemoCache`](crate::cache::MemoCache) around a function.

use crate::cache::{MemoCache, MemoizeOptions};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{broadcast, OnceCell};

/// Memoize a single-argument function in an unbounded concurrent map.
///
/// Two callers racing the same missing key may both invoke `f`; the
/// entry written last wins. Values are retained for the life of the
/// returned closure.
pub fn memoize<A, R, F>(f: F) -> impl Fn(A) -> R + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    let cache: Arc<DashMap<A, R>> = Arc::new(DashMap::new());
    let f = Arc::new(f);
    move |arg: A| {
        if let Some(hit) = cache.get(&arg) {
            return hit.clone();
        }
        let value = (*f)(&arg);
        cache.insert(arg, value.clone());
        value
    }
}

/// Memoize a two-argument function, keyed by the argument pair.
pub fn memoize2<A, B, R, F>(f: F) -> impl Fn(A, B) -> R + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    B: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&A, &B) -> R + Send + Sync + 'static,
{
    let memoized = memoize(move |key: &(A, B)| f(&key.0, &key.1));
    move |a: A, b: B| memoized((a, b))
}

/// Memoize an async single-argument function with thundering-herd
/// suppression.
///
/// Concurrent callers for the same key await the *same* in-flight
/// computation; once it completes, the value is retained indefinitely.
/// If the computation panics or is dropped, the slot stays empty and
/// the next caller re-executes.
pub fn memoize_async<A, R, F, Fut>(f: F) -> impl Fn(A) -> BoxFuture<'static, R> + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let cells: Arc<DashMap<A, Arc<OnceCell<R>>>> = Arc::new(DashMap::new());
    let f = Arc::new(f);
    move |arg: A| {
        let cells = cells.clone();
        let f = f.clone();
        Box::pin(async move {
            let cell = cells.entry(arg.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone();
            cell.get_or_init(|| (*f)(arg)).await.clone()
        })
    }
}

/// Memoize through an options-driven [`MemoCache`] (TTL, LRU,
/// external provider).
pub fn memoize_with<A, R, F>(options: MemoizeOptions<A, R>, f: F) -> impl Fn(A) -> R + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(&A) -> R + Send + Sync + 'static,
{
    let cache = Arc::new(MemoCache::new(options));
    let f = Arc::new(f);
    move |arg: A| {
        let f = f.clone();
        cache.get_or_add(arg, move |key| (*f)(key))
    }
}

/// Async variant of [`memoize_with`]; provider I/O and the factory run
/// outside the L1 lock.
pub fn memoize_with_async<A, R, F, Fut>(
    options: MemoizeOptions<A, R>,
    f: F,
) -> impl Fn(A) -> BoxFuture<'static, R> + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let cache = Arc::new(MemoCache::new(options));
    let f = Arc::new(f);
    move |arg: A| {
        let cache = cache.clone();
        let f = f.clone();
        Box::pin(async move { cache.get_or_add_async(arg, move |key| (*f)(key)).await })
    }
}

type InFlightMap<A, V, E> = Mutex<HashMap<A, broadcast::Sender<Result<V, E>>>>;

/// Clears the in-flight slot if the leader is dropped mid-computation,
/// so parked waiters see a closed channel and re-execute instead of
/// hanging.
struct InFlightGuard<A: Eq + Hash, V, E> {
    key: Option<A>,
    in_flight: Arc<InFlightMap<A, V, E>>,
}

impl<A: Eq + Hash, V, E> InFlightGuard<A, V, E> {
    /// Remove the slot and hand back its sender for completion.
    fn complete(&mut self) -> Option<broadcast::Sender<Result<V, E>>> {
        let key = self.key.take()?;
        self.in_flight.lock().remove(&key)
    }
}

impl<A: Eq + Hash, V, E> Drop for InFlightGuard<A, V, E> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight.lock().remove(&key);
        }
    }
}

/// Memoize an async `Result`-returning function, caching only
/// successful outcomes.
///
/// Failures are returned to the caller but never stored; the next call
/// for that key re-executes. Concurrent callers for the same key share
/// one in-flight computation, and the in-flight slot is cleared on
/// completion so a failure does not poison later calls.
pub fn memoize_result<A, V, E, F, Fut>(
    f: F,
) -> impl Fn(A) -> BoxFuture<'static, Result<V, E>> + Clone
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    let values: Arc<DashMap<A, V>> = Arc::new(DashMap::new());
    let in_flight: Arc<InFlightMap<A, V, E>> = Arc::new(Mutex::new(HashMap::new()));
    let f = Arc::new(f);

    move |arg: A| {
        let values = values.clone();
        let in_flight = in_flight.clone();
        let f = f.clone();
        Box::pin(async move {
            loop {
                if let Some(hit) = values.get(&arg) {
                    return Ok(hit.clone());
                }

                // Join an in-flight computation or become its leader.
                let waiter = {
                    let mut slots = in_flight.lock();
                    match slots.get(&arg) {
                        Some(sender) => Some(sender.subscribe()),
                        None => {
                            let (sender, _) = broadcast::channel(1);
                            slots.insert(arg.clone(), sender);
                            None
                        }
                    }
                };

                match waiter {
                    Some(mut receiver) => match receiver.recv().await {
                        Ok(result) => return result,
                        // Leader dropped without completing; try again.
                        Err(_) => continue,
                    },
                    None => {
                        let mut guard =
                            InFlightGuard { key: Some(arg.clone()), in_flight: in_flight.clone() };
                        let result = (*f)(arg.clone()).await;
                        if let Ok(value) = &result {
                            values.insert(arg.clone(), value.clone());
                        }
                        if let Some(sender) = guard.complete() {
                            let _ = sender.send(result.clone());
                        }
                        return result;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn memoize_calls_factory_once_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize(move |n: &u32| {
            calls_f.fetch_add(1, Ordering::SeqCst);
            n * 2
        });

        assert_eq!(cached(21), 42);
        assert_eq!(cached(21), 42);
        assert_eq!(cached(5), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memoize_matches_the_underlying_function() {
        let f = |n: &u32| n.wrapping_mul(31).wrapping_add(7);
        let cached = memoize(f);
        for n in [0u32, 1, 17, u32::MAX] {
            assert_eq!(cached(n), f(&n));
            assert_eq!(cached(n), f(&n));
        }
    }

    #[test]
    fn memoize2_keys_on_both_arguments() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize2(move |a: &u32, b: &u32| {
            calls_f.fetch_add(1, Ordering::SeqCst);
            a + b
        });

        assert_eq!(cached(1, 2), 3);
        assert_eq!(cached(1, 2), 3);
        assert_eq!(cached(2, 1), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "argument order is part of the key");
    }

    #[tokio::test]
    async fn memoize_async_shares_one_in_flight_computation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_async(move |key: String| {
            let calls = calls_f.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                format!("value-of-{key}")
            }
        });

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cached = cached.clone();
            handles.push(tokio::spawn(async move { cached("k".to_string()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "value-of-k");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "herd suppressed to one computation");
    }

    #[tokio::test]
    async fn memoize_async_retains_the_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_async(move |n: u32| {
            let calls = calls_f.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                n + 1
            }
        });

        assert_eq!(cached(1).await, 2);
        assert_eq!(cached(1).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memoize_with_applies_lru_options() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let options = MemoizeOptions::new().with_max_size(1).unwrap();
        let cached = memoize_with(options, move |n: &u32| {
            calls_f.fetch_add(1, Ordering::SeqCst);
            n * 10
        });

        assert_eq!(cached(1), 10);
        assert_eq!(cached(2), 20); // evicts key 1
        assert_eq!(cached(1), 10); // recompute
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn memoize_with_async_serves_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let options = MemoizeOptions::new().with_max_size(8).unwrap();
        let cached = memoize_with_async(options, move |n: u32| {
            let calls = calls_f.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                n * 3
            }
        });

        assert_eq!(cached(2).await, 6);
        assert_eq!(cached(2).await, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memoize_result_does_not_cache_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_result(move |key: String| {
            let calls = calls_f.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    Err(format!("transient failure for {key}"))
                } else {
                    Ok(42)
                }
            }
        });

        assert!(cached("k".to_string()).await.is_err());
        assert_eq!(cached("k".to_string()).await, Ok(42), "failure was not cached");
        assert_eq!(cached("k".to_string()).await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2, "success served from cache");
    }

    #[tokio::test]
    async fn memoize_result_collapses_concurrent_callers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_result(move |_key: String| {
            let calls = calls_f.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, String>(7)
            }
        });

        let mut handles = Vec::new();
        for _ in 0..6 {
            let cached = cached.clone();
            handles.push(tokio::spawn(async move { cached("k".to_string()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memoize_result_shares_failures_with_waiters_without_caching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_result(move |_key: String| {
            let calls = calls_f.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if attempt == 0 {
                    Err("down".to_string())
                } else {
                    Ok(1)
                }
            }
        });

        // Two concurrent callers share the failing computation.
        let first = tokio::spawn({
            let cached = cached.clone();
            async move { cached("k".to_string()).await }
        });
        let second = tokio::spawn({
            let cached = cached.clone();
            async move { cached("k".to_string()).await }
        });
        let results = [first.await.unwrap(), second.await.unwrap()];
        let failures = results.iter().filter(|r| r.is_err()).count();
        assert!(failures >= 1, "the shared computation failed");
        assert!(calls.load(Ordering::SeqCst) <= 2);

        // The slot was cleared, so a later call re-executes and succeeds.
        assert_eq!(cached("k".to_string()).await, Ok(1));
    }

    #[tokio::test]
    async fn memoize_result_leader_drop_does_not_hang_waiters() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let entered_f = entered.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_f = calls.clone();
        let cached = memoize_result(move |_key: String| {
            let entered = entered_f.clone();
            let calls = calls_f.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // First leader stalls until it is aborted.
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, String>(1)
            }
        });

        // Leader starts, then is aborted mid-flight.
        let leader = tokio::spawn({
            let cached = cached.clone();
            async move { cached("k".to_string()).await }
        });
        entered.notified().await;

        let waiter = tokio::spawn({
            let cached = cached.clone();
            async move {
                tokio::time::timeout(Duration::from_secs(5), cached("k".to_string())).await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        // The waiter re-executes as the new leader rather than hanging.
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.expect("waiter recovered after the leader was dropped"), Ok(1));
    }
}
