//! Bulkhead: bounded concurrency with a bounded FIFO wait queue.
//!
//! Admission protocol:
//! 1. A free slot admits the caller immediately.
//! 2. With all slots busy, the caller queues while the queue has room,
//!    then waits on a one-shot handle. Waiters are released strictly in
//!    enqueue order.
//! 3. With the queue also full, the caller is rejected.
//!
//! The tracker mutex is never held across an await; waiters park on
//! their oneshot receiver lock-free, and a cancelled waiter reacquires
//! the lock to remove itself from the queue.

use crate::error::ConfigError;
use crate::PolicyError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type OnRejected = Arc<dyn Fn() + Send + Sync>;

struct TrackerState {
    current_concurrency: usize,
    waiters: VecDeque<(u64, oneshot::Sender<()>)>,
    next_waiter_id: u64,
}

enum Admission {
    Granted,
    Rejected,
    Cancelled,
}

/// Bulkhead policy.
///
/// Configuration is immutable; the tracker is shared across clones, so
/// clones compete for the same slots.
#[derive(Clone)]
pub struct BulkheadPolicy {
    max_concurrency: usize,
    max_queue_size: usize,
    on_rejected: Option<OnRejected>,
    tracker: Arc<Mutex<TrackerState>>,
}

impl std::fmt::Debug for BulkheadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadPolicy")
            .field("max_concurrency", &self.max_concurrency)
            .field("max_queue_size", &self.max_queue_size)
            .field("current_concurrency", &self.current_concurrency())
            .finish()
    }
}

impl BulkheadPolicy {
    /// Create a bulkhead admitting `max_concurrency` operations with up
    /// to `max_queue_size` callers waiting.
    pub fn new(max_concurrency: usize, max_queue_size: usize) -> Result<Self, ConfigError> {
        if max_concurrency == 0 {
            return Err(ConfigError::InvalidMaxConcurrency(max_concurrency));
        }
        Ok(Self {
            max_concurrency,
            max_queue_size,
            on_rejected: None,
            tracker: Arc::new(Mutex::new(TrackerState {
                current_concurrency: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
            })),
        })
    }

    /// Observe rejections. Must be short and non-blocking.
    #[must_use]
    pub fn on_rejected(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_rejected = Some(Arc::new(callback));
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Number of operations currently holding a slot.
    pub fn current_concurrency(&self) -> usize {
        self.tracker.lock().current_concurrency
    }

    /// Number of callers currently waiting for a slot.
    pub fn queue_len(&self) -> usize {
        self.tracker.lock().waiters.len()
    }

    /// Run the operation once a slot is available.
    pub async fn execute<T, E, Fut, Op>(
        &self,
        operation: Op,
        cancel: &CancellationToken,
    ) -> Result<T, PolicyError<E>>
    where
        Fut: Future<Output = Result<T, PolicyError<E>>>,
        Op: FnOnce(CancellationToken) -> Fut,
    {
        match self.acquire(cancel).await {
            Admission::Granted => {}
            Admission::Rejected => {
                tracing::debug!(
                    max_concurrency = self.max_concurrency,
                    max_queue_size = self.max_queue_size,
                    "bulkhead rejected request"
                );
                if let Some(callback) = &self.on_rejected {
                    callback();
                }
                return Err(PolicyError::BulkheadRejected {
                    max_concurrency: self.max_concurrency,
                    max_queue_size: self.max_queue_size,
                });
            }
            Admission::Cancelled => return Err(PolicyError::Cancelled),
        }

        let _slot = SlotGuard(self);
        operation(cancel.clone()).await
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Admission {
        let (id, rx) = {
            let mut tracker = self.tracker.lock();
            if tracker.current_concurrency < self.max_concurrency {
                tracker.current_concurrency += 1;
                return Admission::Granted;
            }
            if tracker.waiters.len() >= self.max_queue_size {
                return Admission::Rejected;
            }
            let (tx, rx) = oneshot::channel();
            let id = tracker.next_waiter_id;
            tracker.next_waiter_id += 1;
            tracker.waiters.push_back((id, tx));
            tracing::debug!(queued = tracker.waiters.len(), "bulkhead caller queued");
            (id, rx)
        };

        let mut rx = rx;
        // Cancellation takes precedence over a grant that lands on the
        // same poll; the rescue path below returns the abandoned slot.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let was_queued = {
                    let mut tracker = self.tracker.lock();
                    let before = tracker.waiters.len();
                    tracker.waiters.retain(|(waiter_id, _)| *waiter_id != id);
                    tracker.waiters.len() != before
                };
                if !was_queued {
                    // Lost the race: release() already dequeued us. If the
                    // grant landed, hand the slot to the next waiter.
                    if rx.try_recv().is_ok() {
                        self.release();
                    }
                }
                Admission::Cancelled
            }
            result = &mut rx => match result {
                // `release` granted us the slot before completing the send.
                Ok(()) => Admission::Granted,
                // Sender dropped without a grant; tracker was torn down.
                Err(_) => Admission::Rejected,
            },
        }
    }

    fn release(&self) {
        let mut tracker = self.tracker.lock();
        tracker.current_concurrency -= 1;
        while let Some((_, tx)) = tracker.waiters.pop_front() {
            // A dead sender means the waiter cancelled; skip to the next.
            if tx.send(()).is_ok() {
                tracker.current_concurrency += 1;
                return;
            }
        }
    }
}

/// Returns the held slot when the operation finishes or is dropped.
struct SlotGuard<'a>(&'a BulkheadPolicy);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
