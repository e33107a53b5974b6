#![forbid(unsafe_code)]

//! # railguard
//!
//! Functional outcomes and resilience for async Rust: accumulating
//! validation, reusable pipelines, memoization with herd suppression,
//! and composable resilience policies (retry, timeout, circuit breaker,
//! bulkhead).
//!
//! ## Features
//!
//! - **Outcome algebra**: combinators over `Option`/`Result`
//!   (`sequence`, `traverse`, joins, async sequencing) and an
//!   accumulating [`Validation`] type
//! - **Pipelines**: fail-fast result pipelines and fan-out validation
//!   pipelines with concurrent async steps
//! - **Memoization**: unbounded, TTL+LRU, two-tier (L1/L2), and
//!   result-aware caching that never stores failures
//! - **Resilience policies** with deterministic backoff and
//!   cancellation-aware composition via [`ResilienceStack`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use railguard::{
//!     Backoff, CancellationToken, PolicyError, ResilienceStack, RetryPolicy, TimeoutPolicy,
//! };
//!
//! async fn flaky(attempts: Arc<AtomicUsize>) -> Result<(), PolicyError<std::io::Error>> {
//!     if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
//!         Err(PolicyError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PolicyError<std::io::Error>> {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .expect("valid attempt count")
//!         .backoff(Backoff::exponential(Duration::from_millis(200)))
//!         .build()
//!         .expect("valid retry policy");
//!
//!     // Composition order is fixed: bulkhead → circuit breaker →
//!     // per-attempt timeout → retry → overall timeout.
//!     let stack: ResilienceStack<std::io::Error> = ResilienceStack::builder()
//!         .retry(retry)
//!         .overall_timeout(TimeoutPolicy::new(Duration::from_secs(5)).expect("valid timeout"))
//!         .build();
//!
//!     let attempts_op = attempts.clone();
//!     stack
//!         .execute(
//!             move |_cancel: CancellationToken| flaky(attempts_op.clone()),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod bulkhead;
mod circuit_breaker;
mod clock;
mod error;
mod fault;
mod pipeline;
mod retry;
mod sleeper;
mod stack;
mod timeout;

pub mod cache;
pub mod memo;
pub mod option;
pub mod result;
pub mod validation;
pub mod validation_pipeline;

// Re-exports
pub use backoff::Backoff;
pub use bulkhead::BulkheadPolicy;
pub use cache::{CacheProvider, InMemoryProvider, MemoCache, MemoizeOptions};
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigError, PolicyError};
pub use fault::Fault;
pub use memo::{memoize, memoize2, memoize_async, memoize_result, memoize_with, memoize_with_async};
pub use option::OptionExt;
pub use pipeline::{AsyncPipeline, Pipeline};
pub use result::ResultExt;
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::TimeoutPolicy;
pub use validation::Validation;
pub use validation_pipeline::{validate, validate_async};

/// Cancellation handle threaded through every policy layer.
pub use tokio_util::sync::CancellationToken;

/// Left/right sum used by the `to_either` conversions.
pub use either::Either;

pub mod prelude;
