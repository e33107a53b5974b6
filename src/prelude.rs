//! Convenient re-exports for common railguard types.
pub use crate::{
    cache::{CacheProvider, InMemoryProvider, MemoCache, MemoizeOptions},
    memo::{memoize, memoize2, memoize_async, memoize_result, memoize_with, memoize_with_async},
    option::OptionExt,
    pipeline::{AsyncPipeline, Pipeline},
    result::ResultExt,
    validation::Validation,
    validation_pipeline::{validate, validate_async},
    Backoff, BulkheadPolicy, CancellationToken, CircuitBreakerPolicy, CircuitState, Clock,
    ConfigError, Fault, InstantSleeper, ManualClock, MonotonicClock, PolicyError, ResilienceStack,
    ResilienceStackBuilder, RetryPolicy, RetryPolicyBuilder, Sleeper, TimeoutPolicy, TokioSleeper,
    TrackingSleeper,
};
