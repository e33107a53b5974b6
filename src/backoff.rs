//! Deterministic backoff strategies for retry policies.
//!
//! Every strategy is a pure function of the 1-based attempt number.
//! There is no built-in jitter; randomized delays can be supplied
//! through [`Backoff::custom`].

use std::sync::Arc;
use std::time::Duration;

/// Backoff strategy mapping an attempt number to a sleep duration.
#[derive(Clone)]
pub enum Backoff {
    /// No delay between attempts.
    None,
    /// Fixed delay between attempts.
    Constant { delay: Duration },
    /// `initial + (attempt - 1) * increment`.
    Linear { initial: Duration, increment: Duration },
    /// `initial * multiplier^(attempt - 1)`, optionally capped.
    Exponential { initial: Duration, multiplier: f64, max: Option<Duration> },
    /// Caller-supplied delay function (1-based attempt).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Self::Linear { initial, increment } => f
                .debug_struct("Linear")
                .field("initial", initial)
                .field("increment", increment)
                .finish(),
            Self::Exponential { initial, multiplier, max } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Fixed delay between attempts.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant { delay }
    }

    /// Linearly increasing delay: `initial`, `initial + increment`, ….
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear { initial, increment }
    }

    /// Exponentially increasing delay with multiplier 2.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential { initial, multiplier: 2.0, max: None }
    }

    /// Exponentially increasing delay with an explicit multiplier,
    /// capped at `max`.
    pub fn exponential_with(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::Exponential { initial, multiplier, max: Some(max) }
    }

    /// Caller-supplied delay function of the 1-based attempt number.
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Delay before the attempt *after* `attempt` (1-based), saturating
    /// instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::None => Duration::ZERO,
            Self::Constant { delay } => *delay,
            Self::Linear { initial, increment } => increment
                .checked_mul(attempt - 1)
                .and_then(|extra| initial.checked_add(extra))
                .unwrap_or(Duration::MAX),
            Self::Exponential { initial, multiplier, max } => {
                let factor = multiplier.powi(attempt as i32 - 1);
                let scaled = Duration::try_from_secs_f64(initial.as_secs_f64() * factor)
                    .unwrap_or(Duration::MAX);
                match max {
                    Some(cap) => scaled.min(*cap),
                    None => scaled,
                }
            }
            Self::Custom(f) => f(attempt),
        }
    }
}
