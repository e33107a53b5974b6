//! Error types for resilience policies

use std::fmt;
use std::time::Duration;

/// Unified error type returned by every resilience policy.
///
/// The library-emitted variants (`Timeout`, `CircuitOpen`,
/// `BulkheadRejected`, `Internal`) carry enough context to decide
/// recovery; the underlying operation's error passes through as `Inner`.
/// `Cancelled` is not a failure of the operation: it records that the
/// caller's cancellation token fired, and every layer propagates it
/// verbatim without converting it to a timeout or counting it against a
/// circuit breaker.
#[derive(Debug)]
pub enum PolicyError<E> {
    /// The operation exceeded a timeout budget.
    Timeout {
        /// Configured budget of the layer that fired.
        timeout: Duration,
        /// Wall-clock time measured by that layer.
        elapsed: Duration,
    },
    /// Short-circuited by an open circuit breaker.
    CircuitOpen {
        /// Remaining time until the breaker will probe again, when positive.
        retry_after: Option<Duration>,
    },
    /// Rejected by a bulkhead whose slots and wait queue were full.
    BulkheadRejected { max_concurrency: usize, max_queue_size: usize },
    /// A bridged plain-value operation panicked.
    Internal {
        /// Rendering of the panic payload.
        message: String,
        /// Type name of the panic payload.
        payload_type: &'static str,
    },
    /// The caller-supplied cancellation token fired.
    Cancelled,
    /// The underlying operation failed.
    Inner(E),
}

impl<E: Clone> Clone for PolicyError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Timeout { timeout, elapsed } => {
                Self::Timeout { timeout: *timeout, elapsed: *elapsed }
            }
            Self::CircuitOpen { retry_after } => Self::CircuitOpen { retry_after: *retry_after },
            Self::BulkheadRejected { max_concurrency, max_queue_size } => Self::BulkheadRejected {
                max_concurrency: *max_concurrency,
                max_queue_size: *max_queue_size,
            },
            Self::Internal { message, payload_type } => {
                Self::Internal { message: message.clone(), payload_type }
            }
            Self::Cancelled => Self::Cancelled,
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: PartialEq> PartialEq for PolicyError<E> {
    fn eq(&self, other: &Self) -> bool {
        use PolicyError::*;
        match (self, other) {
            (Timeout { timeout: t1, elapsed: e1 }, Timeout { timeout: t2, elapsed: e2 }) => {
                t1 == t2 && e1 == e2
            }
            (CircuitOpen { retry_after: r1 }, CircuitOpen { retry_after: r2 }) => r1 == r2,
            (
                BulkheadRejected { max_concurrency: c1, max_queue_size: q1 },
                BulkheadRejected { max_concurrency: c2, max_queue_size: q2 },
            ) => c1 == c2 && q1 == q2,
            (
                Internal { message: m1, payload_type: p1 },
                Internal { message: m2, payload_type: p2 },
            ) => m1 == m2 && p1 == p2,
            (Cancelled, Cancelled) => true,
            (Inner(e1), Inner(e2)) => e1 == e2,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for PolicyError<E> {}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timeout, elapsed } => {
                write!(f, "operation timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::CircuitOpen { retry_after: Some(after) } => {
                write!(f, "circuit breaker open (retry after {:?})", after)
            }
            Self::CircuitOpen { retry_after: None } => write!(f, "circuit breaker open"),
            Self::BulkheadRejected { max_concurrency, max_queue_size } => write!(
                f,
                "bulkhead rejected request (max concurrency {}, max queue {})",
                max_concurrency, max_queue_size
            ),
            Self::Internal { message, payload_type } => {
                write!(f, "operation panicked with {}: {}", payload_type, message)
            }
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> PolicyError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead_rejected(&self) -> bool {
        matches!(self, Self::BulkheadRejected { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the underlying error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Extract the underlying error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Map the underlying error type, leaving library-emitted variants
    /// untouched.
    pub fn map_inner<F, U>(self, f: F) -> PolicyError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::Inner(e) => PolicyError::Inner(f(e)),
            Self::Timeout { timeout, elapsed } => PolicyError::Timeout { timeout, elapsed },
            Self::CircuitOpen { retry_after } => PolicyError::CircuitOpen { retry_after },
            Self::BulkheadRejected { max_concurrency, max_queue_size } => {
                PolicyError::BulkheadRejected { max_concurrency, max_queue_size }
            }
            Self::Internal { message, payload_type } => {
                PolicyError::Internal { message, payload_type }
            }
            Self::Cancelled => PolicyError::Cancelled,
        }
    }
}

/// Errors returned when constructing a policy from out-of-range
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_attempts must be >= 1 (got {0})")]
    InvalidMaxAttempts(u32),
    #[error("timeout duration must be > 0")]
    ZeroTimeout,
    #[error("failure_threshold must be >= 1 (got {0})")]
    InvalidFailureThreshold(u32),
    #[error("reset_timeout must be > 0")]
    ZeroResetTimeout,
    #[error("max_concurrency must be >= 1 (got {0})")]
    InvalidMaxConcurrency(usize),
    #[error("max_size must be >= 1 (got {0})")]
    InvalidMaxSize(usize),
}
