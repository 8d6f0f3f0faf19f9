//! Error types for the admission and caching pipeline
use std::fmt;
use std::time::Duration;

/// Outcome of a request the gateway could not serve.
///
/// `RateLimited` and `Blocked` are expected, user-visible outcomes that carry a wait hint.
/// `BackendUnavailable` is never cached and never counts against the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The client exceeded its rate ceiling for the current window
    RateLimited { retry_after: Duration, limit: u64 },
    /// The client is in a cool-down after repeated abuse flags
    Blocked { remaining: Duration },
    /// The documentation backend failed or timed out
    BackendUnavailable { reason: String },
    /// The shared store could not complete an operation that cannot degrade
    InternalStore { message: String },
    /// Administrative operation attempted without a premium identity
    Forbidden { operation: &'static str },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_after, limit } => {
                write!(f, "rate limit of {} exceeded; retry after {:?}", limit, retry_after)
            }
            Self::Blocked { remaining } => {
                write!(f, "client blocked; cool-down ends in {:?}", remaining)
            }
            Self::BackendUnavailable { reason } => write!(f, "backend unavailable: {}", reason),
            Self::InternalStore { message } => write!(f, "shared store error: {}", message),
            Self::Forbidden { operation } => {
                write!(f, "operation '{}' requires a premium identity", operation)
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Check if this error is a rate-limit rejection
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
    /// Check if this error is an abuse block
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
    /// Check if this error came from the documentation backend
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
    /// Check if this error is an admin authorization failure
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
    /// How long the caller should wait before trying again, if the error carries a hint.
    ///
    /// Useful for `Retry-After` headers.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            Self::Blocked { remaining } => Some(*remaining),
            _ => None,
        }
    }
}

/// Failure reported by a [`SharedStore`](crate::store::SharedStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or refused the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The key holds a value that is not an integer counter.
    #[error("key '{key}' does not hold an integer")]
    NotAnInteger { key: String },
    /// A stored record could not be encoded or decoded.
    #[error("record for '{key}' is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::InternalStore { message: err.to_string() }
    }
}
