//! Error taxonomy shared across the engine and the HTTP surface.

use thiserror::Error;

/// Client- and operator-visible failures of the signal engine.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Malformed request: empty methods, inconsistent time config, bad enums.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Invalid filter specification: bad date range, unknown filter column.
    #[error("bad filter: {0}")]
    BadFilter(String),

    /// Group mutation would violate a registry invariant.
    #[error("group conflict: {0}")]
    GroupConflict(String),

    /// Requested entity group does not exist.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// Request deadline exceeded.
    #[error("request deadline exceeded")]
    Timeout,

    /// Event store unreachable or failing; callers may retry with backoff.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Stable machine-readable code carried in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SignalError::BadRequest(_) => "bad_request",
            SignalError::BadFilter(_) => "bad_filter",
            SignalError::GroupConflict(_) => "group_conflict",
            SignalError::GroupNotFound(_) => "group_not_found",
            SignalError::Timeout => "timeout",
            SignalError::StoreUnavailable(_) => "store_unavailable",
            SignalError::Internal(_) => "internal",
        }
    }

    /// Whether a retry with backoff is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignalError::StoreUnavailable(_))
    }
}

/// Result alias used throughout the engine.
pub type SignalResult<T> = Result<T, SignalError>;
