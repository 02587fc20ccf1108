use thiserror::Error;
use ulid::Ulid;

/// Every way a booking operation can fail. Returned, never panicked.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or policy-violating input: bad range order, past start,
    /// cutoff violation, nothing bookable for the range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced entity is absent or in the wrong state for the operation.
    #[error("not found: {0}")]
    NotFound(Ulid),

    /// An accepted reservation already holds (part of) the requested range.
    #[error("overlaps accepted reservation: {0}")]
    AlreadyExists(Ulid),

    /// Availability windows would overlap, or an edit would disturb an
    /// accepted reservation.
    #[error("conflict with: {0}")]
    Conflict(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The caller's deadline passed before the accommodation could be locked.
    /// Nothing was written.
    #[error("timed out waiting for accommodation lock")]
    Timeout,

    /// Journal failure. Nothing was applied; safe to retry.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Timeout => "timeout",
            EngineError::Internal(_) => "internal",
        }
    }
}
