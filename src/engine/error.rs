use ulid::Ulid;

use crate::model::{Ms, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Empty or inverted window or booking interval.
    InvalidRange(Span),
    /// Non-positive slot duration, or one that does not divide the window.
    InvalidDuration(Ms),
    NotFound(Ulid),
    /// A booking was handed to the wrong resource's classifier.
    ResourceMismatch {
        expected: Ulid,
        found: Ulid,
        booking: Ulid,
    },
    Cancelled,
    LimitExceeded(&'static str),
    /// The booking source or resource catalog failed.
    Source(String),
    Internal(String),
}

impl EngineError {
    /// Validation and cancellation errors are returned to the caller for a
    /// corrected retry; the rest abort the request as server faults.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineError::ResourceMismatch { .. } | EngineError::Internal(_) | EngineError::Source(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange(span) => {
                write!(f, "invalid range: [{}, {}) is empty", span.start, span.end)
            }
            EngineError::InvalidDuration(d) => {
                write!(f, "invalid slot duration: {d}ms must be positive and divide the window")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::ResourceMismatch {
                expected,
                found,
                booking,
            } => write!(
                f,
                "booking {booking} belongs to resource {found}, not {expected}"
            ),
            EngineError::Cancelled => write!(f, "query cancelled"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Source(e) => write!(f, "booking source error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
