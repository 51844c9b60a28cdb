//! Shared error type across meterkit crates.

use thiserror::Error;

use crate::kind::MetricKind;

/// Stable error classification, independent of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed name, label set, bucket layout, objective or exemplar.
    InvalidArgument,
    /// Registration clashes with something already registered.
    Conflict,
    /// Operation not allowed in the current registry state.
    InvalidState,
    /// A before-collect callback aborted the collection pass.
    ScrapeFailed,
    /// Configuration could not be read or validated.
    Config,
    /// Internal invariant violated.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and by serializer collaborators.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::ScrapeFailed => "SCRAPE_FAILED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Unified error type used by core and registry.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),
    #[error("invalid label name: {0:?}")]
    InvalidLabelName(String),
    #[error("reserved label name: {0:?}")]
    ReservedLabelName(String),
    #[error("expected {expected} label values, got {actual}")]
    LabelCountMismatch { expected: usize, actual: usize },
    #[error("invalid buckets: {0}")]
    InvalidBuckets(String),
    #[error("invalid objective: {0}")]
    InvalidObjective(String),
    #[error("counter cannot be incremented by a negative value: {0}")]
    NegativeIncrement(f64),
    #[error("invalid exemplar: {0}")]
    InvalidExemplar(String),
    #[error("label name collision: {0:?}")]
    LabelCollision(String),
    #[error("metric {name:?} is already registered as {existing}, cannot register as {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("scrape failed: {0}")]
    ScrapeFailed(String),
    #[error("config: {0}")]
    Config(String),
    #[error("managed lifetime requires a running tokio runtime")]
    NoRuntime,
    #[error("internal: {0}")]
    Internal(String),
}

impl MeterError {
    /// Map an error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeterError::InvalidMetricName(_)
            | MeterError::InvalidLabelName(_)
            | MeterError::ReservedLabelName(_)
            | MeterError::LabelCountMismatch { .. }
            | MeterError::InvalidBuckets(_)
            | MeterError::InvalidObjective(_)
            | MeterError::NegativeIncrement(_)
            | MeterError::InvalidExemplar(_) => ErrorCode::InvalidArgument,
            MeterError::LabelCollision(_) | MeterError::KindMismatch { .. } => ErrorCode::Conflict,
            MeterError::InvalidState(_) | MeterError::NoRuntime => ErrorCode::InvalidState,
            MeterError::ScrapeFailed(_) => ErrorCode::ScrapeFailed,
            MeterError::Config(_) => ErrorCode::Config,
            MeterError::Internal(_) => ErrorCode::Internal,
        }
    }
}
