//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, invariants).
/// Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. blank).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// Why a single record was dropped from a batch before summarization.
///
/// Rejections are reported per record; they never fail the whole batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordRejection {
    #[error("record has no identifier")]
    MissingAid,

    #[error("horsepower must be a finite, non-negative number (got {0})")]
    InvalidHorsepower(f64),
}

impl RecordRejection {
    /// Stable machine-readable code for reporting.
    pub fn code(&self) -> &'static str {
        match self {
            RecordRejection::MissingAid => "missing_aid",
            RecordRejection::InvalidHorsepower(_) => "invalid_horsepower",
        }
    }
}
