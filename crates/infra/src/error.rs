//! Infrastructure error model.

use std::time::Duration;

use thiserror::Error;

/// Failure of a ledger or aggregate store operation.
///
/// Duplicate-key conflicts on the ledger are **not** errors; they surface as
/// identifiers missing from `mark_processed`'s result.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    #[error("lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the same call may succeed (connectivity, timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Unavailable(_))
    }
}

/// Map a sqlx error to `StoreError`, classifying transient failures.
///
/// | SQLx error | SQLSTATE | StoreError |
/// |------------|----------|------------|
/// | Database | `08xxx` connection exception | `Unavailable` |
/// | Database | `40001` serialization, `40P01` deadlock | `Unavailable` |
/// | Database | `57P01`..`57P03` shutdown / cannot connect | `Unavailable` |
/// | Database | other | `Database` |
/// | PoolTimedOut | | `Timeout` |
/// | Io, PoolClosed | | `Unavailable` |
/// | ColumnDecode, Decode | | `Corrupt` |
pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some(code) if code.starts_with("08") => StoreError::Unavailable(msg),
                Some("40001") | Some("40P01") => StoreError::Unavailable(msg),
                Some("57P01") | Some("57P02") | Some("57P03") => StoreError::Unavailable(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout {
            operation,
            after: Duration::ZERO,
        },
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{operation}: connection pool closed"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("{operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}
