//! Error taxonomy shared across every public operation in this crate.
//!
//! Internal helpers are free to use `anyhow::Result` and convert at a
//! module boundary; anything a caller needs to branch on (retry vs. give
//! up, 404 vs. 409) comes back as a [`MerrymakerError`] with an explicit
//! [`ErrorKind`].

use std::fmt;

/// Coarse classification of a failure, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-side bad input. Never retried.
    Validation,
    /// The referenced row does not exist.
    NotFound,
    /// A unique-violation or duplicate state transition.
    Conflict,
    /// An operation's precondition was not met (e.g. heartbeat on a lease
    /// the caller no longer owns).
    Precondition,
    /// Temporary I/O or lock contention; safe for the caller to retry.
    Transient,
    /// Unexpected internal state or a storage-layer bug.
    Internal,
    /// The operation observed a cancelled context.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The error type returned by every public async operation in this crate.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct MerrymakerError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl MerrymakerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn transient(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::with_source(ErrorKind::Transient, message, source)
    }

    pub fn internal(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::with_source(ErrorKind::Internal, message, source)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<sqlx::Error> for MerrymakerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => MerrymakerError::not_found("row not found"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                MerrymakerError::conflict(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                MerrymakerError::transient("database unavailable", anyhow::Error::new(err))
            }
            _ => MerrymakerError::internal("database error", anyhow::Error::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, MerrymakerError>;
