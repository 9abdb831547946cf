//! Engine error types.
//!
//! Every engine operation returns [`Result`]; the error kinds map one-to-one
//! onto the failure modes callers can act on. The CLI layer wraps these in
//! `anyhow` at the boundary.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the memory engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Id absent or tombstoned. The operation did not mutate anything.
    #[error("not found: {0}")]
    NotFound(String),

    /// Field constraint violation, rejected before any write.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Filename or lock collision that retries could not resolve.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cancellation signal observed before the operation committed.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed line encountered on read; never fatal, reported via stats.
    #[error("corrupt line at byte offset {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },

    /// Opaque embedder or vault scan failure; callers degrade gracefully.
    #[error("external failure: {0}")]
    External(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Invalid(format!("json: {e}"))
    }
}

impl Error {
    /// `true` if retrying the same operation could succeed (transient kinds).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Conflict(_) | Error::External(_))
    }
}
