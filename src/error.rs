//! Crate-wide error taxonomy.
//!
//! Every leaf module defines its own `thiserror` enum; this module composes
//! them into the coarse categories a caller actually needs to branch on:
//! malformed input, missing data, a transient condition worth retrying, a
//! protocol violation from a remote peer, or a fatal local condition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Kv(#[from] redb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Kv(e.into())
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Kv(e.into())
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Kv(e.into())
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Kv(e.into())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Fatal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
