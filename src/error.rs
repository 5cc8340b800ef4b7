//! Error types for the store, the playlist, and configuration handling.

use std::path::PathBuf;

use crate::store_engine::Statement;

/// Failures reported by the store engine.
///
/// Every variant carries the backend error text so callers can log it
/// verbatim.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store `{name}`: {message}")]
    Open { name: String, message: String },

    #[error("failed to prepare {statement}: {message}")]
    StatementPrepare { statement: Statement, message: String },

    #[error("failed to execute {statement}: {message}")]
    StatementExecute { statement: Statement, message: String },

    #[error("failed to begin transaction: {0}")]
    TransactionBegin(String),

    #[error("failed to commit transaction: {0}")]
    TransactionCommit(String),

    /// A uniqueness constraint rejected the row; the natural key already exists.
    #[error("constraint violation in {statement}: {message}")]
    ConstraintViolation { statement: Statement, message: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn from_execute(statement: Statement, err: rusqlite::Error) -> Self {
        if matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        ) {
            Self::ConstraintViolation {
                statement,
                message: err.to_string(),
            }
        } else {
            Self::StatementExecute {
                statement,
                message: err.to_string(),
            }
        }
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

/// Rejected playlist mutations. No notification is emitted for these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaylistError {
    #[error("range {first}..={last} is invalid for a playlist of {len} entries")]
    InvalidRange {
        first: usize,
        last: usize,
        len: usize,
    },

    #[error("cannot move {first}..={last} to {destination}")]
    InvalidMove {
        first: usize,
        last: usize,
        destination: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to edit config document: {0}")]
    Document(#[from] toml_edit::TomlError),
}
