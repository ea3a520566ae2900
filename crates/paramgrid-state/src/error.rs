//! Error types for the paramgrid state store.

use paramgrid_core::ErrorKind;
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version already exists: {0}")]
    VersionExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Open(_)
            | StateError::Transaction(_)
            | StateError::Table(_)
            | StateError::Read(_)
            | StateError::Write(_) => ErrorKind::Storage,
            StateError::Serialize(_) | StateError::Deserialize(_) => ErrorKind::Marshal,
            StateError::NotFound(_) => ErrorKind::NotFound,
            StateError::VersionExists(_) => ErrorKind::VersionExists,
            StateError::Conflict(_) => ErrorKind::Conflict,
            StateError::InvalidConfig(_) => ErrorKind::SchemaInvalid,
        }
    }
}
