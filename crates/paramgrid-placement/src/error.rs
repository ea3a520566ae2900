//! Placement and service error types.

use thiserror::Error;

use paramgrid_core::ErrorKind;
use paramgrid_state::StateError;

/// Errors surfaced by the placement engine and the config service.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("permission denied: {0}")]
    Unauthorized(String),

    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),

    #[error("placement cancelled")]
    Cancelled,

    #[error("node query failed: {0}")]
    NodeQuery(#[source] anyhow::Error),

    #[error("encode: {0}")]
    Marshal(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl PlacementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlacementError::Unauthorized(_) => ErrorKind::Unauthorized,
            PlacementError::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            PlacementError::Cancelled => ErrorKind::Cancelled,
            PlacementError::NodeQuery(_) => ErrorKind::Internal,
            PlacementError::Marshal(_) => ErrorKind::Marshal,
            PlacementError::State(e) => e.kind(),
        }
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
