//! Error taxonomy shared by every paramgrid crate.
//!
//! Each crate keeps its own `thiserror` enum; `kind()` on those enums maps
//! onto this classification so callers can branch without matching on
//! crate-specific variants.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    VersionExists,
    SchemaInvalid,
    /// Backend I/O failure.
    Storage,
    /// Serialization or deserialization failure.
    Marshal,
    /// A write lost a compare-and-swap race or violated a state transition.
    Conflict,
    Cancelled,
    /// Catch-all for collaborator failures.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::VersionExists => "version_exists",
            ErrorKind::SchemaInvalid => "schema_invalid",
            ErrorKind::Storage => "storage",
            ErrorKind::Marshal => "marshal",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
