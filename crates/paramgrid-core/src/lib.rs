pub mod config;
pub mod error;
pub mod selector;
pub mod types;

pub use config::ControlPlaneConfig;
pub use error::ErrorKind;
pub use selector::{Selector, SelectorError, SelectorOp};
pub use types::*;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
