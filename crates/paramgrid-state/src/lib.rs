//! paramgrid-state: revisioned persistence for configurations and
//! placement tasks.
//!
//! Backed by [redb](https://docs.rs/redb). The [`RevisionedKv`] layer keeps a
//! store-wide revision counter plus per-key create/mod revisions and a
//! version count, and records every write in a history table so that
//! point-in-time reads and per-key history walks are possible.
//!
//! # Architecture
//!
//! Records are JSON documents stored in redb's `&[u8]` value columns.
//! Composite keys (`{kind}/{org}/{name}/{version}`) keep every record of an
//! organization contiguous so prefix scans can list them.
//!
//! [`ConfigStore`] and [`PlacementStore`] are `Clone` + `Send` + `Sync`
//! (backed by `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod keys;
pub mod kv;
pub mod placements;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use kv::{KvEntry, RevisionedKv};
pub use placements::{PlacementRecord, PlacementStore};
pub use store::{ConfigStore, StoredConfig};
