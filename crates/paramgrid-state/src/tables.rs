//! redb table definitions for the revisioned key-value backend.
//!
//! Keys are `/`-separated strings (`{kind}/{org}/{name}/{version}`,
//! `placements/{kind}/{org}/{name}/{version}/{task_id}`) so that prefix
//! scans return every record under an organization or config identity.

use redb::TableDefinition;

/// Current value of every live key, JSON-encoded with its revision metadata.
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Every write ever made, keyed by `(key, revision)`. Deletions are recorded
/// as tombstones so point-in-time reads can see them.
pub const KV_HISTORY: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("kv_history");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the latest global revision.
pub const REVISION_KEY: &str = "revision";
