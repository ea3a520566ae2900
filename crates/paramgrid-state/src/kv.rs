//! RevisionedKv: redb-backed key-value store with etcd-style revisions.
//!
//! Every successful write transaction bumps a single global revision. Each
//! live key remembers the revision that created it, the revision of its last
//! write and how many writes it has seen since creation. All writes are
//! appended to a history table keyed by `(key, revision)`, which is what
//! point-in-time reads and history walks are served from.
//!
//! redb allows one write transaction at a time, so the existence check of a
//! conditional create and the insert that follows it are atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A live key with its revision metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: String,
    pub value: Value,
    /// Revision of the write that created this incarnation of the key.
    pub create_revision: u64,
    /// Revision of the latest write to the key.
    pub mod_revision: u64,
    /// Number of writes since creation, starting at 1.
    pub version: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    create_revision: u64,
    mod_revision: u64,
    version: u64,
    value: Value,
}

/// One row of the history table. `value` is `None` for a deletion.
#[derive(Serialize, Deserialize)]
struct HistoryRecord {
    create_revision: u64,
    version: u64,
    value: Option<Value>,
}

impl StoredEntry {
    fn into_entry(self, key: &str) -> KvEntry {
        KvEntry {
            key: key.to_string(),
            value: self.value,
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
            version: self.version,
        }
    }
}

fn decode_entry(key: &str, bytes: &[u8]) -> StateResult<KvEntry> {
    let stored: StoredEntry = serde_json::from_slice(bytes).map_err(map_err!(Deserialize))?;
    Ok(stored.into_entry(key))
}

/// Tables opened inside a single write transaction.
struct WriteTables<'txn> {
    kv: Table<'txn, &'static str, &'static [u8]>,
    history: Table<'txn, (&'static str, u64), &'static [u8]>,
    meta: Table<'txn, &'static str, u64>,
}

impl WriteTables<'_> {
    fn next_revision(&mut self) -> StateResult<u64> {
        let current = self
            .meta
            .get(REVISION_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        self.meta
            .insert(REVISION_KEY, next)
            .map_err(map_err!(Write))?;
        Ok(next)
    }

    fn load(&self, key: &str) -> StateResult<Option<StoredEntry>> {
        match self.kv.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let stored: StoredEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    fn append_history(&mut self, key: &str, revision: u64, record: &HistoryRecord) -> StateResult<()> {
        let bytes = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        self.history
            .insert((key, revision), bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Write `value` as the next version of `key`, continuing `previous` if given.
    fn write(&mut self, key: &str, value: Value, previous: Option<&StoredEntry>) -> StateResult<KvEntry> {
        let revision = self.next_revision()?;
        let stored = StoredEntry {
            create_revision: previous.map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: previous.map_or(1, |p| p.version + 1),
            value,
        };
        let bytes = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        self.kv
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        self.append_history(
            key,
            revision,
            &HistoryRecord {
                create_revision: stored.create_revision,
                version: stored.version,
                value: Some(stored.value.clone()),
            },
        )?;
        Ok(stored.into_entry(key))
    }
}

/// Thread-safe revisioned key-value store backed by redb.
#[derive(Clone)]
pub struct RevisionedKv {
    db: Arc<Database>,
}

impl RevisionedKv {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let kv = Self { db: Arc::new(db) };
        kv.ensure_tables()?;
        debug!(?path, "revisioned kv opened");
        Ok(kv)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let kv = Self { db: Arc::new(db) };
        kv.ensure_tables()?;
        debug!("in-memory revisioned kv opened");
        Ok(kv)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.open_table(KV_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `op` inside one write transaction, committing only if it succeeds.
    fn transact<T>(&self, op: impl FnOnce(&mut WriteTables<'_>) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = {
            let mut tables = WriteTables {
                kv: txn.open_table(KV).map_err(map_err!(Table))?,
                history: txn.open_table(KV_HISTORY).map_err(map_err!(Table))?,
                meta: txn.open_table(META).map_err(map_err!(Table))?,
            };
            op(&mut tables)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(result)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create `key` only if it has no value. Fails with `VersionExists` otherwise.
    pub fn create(&self, key: &str, value: Value) -> StateResult<KvEntry> {
        let entry = self.transact(|tables| {
            if tables.load(key)?.is_some() {
                return Err(StateError::VersionExists(key.to_string()));
            }
            tables.write(key, value, None)
        })?;
        debug!(%key, revision = entry.mod_revision, "key created");
        Ok(entry)
    }

    /// Write `key` unconditionally.
    pub fn put(&self, key: &str, value: Value) -> StateResult<KvEntry> {
        let entry = self.transact(|tables| {
            let previous = tables.load(key)?;
            tables.write(key, value, previous.as_ref())
        })?;
        debug!(%key, revision = entry.mod_revision, version = entry.version, "key written");
        Ok(entry)
    }

    /// Write `key` only if its latest write is still `expected_mod_revision`.
    pub fn compare_and_swap(
        &self,
        key: &str,
        expected_mod_revision: u64,
        value: Value,
    ) -> StateResult<KvEntry> {
        let entry = self.transact(|tables| {
            let previous = tables
                .load(key)?
                .ok_or_else(|| StateError::NotFound(key.to_string()))?;
            if previous.mod_revision != expected_mod_revision {
                return Err(StateError::Conflict(format!(
                    "{key}: expected revision {expected_mod_revision}, found {}",
                    previous.mod_revision
                )));
            }
            tables.write(key, value, Some(&previous))
        })?;
        debug!(%key, revision = entry.mod_revision, "key swapped");
        Ok(entry)
    }

    /// Delete `key`, returning its last value if it existed.
    pub fn delete(&self, key: &str) -> StateResult<Option<KvEntry>> {
        let removed = self.transact(|tables| {
            let Some(previous) = tables.load(key)? else {
                return Ok(None);
            };
            tables.kv.remove(key).map_err(map_err!(Write))?;
            let revision = tables.next_revision()?;
            tables.append_history(
                key,
                revision,
                &HistoryRecord {
                    create_revision: previous.create_revision,
                    version: previous.version,
                    value: None,
                },
            )?;
            Ok(Some(previous.into_entry(key)))
        })?;
        debug!(%key, existed = removed.is_some(), "key deleted");
        Ok(removed)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> StateResult<Option<KvEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode_entry(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Read `key` as it was at global `revision`.
    pub fn get_at(&self, key: &str, revision: u64) -> StateResult<Option<KvEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV_HISTORY).map_err(map_err!(Table))?;
        let mut range = table
            .range((key, 0u64)..=(key, revision))
            .map_err(map_err!(Read))?;
        let Some(item) = range.next_back() else {
            return Ok(None);
        };
        let (row_key, bytes) = item.map_err(map_err!(Read))?;
        let mod_revision = row_key.value().1;
        let record: HistoryRecord =
            serde_json::from_slice(bytes.value()).map_err(map_err!(Deserialize))?;
        Ok(record.value.map(|value| KvEntry {
            key: key.to_string(),
            value,
            create_revision: record.create_revision,
            mod_revision,
            version: record.version,
        }))
    }

    /// All live keys starting with `prefix`, in key order. Rows that fail to
    /// decode are skipped.
    pub fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<KvEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            match decode_entry(key, value.value()) {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(%key, error = %e, "skipping undecodable entry"),
            }
        }
        Ok(results)
    }

    /// Snapshots of the current incarnation of `key`, newest first, at most
    /// `limit` of them. Every write is its own snapshot; tombstones and
    /// records that fail to decode are skipped.
    pub fn history(&self, key: &str, limit: usize) -> StateResult<Vec<KvEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let current = {
            let table = txn.open_table(KV).map_err(map_err!(Table))?;
            match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => decode_entry(key, guard.value())?,
                None => return Ok(Vec::new()),
            }
        };

        let table = txn.open_table(KV_HISTORY).map_err(map_err!(Table))?;
        let range = table
            .range((key, current.create_revision)..=(key, current.mod_revision))
            .map_err(map_err!(Read))?;

        let mut snapshots: Vec<KvEntry> = Vec::new();
        for item in range.rev() {
            if snapshots.len() >= limit {
                break;
            }
            let (row_key, bytes) = match item {
                Ok(row) => row,
                Err(e) => {
                    warn!(%key, error = %e, "skipping unreadable history record");
                    continue;
                }
            };
            let revision = row_key.value().1;
            let record: HistoryRecord = match serde_json::from_slice(bytes.value()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(%key, revision, error = %e, "skipping undecodable history record");
                    continue;
                }
            };
            let Some(value) = record.value else {
                continue;
            };
            snapshots.push(KvEntry {
                key: key.to_string(),
                value,
                create_revision: record.create_revision,
                mod_revision: revision,
                version: record.version,
            });
        }
        Ok(snapshots)
    }

    /// Latest global revision (0 for an empty store).
    pub fn current_revision(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(META).map_err(map_err!(Table))?;
        Ok(table
            .get(REVISION_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }
}
