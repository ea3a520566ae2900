//! ConfigStore: versioned persistence for standalone configs and groups.
//!
//! Each `(org, name, version)` is written exactly once per kind; there is no
//! overwrite path. Values are JSON documents in the [`RevisionedKv`]; the
//! revision on a returned config is always the backend's `mod_revision`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use paramgrid_core::{ConfigGroup, ConfigId, ConfigKind, NamedParamSet, StandaloneConfig};

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::kv::{KvEntry, RevisionedKv};

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A configuration type the store knows how to key, validate and revision.
pub trait StoredConfig: Serialize + DeserializeOwned {
    const KIND: ConfigKind;

    fn config_id(&self) -> ConfigId;

    fn set_revision(&mut self, revision: u64);

    fn set_created_at(&mut self, created_at: u64);

    /// Structural checks run before every write.
    fn validate(&self) -> StateResult<()> {
        keys::validate_id(&self.config_id())
    }
}

impl StoredConfig for StandaloneConfig {
    const KIND: ConfigKind = ConfigKind::Standalone;

    fn config_id(&self) -> ConfigId {
        self.id()
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn set_created_at(&mut self, created_at: u64) {
        self.created_at = created_at;
    }
}

impl StoredConfig for ConfigGroup {
    const KIND: ConfigKind = ConfigKind::Group;

    fn config_id(&self) -> ConfigId {
        self.id()
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn set_created_at(&mut self, created_at: u64) {
        self.created_at = created_at;
    }

    fn validate(&self) -> StateResult<()> {
        keys::validate_id(&self.config_id())?;
        match self.duplicate_param_set() {
            Some(name) => Err(StateError::InvalidConfig(format!(
                "param set name appears more than once in group {}: {name}",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

fn decode<C: StoredConfig>(entry: KvEntry) -> StateResult<C> {
    let mut config: C =
        serde_json::from_value(entry.value).map_err(|e| StateError::Deserialize(e.to_string()))?;
    config.set_revision(entry.mod_revision);
    Ok(config)
}

/// Validated key of an identity; a `/` in any segment would alias a
/// different identity.
fn key_for<C: StoredConfig>(id: &ConfigId) -> StateResult<String> {
    keys::validate_id(id)?;
    Ok(keys::config_key(C::KIND, id))
}

fn not_found(kind: ConfigKind, id: &ConfigId) -> StateError {
    StateError::NotFound(format!("{kind} config {id}"))
}

/// Versioned configuration store.
#[derive(Clone)]
pub struct ConfigStore {
    kv: RevisionedKv,
    history_limit: usize,
}

impl ConfigStore {
    pub fn new(kv: RevisionedKv) -> Self {
        Self {
            kv,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Bound the number of snapshots returned by [`ConfigStore::history`].
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Persist a new version. Fails with `VersionExists` if the identity
    /// already has a value. Returns the assigned revision.
    pub fn put<C: StoredConfig>(&self, config: &C) -> StateResult<u64> {
        config.validate()?;
        let id = config.config_id();
        let key = keys::config_key(C::KIND, &id);
        let value = serde_json::to_value(config).map_err(|e| StateError::Serialize(e.to_string()))?;
        let entry = self.kv.create(&key, value)?;
        debug!(kind = %C::KIND, %id, revision = entry.mod_revision, "config stored");
        Ok(entry.mod_revision)
    }

    pub fn get<C: StoredConfig>(&self, id: &ConfigId) -> StateResult<C> {
        let key = key_for::<C>(id)?;
        let entry = self.kv.get(&key)?.ok_or_else(|| not_found(C::KIND, id))?;
        decode(entry)
    }

    /// Read an identity as it was at a global revision.
    pub fn get_at<C: StoredConfig>(&self, id: &ConfigId, revision: u64) -> StateResult<C> {
        let key = key_for::<C>(id)?;
        let entry = self
            .kv
            .get_at(&key, revision)?
            .ok_or_else(|| StateError::NotFound(format!("{} config {id} at revision {revision}", C::KIND)))?;
        decode(entry)
    }

    /// Every current config of this kind in the organization. Records that
    /// fail to decode are skipped.
    pub fn list<C: StoredConfig>(&self, org: &str) -> StateResult<Vec<C>> {
        let prefix = keys::config_org_prefix(C::KIND, org)?;
        let mut results = Vec::new();
        for entry in self.kv.scan_prefix(&prefix)? {
            let key = entry.key.clone();
            match decode(entry) {
                Ok(config) => results.push(config),
                Err(e) => warn!(%key, error = %e, "skipping undecodable config"),
            }
        }
        Ok(results)
    }

    /// Remove an identity, returning the removed value.
    pub fn delete<C: StoredConfig>(&self, id: &ConfigId) -> StateResult<C> {
        let key = key_for::<C>(id)?;
        let entry = self.kv.delete(&key)?.ok_or_else(|| not_found(C::KIND, id))?;
        debug!(kind = %C::KIND, %id, "config deleted");
        decode(entry)
    }

    /// Snapshots of an identity, newest first. Snapshots that fail to decode
    /// are skipped.
    pub fn history<C: StoredConfig>(&self, id: &ConfigId) -> StateResult<Vec<C>> {
        let key = key_for::<C>(id)?;
        let entries = self.kv.history(&key, self.history_limit)?;
        if entries.is_empty() && self.kv.get(&key)?.is_none() {
            return Err(not_found(C::KIND, id));
        }
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            let revision = entry.mod_revision;
            match decode(entry) {
                Ok(config) => snapshots.push(config),
                Err(e) => warn!(%key, revision, error = %e, "skipping undecodable snapshot"),
            }
        }
        Ok(snapshots)
    }

    /// One named param set of a stored group.
    pub fn group_param_set(&self, id: &ConfigId, set_name: &str) -> StateResult<NamedParamSet> {
        let group: ConfigGroup = self.get(id)?;
        group
            .param_set(set_name)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("param set {set_name} in group {id}")))
    }
}
