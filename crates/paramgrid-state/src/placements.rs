//! PlacementStore: persisted placement task records.
//!
//! Tasks are associated with a config identity through their key
//! (`placements/{kind}/{org}/{name}/{version}/{task_id}`). Node and namespace
//! membership views are derived from these records on every call; nothing is
//! cached in memory.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use paramgrid_core::{ConfigId, ConfigKind, NodeId, PlacementStatus, PlacementTask};

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::kv::{KvEntry, RevisionedKv};

/// A placement task together with the config it places.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub kind: ConfigKind,
    pub config: ConfigId,
    pub task: PlacementTask,
}

fn decode(entry: &KvEntry) -> StateResult<PlacementRecord> {
    serde_json::from_value(entry.value.clone()).map_err(|e| StateError::Deserialize(e.to_string()))
}

#[derive(Clone)]
pub struct PlacementStore {
    kv: RevisionedKv,
}

impl PlacementStore {
    pub fn new(kv: RevisionedKv) -> Self {
        Self { kv }
    }

    /// Persist a newly accepted task.
    pub fn record(&self, kind: ConfigKind, config: &ConfigId, task: &PlacementTask) -> StateResult<u64> {
        let record = PlacementRecord {
            kind,
            config: config.clone(),
            task: task.clone(),
        };
        keys::validate_id(config)?;
        let key = keys::placement_key(kind, config, &task.id);
        let value = serde_json::to_value(&record).map_err(|e| StateError::Serialize(e.to_string()))?;
        let entry = self.kv.create(&key, value)?;
        debug!(%kind, %config, task_id = %task.id, node = %task.node, "placement task recorded");
        Ok(entry.mod_revision)
    }

    pub fn get(&self, kind: ConfigKind, config: &ConfigId, task_id: &Uuid) -> StateResult<PlacementTask> {
        keys::validate_id(config)?;
        let key = keys::placement_key(kind, config, task_id);
        let entry = self
            .kv
            .get(&key)?
            .ok_or_else(|| StateError::NotFound(format!("placement task {task_id} for {kind} config {config}")))?;
        Ok(decode(&entry)?.task)
    }

    /// All tasks recorded for a config identity, regardless of status.
    pub fn list(&self, kind: ConfigKind, config: &ConfigId) -> StateResult<Vec<PlacementTask>> {
        keys::validate_id(config)?;
        let prefix = keys::placement_config_prefix(kind, config);
        Ok(self
            .scan(&prefix)?
            .into_iter()
            .map(|record| record.task)
            .collect())
    }

    /// Move a task from `Accepted` to a terminal status, exactly once.
    ///
    /// The write is a compare-and-swap on the record's revision, so of two
    /// concurrent acknowledgments only one can succeed.
    pub fn update_status(
        &self,
        kind: ConfigKind,
        config: &ConfigId,
        task_id: &Uuid,
        status: PlacementStatus,
        now: u64,
    ) -> StateResult<PlacementTask> {
        keys::validate_id(config)?;
        let key = keys::placement_key(kind, config, task_id);
        let entry = self
            .kv
            .get(&key)?
            .ok_or_else(|| StateError::NotFound(format!("placement task {task_id}")))?;
        let mut record = decode(&entry)?;

        if !record.task.resolve(status, now) {
            return Err(StateError::Conflict(format!(
                "placement task {task_id} cannot move from {:?} to {status:?}",
                record.task.status
            )));
        }

        let value = serde_json::to_value(&record).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.kv.compare_and_swap(&key, entry.mod_revision, value)?;
        debug!(%task_id, ?status, "placement task resolved");
        Ok(record.task)
    }

    /// Nodes on which this config version is currently placed.
    pub fn nodes_for_config(&self, kind: ConfigKind, config: &ConfigId) -> StateResult<BTreeSet<NodeId>> {
        Ok(self
            .list(kind, config)?
            .into_iter()
            .filter(|task| task.status == PlacementStatus::Placed)
            .map(|task| task.node)
            .collect())
    }

    /// Config identities of the organization placed on `node`.
    pub fn configs_on_node(&self, org: &str, node: &str) -> StateResult<BTreeSet<(ConfigKind, ConfigId)>> {
        self.placed_in_org(org, |task| task.node == node)
    }

    /// Config identities of the organization placed into `namespace`.
    pub fn configs_in_namespace(
        &self,
        org: &str,
        namespace: &str,
    ) -> StateResult<BTreeSet<(ConfigKind, ConfigId)>> {
        self.placed_in_org(org, |task| task.namespace == namespace)
    }

    fn placed_in_org(
        &self,
        org: &str,
        matches: impl Fn(&PlacementTask) -> bool,
    ) -> StateResult<BTreeSet<(ConfigKind, ConfigId)>> {
        let mut configs = BTreeSet::new();
        for kind in ConfigKind::ALL {
            for record in self.scan(&keys::placement_org_prefix(kind, org)?)? {
                if record.task.status == PlacementStatus::Placed && matches(&record.task) {
                    configs.insert((record.kind, record.config));
                }
            }
        }
        Ok(configs)
    }

    fn scan(&self, prefix: &str) -> StateResult<Vec<PlacementRecord>> {
        let mut records = Vec::new();
        for entry in self.kv.scan_prefix(prefix)? {
            match decode(&entry) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %entry.key, error = %e, "skipping undecodable placement record"),
            }
        }
        Ok(records)
    }
}
