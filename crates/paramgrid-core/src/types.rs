//! Shared domain types used across paramgrid crates.
//!
//! Every configuration entity is scoped to one organization and addressed by
//! `(org, name, version)`. A "change" to a configuration is always a new
//! version; stored values are never mutated in place.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant identifier.
pub type Org = String;

/// Unique identifier for a node in the fleet.
pub type NodeId = String;

/// Target namespace on a node.
pub type Namespace = String;

/// Flat configuration key/value pairs. Ordered so that every traversal is
/// deterministic.
pub type Params = BTreeMap<String, String>;

// ── Identity ──────────────────────────────────────────────────────

/// The two independent identity spaces a configuration can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    Standalone,
    Group,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 2] = [ConfigKind::Standalone, ConfigKind::Group];

    /// Key segment used for this kind in persisted keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Standalone => "standalone",
            ConfigKind::Group => "group",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(org, name, version)` identity of a stored configuration.
///
/// Equality is plain string equality of the three parts. There is no
/// ordering between versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigId {
    pub org: Org,
    pub name: String,
    pub version: String,
}

impl ConfigId {
    pub fn new(org: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.name, self.version)
    }
}

// ── Configurations ────────────────────────────────────────────────

/// A named flat key/value configuration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedParamSet {
    pub name: String,
    pub params: Params,
}

impl NamedParamSet {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Build a param set from `(key, value)` pairs.
    pub fn from_pairs<K, V>(name: impl Into<String>, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            name,
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single versioned param set. Its name is the name of the param set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandaloneConfig {
    pub org: Org,
    pub version: String,
    /// Unix timestamp (seconds) when this version was created.
    pub created_at: u64,
    /// Store-assigned; taken from the backend on every read, never persisted.
    #[serde(skip)]
    pub revision: u64,
    pub param_set: NamedParamSet,
}

impl StandaloneConfig {
    pub fn new(org: impl Into<String>, version: impl Into<String>, param_set: NamedParamSet) -> Self {
        Self {
            org: org.into(),
            version: version.into(),
            created_at: 0,
            revision: 0,
            param_set,
        }
    }

    pub fn name(&self) -> &str {
        &self.param_set.name
    }

    pub fn params(&self) -> &Params {
        &self.param_set.params
    }

    pub fn id(&self) -> ConfigId {
        ConfigId::new(&self.org, self.name(), &self.version)
    }
}

/// An ordered collection of named param sets versioned as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigGroup {
    pub org: Org,
    pub name: String,
    pub version: String,
    /// Unix timestamp (seconds) when this version was created.
    pub created_at: u64,
    #[serde(skip)]
    pub revision: u64,
    pub param_sets: Vec<NamedParamSet>,
}

impl ConfigGroup {
    pub fn new(
        org: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        param_sets: Vec<NamedParamSet>,
    ) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
            version: version.into(),
            created_at: 0,
            revision: 0,
            param_sets,
        }
    }

    pub fn id(&self) -> ConfigId {
        ConfigId::new(&self.org, &self.name, &self.version)
    }

    /// Look up a param set by name.
    pub fn param_set(&self, name: &str) -> Option<&NamedParamSet> {
        self.param_sets.iter().find(|ps| ps.name == name)
    }

    /// First param set name that appears more than once, if any.
    pub fn duplicate_param_set(&self) -> Option<&str> {
        self.param_sets.iter().enumerate().find_map(|(i, ps)| {
            self.param_sets[..i]
                .iter()
                .any(|earlier| earlier.name == ps.name)
                .then_some(ps.name.as_str())
        })
    }
}

// ── Placement ─────────────────────────────────────────────────────

/// Outcome of delivering a configuration to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    Accepted,
    Placed,
    Failed,
}

impl PlacementStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlacementStatus::Accepted)
    }
}

/// One attempt to deliver a specific config version to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementTask {
    pub id: Uuid,
    pub node: NodeId,
    pub namespace: Namespace,
    pub status: PlacementStatus,
    /// Unix timestamp when the task was accepted.
    pub accepted_at: u64,
    /// Unix timestamp of the terminal transition (equals `accepted_at` until then).
    pub resolved_at: u64,
}

impl PlacementTask {
    /// New task in the `Accepted` state.
    pub fn accepted(node: impl Into<String>, namespace: impl Into<String>, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            node: node.into(),
            namespace: namespace.into(),
            status: PlacementStatus::Accepted,
            accepted_at: now,
            resolved_at: now,
        }
    }

    pub fn resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a terminal status. Returns false (and leaves the task untouched)
    /// if the task is already resolved or `status` is not terminal.
    pub fn resolve(&mut self, status: PlacementStatus, now: u64) -> bool {
        if self.resolved() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.resolved_at = now;
        true
    }
}
