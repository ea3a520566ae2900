//! paramgrid-diff: structural differences between configuration versions.
//!
//! Pure functions over param maps. Output is grouped by traversal of the
//! "new" side (additions and replacements) followed by the "old" side
//! (deletions), each in ascending key order, so identical inputs always
//! produce identical output.
//!
//! # Components
//!
//! - **`diff_param_sets`**: key/value comparison of two flat maps
//! - **`diff_config`**: standalone config comparison
//! - **`diff_group`**: config group comparison, param sets matched by name

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use paramgrid_core::{ConfigGroup, NamedParamSet, Params, StandaloneConfig};

/// Value carried by an addition or deletion: a single parameter value, or
/// a whole param set when a group gains or loses one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiffValue {
    Param(String),
    ParamSet(Params),
}

/// One structural difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diff {
    /// Key present only on the new side.
    Addition { key: String, value: DiffValue },
    /// Key present on both sides with different values.
    Replace { key: String, old: String, new: String },
    /// Key present only on the old side.
    Deletion { key: String, value: DiffValue },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Addition,
    Replace,
    Deletion,
}

impl DiffKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffKind::Addition => "addition",
            DiffKind::Replace => "replace",
            DiffKind::Deletion => "deletion",
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "addition" => Ok(DiffKind::Addition),
            "replace" => Ok(DiffKind::Replace),
            "deletion" => Ok(DiffKind::Deletion),
            other => Err(format!("unknown diff type: {other}")),
        }
    }
}

impl Diff {
    pub fn kind(&self) -> DiffKind {
        match self {
            Diff::Addition { .. } => DiffKind::Addition,
            Diff::Replace { .. } => DiffKind::Replace,
            Diff::Deletion { .. } => DiffKind::Deletion,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Diff::Addition { key, .. } | Diff::Replace { key, .. } | Diff::Deletion { key, .. } => {
                key
            }
        }
    }
}

/// Differences between two config groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDiff {
    /// Per param set differences, only for names present on both sides
    /// whose params differ.
    pub param_sets: BTreeMap<String, Vec<Diff>>,
    /// Param sets added to or removed from the group as a whole.
    pub group: Vec<Diff>,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool {
        self.param_sets.is_empty() && self.group.is_empty()
    }
}

/// Compare two flat param maps.
pub fn diff_param_sets(new: &Params, old: &Params) -> Vec<Diff> {
    let mut diffs = Vec::new();

    for (key, new_value) in new {
        match old.get(key) {
            None => diffs.push(Diff::Addition {
                key: key.clone(),
                value: DiffValue::Param(new_value.clone()),
            }),
            Some(old_value) if old_value != new_value => diffs.push(Diff::Replace {
                key: key.clone(),
                old: old_value.clone(),
                new: new_value.clone(),
            }),
            Some(_) => {}
        }
    }

    for (key, old_value) in old {
        if !new.contains_key(key) {
            diffs.push(Diff::Deletion {
                key: key.clone(),
                value: DiffValue::Param(old_value.clone()),
            });
        }
    }

    diffs
}

pub fn diff_config(new: &StandaloneConfig, old: &StandaloneConfig) -> Vec<Diff> {
    diff_param_sets(new.params(), old.params())
}

/// Compare two groups, matching param sets by name rather than position.
pub fn diff_group(new: &ConfigGroup, old: &ConfigGroup) -> GroupDiff {
    let new_sets = by_name(&new.param_sets);
    let old_sets = by_name(&old.param_sets);
    let mut result = GroupDiff::default();

    for (name, new_set) in &new_sets {
        match old_sets.get(name) {
            Some(old_set) => {
                let diffs = diff_param_sets(&new_set.params, &old_set.params);
                if !diffs.is_empty() {
                    result.param_sets.insert(name.to_string(), diffs);
                }
            }
            None => result.group.push(Diff::Addition {
                key: name.to_string(),
                value: DiffValue::ParamSet(new_set.params.clone()),
            }),
        }
    }

    for (name, old_set) in &old_sets {
        if !new_sets.contains_key(name) {
            result.group.push(Diff::Deletion {
                key: name.to_string(),
                value: DiffValue::ParamSet(old_set.params.clone()),
            });
        }
    }

    result
}

/// Index param sets by name. Stored groups have unique names; if a name
/// repeats, the first occurrence wins, matching group lookup.
fn by_name(sets: &[NamedParamSet]) -> BTreeMap<&str, &NamedParamSet> {
    let mut index = BTreeMap::new();
    for set in sets {
        index.entry(set.name.as_str()).or_insert(set);
    }
    index
}
