//! Apply-commands delivered to node agents.
//!
//! Every command carries the placement task id, the target namespace and the
//! full configuration content so the agent needs no further lookups. The wire
//! form is JSON with a `command_type` tag.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use paramgrid_core::{ConfigGroup, NamedParamSet, Params, StandaloneConfig};

use crate::error::{PlacementError, PlacementResult};

/// Payload of an `apply_standalone_config` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStandaloneConfigCommand {
    pub task_id: Uuid,
    pub namespace: String,
    pub org: String,
    pub name: String,
    pub version: String,
    pub params: Params,
}

/// Payload of an `apply_config_group` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyConfigGroupCommand {
    pub task_id: Uuid,
    pub namespace: String,
    pub org: String,
    pub name: String,
    pub version: String,
    pub param_sets: Vec<NamedParamSet>,
}

/// A command sent to a node agent through the disseminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum NodeCommand {
    ApplyStandaloneConfig(ApplyStandaloneConfigCommand),
    ApplyConfigGroup(ApplyConfigGroupCommand),
}

impl NodeCommand {
    pub fn apply_standalone(config: &StandaloneConfig, namespace: &str, task_id: Uuid) -> Self {
        NodeCommand::ApplyStandaloneConfig(ApplyStandaloneConfigCommand {
            task_id,
            namespace: namespace.to_string(),
            org: config.org.clone(),
            name: config.name().to_string(),
            version: config.version.clone(),
            params: config.params().clone(),
        })
    }

    pub fn apply_group(group: &ConfigGroup, namespace: &str, task_id: Uuid) -> Self {
        NodeCommand::ApplyConfigGroup(ApplyConfigGroupCommand {
            task_id,
            namespace: namespace.to_string(),
            org: group.org.clone(),
            name: group.name.clone(),
            version: group.version.clone(),
            param_sets: group.param_sets.clone(),
        })
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            NodeCommand::ApplyStandaloneConfig(cmd) => cmd.task_id,
            NodeCommand::ApplyConfigGroup(cmd) => cmd.task_id,
        }
    }

    pub fn encode(&self) -> PlacementResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PlacementError::Marshal(format!("serialize command: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> PlacementResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| PlacementError::Marshal(format!("deserialize command: {e}")))
    }
}
