//! Placement engine: fans a stored config version out to matching nodes.
//!
//! A placement runs sequentially per node: record an `Accepted` task, build
//! the kind-specific apply-command, deliver it. A failure at any per-node
//! step is logged and the node is left out of the result. Only authorization,
//! config lookup and the node query can fail the call as a whole.
//!
//! Cancellation is observed between steps and while the node query or a
//! delivery is in flight. Tasks already recorded stay in the store.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use paramgrid_core::{
    ConfigGroup, ConfigId, ConfigKind, ControlPlaneConfig, NodeId, PlacementStatus, PlacementTask,
    Selector, StandaloneConfig, epoch_secs,
};
use paramgrid_state::{ConfigStore, PlacementStore, StoredConfig};

use crate::collaborators::{Collaborators, Permission, Resource, Subject, notify_detached, require};
use crate::command::NodeCommand;
use crate::error::{PlacementError, PlacementResult};

/// Tunables for [`PlacementEngine`].
#[derive(Debug, Clone)]
pub struct PlacementSettings {
    /// Skip nodes that already have a `Placed` task for the same config
    /// identity and namespace.
    pub skip_already_placed: bool,
    /// Upper bound on a single dissemination call.
    pub dissemination_timeout: Duration,
}

impl Default for PlacementSettings {
    fn default() -> Self {
        Self {
            skip_already_placed: false,
            dissemination_timeout: Duration::from_secs(10),
        }
    }
}

impl PlacementSettings {
    pub fn from_config(config: &ControlPlaneConfig) -> Self {
        Self {
            skip_already_placed: config.skip_already_placed(),
            dissemination_timeout: config.dissemination_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct PlacementEngine {
    configs: ConfigStore,
    placements: PlacementStore,
    collaborators: Collaborators,
    settings: PlacementSettings,
}

impl PlacementEngine {
    pub fn new(
        configs: ConfigStore,
        placements: PlacementStore,
        collaborators: Collaborators,
        settings: PlacementSettings,
    ) -> Self {
        Self {
            configs,
            placements,
            collaborators,
            settings,
        }
    }

    /// Place a stored standalone config into `namespace` on every node
    /// matching `selectors`.
    pub async fn place_standalone(
        &self,
        subject: &Subject,
        id: &ConfigId,
        namespace: &str,
        selectors: &[Selector],
        cancel: watch::Receiver<bool>,
    ) -> PlacementResult<Vec<PlacementTask>> {
        self.place::<StandaloneConfig, _>(subject, id, namespace, selectors, cancel, |config, task_id| {
            NodeCommand::apply_standalone(config, namespace, task_id).encode()
        })
        .await
    }

    /// Place a stored config group into `namespace` on every node matching
    /// `selectors`.
    pub async fn place_group(
        &self,
        subject: &Subject,
        id: &ConfigId,
        namespace: &str,
        selectors: &[Selector],
        cancel: watch::Receiver<bool>,
    ) -> PlacementResult<Vec<PlacementTask>> {
        self.place::<ConfigGroup, _>(subject, id, namespace, selectors, cancel, |group, task_id| {
            NodeCommand::apply_group(group, namespace, task_id).encode()
        })
        .await
    }

    /// Place any stored config kind, encoding each node's payload with `build`.
    ///
    /// Returns one task per node that was recorded and delivered to. A node
    /// whose delivery failed keeps its `Accepted` task in the store but is
    /// absent from the result, as is any node whose task could not be
    /// recorded or whose command could not be built.
    pub async fn place<C, F>(
        &self,
        subject: &Subject,
        id: &ConfigId,
        namespace: &str,
        selectors: &[Selector],
        mut cancel: watch::Receiver<bool>,
        build: F,
    ) -> PlacementResult<Vec<PlacementTask>>
    where
        C: StoredConfig + Send + Sync,
        F: Fn(&C, Uuid) -> PlacementResult<Vec<u8>> + Send + Sync,
    {
        let config_resource = Resource::config(C::KIND, id);
        let authorizer = self.collaborators.authorizer.as_ref();
        require(authorizer, subject, Permission::ConfigGet, &config_resource).await?;
        require(authorizer, subject, Permission::NamespacePut, &Resource::namespace(namespace)).await?;

        let config: C = self.configs.get(id)?;

        notify_detached(
            &self.collaborators.notifier,
            Resource::namespace(namespace),
            config_resource,
        );

        ensure_active(&cancel)?;
        let nodes = tokio::select! {
            biased;
            result = self.collaborators.nodes.query_nodes(&id.org, selectors) => {
                result.map_err(PlacementError::NodeQuery)?
            }
            _ = cancelled(&mut cancel) => {
                warn!(config = %id, "placement cancelled during node query");
                return Err(PlacementError::Cancelled);
            }
        };
        ensure_active(&cancel)?;

        let already_placed = if self.settings.skip_already_placed {
            self.placed_in_namespace(C::KIND, id, namespace)?
        } else {
            BTreeSet::new()
        };

        info!(kind = %C::KIND, config = %id, %namespace, nodes = nodes.len(), "placement started");

        let mut tasks = Vec::with_capacity(nodes.len());
        for node in nodes {
            if *cancel.borrow() {
                warn!(config = %id, placed = tasks.len(), "placement cancelled; remaining nodes skipped");
                break;
            }
            if already_placed.contains(&node) {
                debug!(config = %id, %node, %namespace, "already placed, skipping");
                continue;
            }
            match self
                .place_on_node(C::KIND, id, &config, &node, namespace, &build, &mut cancel)
                .await
            {
                NodeOutcome::Delivered(task) => tasks.push(task),
                NodeOutcome::Skipped => {}
                NodeOutcome::Cancelled => {
                    warn!(
                        config = %id,
                        %node,
                        placed = tasks.len(),
                        "placement cancelled during dissemination; remaining nodes skipped"
                    );
                    break;
                }
            }
        }

        info!(kind = %C::KIND, config = %id, %namespace, tasks = tasks.len(), "placement finished");
        Ok(tasks)
    }

    /// Record, build and deliver for one node.
    #[allow(clippy::too_many_arguments)]
    async fn place_on_node<C, F>(
        &self,
        kind: ConfigKind,
        id: &ConfigId,
        config: &C,
        node: &str,
        namespace: &str,
        build: &F,
        cancel: &mut watch::Receiver<bool>,
    ) -> NodeOutcome
    where
        F: Fn(&C, Uuid) -> PlacementResult<Vec<u8>>,
    {
        let task = PlacementTask::accepted(node, namespace, epoch_secs());

        if let Err(e) = self.placements.record(kind, id, &task) {
            warn!(config = %id, %node, error = %e, "failed to record placement task, skipping node");
            return NodeOutcome::Skipped;
        }

        let payload = match build(config, task.id) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(config = %id, %node, task_id = %task.id, error = %e, "failed to build command, skipping node");
                return NodeOutcome::Skipped;
            }
        };

        // A delivery that finished wins over a cancel seen in the same poll.
        let delivery = tokio::select! {
            biased;
            delivery = tokio::time::timeout(
                self.settings.dissemination_timeout,
                self.collaborators.disseminator.deliver(node, &payload),
            ) => delivery,
            _ = cancelled(cancel) => {
                debug!(config = %id, %node, task_id = %task.id, "delivery abandoned, task stays accepted");
                return NodeOutcome::Cancelled;
            }
        };
        match delivery {
            Ok(Ok(())) => {
                info!(config = %id, %node, task_id = %task.id, "command delivered");
                NodeOutcome::Delivered(task)
            }
            Ok(Err(e)) => {
                warn!(config = %id, %node, task_id = %task.id, error = %e, "dissemination failed");
                NodeOutcome::Skipped
            }
            Err(_) => {
                warn!(
                    config = %id,
                    %node,
                    task_id = %task.id,
                    timeout = ?self.settings.dissemination_timeout,
                    "dissemination timed out"
                );
                NodeOutcome::Skipped
            }
        }
    }

    fn placed_in_namespace(
        &self,
        kind: ConfigKind,
        id: &ConfigId,
        namespace: &str,
    ) -> PlacementResult<BTreeSet<NodeId>> {
        Ok(self
            .placements
            .list(kind, id)?
            .into_iter()
            .filter(|task| task.status == PlacementStatus::Placed && task.namespace == namespace)
            .map(|task| task.node)
            .collect())
    }

    /// Every task recorded for the config identity, regardless of status.
    pub fn list(&self, kind: ConfigKind, id: &ConfigId) -> PlacementResult<Vec<PlacementTask>> {
        Ok(self.placements.list(kind, id)?)
    }

    /// Apply a node agent's acknowledgment to a task.
    pub fn update_status(
        &self,
        kind: ConfigKind,
        id: &ConfigId,
        task_id: &Uuid,
        status: PlacementStatus,
    ) -> PlacementResult<PlacementTask> {
        let task = self
            .placements
            .update_status(kind, id, task_id, status, epoch_secs())?;
        info!(config = %id, node = %task.node, %task_id, ?status, "placement task resolved");
        Ok(task)
    }

    /// Nodes currently holding this config version.
    pub fn nodes_for_config(&self, kind: ConfigKind, id: &ConfigId) -> PlacementResult<BTreeSet<NodeId>> {
        Ok(self.placements.nodes_for_config(kind, id)?)
    }

    /// Config identities of `org` placed on `node`.
    pub fn configs_on_node(&self, org: &str, node: &str) -> PlacementResult<BTreeSet<(ConfigKind, ConfigId)>> {
        Ok(self.placements.configs_on_node(org, node)?)
    }

    /// Config identities of `org` placed into `namespace`.
    pub fn configs_in_namespace(
        &self,
        org: &str,
        namespace: &str,
    ) -> PlacementResult<BTreeSet<(ConfigKind, ConfigId)>> {
        Ok(self.placements.configs_in_namespace(org, namespace)?)
    }
}

/// Result of placing on a single node.
enum NodeOutcome {
    Delivered(PlacementTask),
    /// Recording, building or delivery failed; the loop moves on.
    Skipped,
    Cancelled,
}

/// Resolves once `cancel` reads `true`. A dropped sender can no longer
/// cancel, so the future then never resolves.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            if *cancel.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

fn ensure_active(cancel: &watch::Receiver<bool>) -> PlacementResult<()> {
    if *cancel.borrow() {
        Err(PlacementError::Cancelled)
    } else {
        Ok(())
    }
}
