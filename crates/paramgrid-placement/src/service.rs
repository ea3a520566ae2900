//! ConfigService: authorized entry point for config and placement calls.
//!
//! Every operation checks the [`Authorizer`](crate::Authorizer) before it
//! touches the store. Writes are validated against the optional
//! [`SchemaValidator`] and announced to the relationship graph.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use paramgrid_core::{
    ConfigGroup, ConfigId, ConfigKind, ControlPlaneConfig, PlacementTask, Selector, StandaloneConfig,
    epoch_secs,
};
use paramgrid_diff::{Diff, GroupDiff, diff_config, diff_group};
use paramgrid_state::{ConfigStore, PlacementStore, RevisionedKv, StoredConfig};

use crate::collaborators::{
    Authorizer, Collaborators, Permission, Resource, SchemaValidator, Subject, notify_detached, require,
};
use crate::engine::{PlacementEngine, PlacementSettings};
use crate::error::{PlacementError, PlacementResult};

#[derive(Clone)]
pub struct ConfigService {
    configs: ConfigStore,
    engine: PlacementEngine,
    collaborators: Collaborators,
    validator: Option<Arc<dyn SchemaValidator>>,
}

impl ConfigService {
    /// Open the on-disk store named by `config` and wire the service.
    pub fn open(config: &ControlPlaneConfig, collaborators: Collaborators) -> PlacementResult<Self> {
        let kv = RevisionedKv::open(&config.store_path())?;
        Ok(Self::from_config(config, kv, collaborators))
    }

    /// Wire the service over an already opened backend.
    pub fn from_config(config: &ControlPlaneConfig, kv: RevisionedKv, collaborators: Collaborators) -> Self {
        let configs = ConfigStore::new(kv.clone()).with_history_limit(config.history_max_entries());
        let engine = PlacementEngine::new(
            configs.clone(),
            PlacementStore::new(kv),
            collaborators.clone(),
            PlacementSettings::from_config(config),
        );
        Self {
            configs,
            engine,
            collaborators,
            validator: None,
        }
    }

    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn engine(&self) -> &PlacementEngine {
        &self.engine
    }

    // ── Configs ────────────────────────────────────────────────────

    /// Store a new config version. Stamps `created_at` and returns the
    /// stored value with its revision.
    pub async fn put<C>(&self, subject: &Subject, mut config: C) -> PlacementResult<C>
    where
        C: StoredConfig + Send + Sync,
    {
        let id = config.config_id();
        require(self.authorizer(), subject, Permission::ConfigPut, &Resource::org(&id.org)).await?;

        if let Some(validator) = &self.validator {
            let document = serde_json::to_value(&config)
                .map_err(|e| PlacementError::Marshal(format!("serialize config: {e}")))?;
            validator
                .validate(C::KIND, &id, &document)
                .await
                .map_err(|e| PlacementError::SchemaInvalid(e.to_string()))?;
        }

        config.set_created_at(epoch_secs());
        let revision = self.configs.put(&config)?;
        config.set_revision(revision);

        notify_detached(
            &self.collaborators.notifier,
            Resource::org(&id.org),
            Resource::config(C::KIND, &id),
        );
        info!(kind = %C::KIND, config = %id, revision, "config created");
        Ok(config)
    }

    pub async fn get<C>(&self, subject: &Subject, id: &ConfigId) -> PlacementResult<C>
    where
        C: StoredConfig + Send + Sync,
    {
        require(self.authorizer(), subject, Permission::ConfigGet, &Resource::config(C::KIND, id)).await?;
        Ok(self.configs.get(id)?)
    }

    /// Every config of this kind in `org`.
    pub async fn list<C>(&self, subject: &Subject, org: &str) -> PlacementResult<Vec<C>>
    where
        C: StoredConfig + Send + Sync,
    {
        require(self.authorizer(), subject, Permission::ConfigGet, &Resource::org(org)).await?;
        Ok(self.configs.list(org)?)
    }

    /// Remove a config version, returning what was removed.
    pub async fn delete<C>(&self, subject: &Subject, id: &ConfigId) -> PlacementResult<C>
    where
        C: StoredConfig + Send + Sync,
    {
        require(self.authorizer(), subject, Permission::ConfigPut, &Resource::config(C::KIND, id)).await?;
        let removed = self.configs.delete(id)?;
        info!(kind = %C::KIND, config = %id, "config deleted");
        Ok(removed)
    }

    /// Recorded snapshots of a config identity, newest first.
    pub async fn history<C>(&self, subject: &Subject, id: &ConfigId) -> PlacementResult<Vec<C>>
    where
        C: StoredConfig + Send + Sync,
    {
        require(self.authorizer(), subject, Permission::ConfigGet, &Resource::config(C::KIND, id)).await?;
        Ok(self.configs.history(id)?)
    }

    // ── Diffs ──────────────────────────────────────────────────────

    /// Changes needed to go from `reference` to `other`.
    pub async fn diff_standalone(
        &self,
        subject: &Subject,
        reference: &ConfigId,
        other: &ConfigId,
    ) -> PlacementResult<Vec<Diff>> {
        let (reference, other) = self.load_pair::<StandaloneConfig>(subject, reference, other).await?;
        Ok(diff_config(&other, &reference))
    }

    /// Changes needed to go from group `reference` to group `other`.
    pub async fn diff_group(
        &self,
        subject: &Subject,
        reference: &ConfigId,
        other: &ConfigId,
    ) -> PlacementResult<GroupDiff> {
        let (reference, other) = self.load_pair::<ConfigGroup>(subject, reference, other).await?;
        Ok(diff_group(&other, &reference))
    }

    async fn load_pair<C>(&self, subject: &Subject, reference: &ConfigId, other: &ConfigId) -> PlacementResult<(C, C)>
    where
        C: StoredConfig + Send + Sync,
    {
        let authorizer = self.authorizer();
        require(authorizer, subject, Permission::ConfigGet, &Resource::config(C::KIND, reference)).await?;
        require(authorizer, subject, Permission::ConfigGet, &Resource::config(C::KIND, other)).await?;
        debug!(kind = %C::KIND, %reference, %other, "diffing configs");
        Ok((self.configs.get(reference)?, self.configs.get(other)?))
    }

    // ── Placement ──────────────────────────────────────────────────

    pub async fn place_standalone(
        &self,
        subject: &Subject,
        id: &ConfigId,
        namespace: &str,
        selectors: &[Selector],
        cancel: watch::Receiver<bool>,
    ) -> PlacementResult<Vec<PlacementTask>> {
        self.engine
            .place_standalone(subject, id, namespace, selectors, cancel)
            .await
    }

    pub async fn place_group(
        &self,
        subject: &Subject,
        id: &ConfigId,
        namespace: &str,
        selectors: &[Selector],
        cancel: watch::Receiver<bool>,
    ) -> PlacementResult<Vec<PlacementTask>> {
        self.engine
            .place_group(subject, id, namespace, selectors, cancel)
            .await
    }

    /// Placement tasks recorded for a config identity.
    pub async fn list_placements(
        &self,
        subject: &Subject,
        kind: ConfigKind,
        id: &ConfigId,
    ) -> PlacementResult<Vec<PlacementTask>> {
        require(self.authorizer(), subject, Permission::ConfigGet, &Resource::config(kind, id)).await?;
        self.engine.list(kind, id)
    }

    fn authorizer(&self) -> &dyn Authorizer {
        self.collaborators.authorizer.as_ref()
    }
}
