//! Capability traits for the external systems the control plane calls.
//!
//! Each collaborator is injected at construction as an `Arc<dyn _>` so tests
//! can substitute in-process fakes.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use paramgrid_core::{ConfigId, ConfigKind, NodeId, Selector};

use crate::error::{PlacementError, PlacementResult};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ConfigGet,
    ConfigPut,
    NamespacePut,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ConfigGet => "config.get",
            Permission::ConfigPut => "config.put",
            Permission::NamespacePut => "namespace.put",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Org,
    Config,
    Namespace,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Org => "org",
            ResourceKind::Config => "config",
            ResourceKind::Namespace => "namespace",
        }
    }
}

/// A resource an authorization decision or relationship refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
}

impl Resource {
    pub fn org(org: &str) -> Self {
        Self {
            kind: ResourceKind::Org,
            id: org.to_string(),
        }
    }

    /// Config resources are identified as `{kind}/{org}/{name}/{version}`.
    pub fn config(kind: ConfigKind, id: &ConfigId) -> Self {
        Self {
            kind: ResourceKind::Config,
            id: format!("{kind}/{id}"),
        }
    }

    pub fn namespace(namespace: &str) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            id: namespace.to_string(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Decides whether a subject holds a permission on a resource.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, subject: &Subject, permission: Permission, resource: &Resource) -> bool;
}

/// Resolves a selector query to the organization's matching nodes.
#[async_trait::async_trait]
pub trait NodeQuery: Send + Sync {
    async fn query_nodes(&self, org: &str, selectors: &[Selector]) -> anyhow::Result<Vec<NodeId>>;
}

/// Delivers a serialized apply-command to one node's agent.
#[async_trait::async_trait]
pub trait Disseminator: Send + Sync {
    async fn deliver(&self, node: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Records an inheritance edge `from -> to` in an external relationship graph.
#[async_trait::async_trait]
pub trait RelationshipNotifier: Send + Sync {
    async fn notify(&self, from: &Resource, to: &Resource) -> anyhow::Result<()>;
}

/// Validates a configuration document before it is stored.
///
/// `document` is the JSON form of the config being written.
#[async_trait::async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn validate(&self, kind: ConfigKind, id: &ConfigId, document: &serde_json::Value) -> anyhow::Result<()>;
}

/// The external systems the placement engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub authorizer: Arc<dyn Authorizer>,
    pub nodes: Arc<dyn NodeQuery>,
    pub disseminator: Arc<dyn Disseminator>,
    pub notifier: Arc<dyn RelationshipNotifier>,
}

/// Fail with `Unauthorized` unless `subject` holds `permission` on `resource`.
pub(crate) async fn require(
    authorizer: &dyn Authorizer,
    subject: &Subject,
    permission: Permission,
    resource: &Resource,
) -> PlacementResult<()> {
    if authorizer.authorize(subject, permission, resource).await {
        Ok(())
    } else {
        warn!(%subject, %permission, %resource, "permission denied");
        Err(PlacementError::Unauthorized(format!("{permission} on {resource}")))
    }
}

/// Record `from -> to` without waiting for the outcome. Failures are logged.
pub(crate) fn notify_detached(notifier: &Arc<dyn RelationshipNotifier>, from: Resource, to: Resource) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        match notifier.notify(&from, &to).await {
            Ok(()) => debug!(%from, %to, "relationship recorded"),
            Err(e) => warn!(%from, %to, error = %e, "relationship notification failed"),
        }
    });
}
