//! In-process fakes for the placement collaborators.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use tokio::sync::watch;

use paramgrid_core::{ConfigGroup, ConfigId, ConfigKind, ControlPlaneConfig, NamedParamSet, Selector, StandaloneConfig};
use paramgrid_placement::{
    Authorizer, Collaborators, ConfigService, Disseminator, NodeQuery, Permission, RelationshipNotifier,
    Resource, SchemaValidator, Subject,
};
use paramgrid_state::RevisionedKv;

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=paramgrid_placement=debug`).
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Fakes ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeAuthorizer {
    denied: HashSet<Permission>,
    pub checks: Mutex<Vec<(Permission, Resource)>>,
}

impl FakeAuthorizer {
    pub fn allow_all() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying(permission: Permission) -> Arc<Self> {
        Arc::new(Self {
            denied: HashSet::from([permission]),
            ..Self::default()
        })
    }
}

#[async_trait::async_trait]
impl Authorizer for FakeAuthorizer {
    async fn authorize(&self, _subject: &Subject, permission: Permission, resource: &Resource) -> bool {
        self.checks.lock().unwrap().push((permission, resource.clone()));
        !self.denied.contains(&permission)
    }
}

pub struct FakeNodes {
    nodes: Vec<String>,
    fail: bool,
    stall: bool,
    pub queries: Mutex<Vec<(String, Vec<Selector>)>>,
}

impl FakeNodes {
    pub fn returning(nodes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            fail: false,
            stall: false,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            nodes: Vec::new(),
            fail: true,
            stall: false,
            queries: Mutex::new(Vec::new()),
        })
    }

    /// Never answers.
    pub fn stalling() -> Arc<Self> {
        Arc::new(Self {
            nodes: Vec::new(),
            fail: false,
            stall: true,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl NodeQuery for FakeNodes {
    async fn query_nodes(&self, org: &str, selectors: &[Selector]) -> anyhow::Result<Vec<String>> {
        self.queries
            .lock()
            .unwrap()
            .push((org.to_string(), selectors.to_vec()));
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail {
            anyhow::bail!("node discovery unavailable");
        }
        Ok(self.nodes.clone())
    }
}

#[derive(Default)]
pub struct FakeDisseminator {
    failing: HashSet<String>,
    stalled: HashSet<String>,
    /// Flipped to `true` after the first successful delivery.
    cancel_after_first: Mutex<Option<watch::Sender<bool>>>,
    pub attempts: Mutex<Vec<String>>,
    pub delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeDisseminator {
    pub fn reliable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(nodes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: nodes.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn stalling_for(nodes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            stalled: nodes.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn cancelling(sender: watch::Sender<bool>) -> Arc<Self> {
        Arc::new(Self {
            cancel_after_first: Mutex::new(Some(sender)),
            ..Self::default()
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn delivered_nodes(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(node, _)| node.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Disseminator for FakeDisseminator {
    async fn deliver(&self, node: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.attempts.lock().unwrap().push(node.to_string());
        if self.stalled.contains(node) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(node) {
            anyhow::bail!("agent queue rejected delivery to {node}");
        }
        self.delivered
            .lock()
            .unwrap()
            .push((node.to_string(), payload.to_vec()));
        if let Some(sender) = self.cancel_after_first.lock().unwrap().take() {
            sender.send(true).ok();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    fail: bool,
    pub edges: Mutex<Vec<(Resource, Resource)>>,
}

impl FakeNotifier {
    pub fn recording() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Wait until at least `n` edges were recorded by detached notifications.
    pub async fn wait_for_edges(&self, n: usize) -> Vec<(Resource, Resource)> {
        for _ in 0..100 {
            {
                let edges = self.edges.lock().unwrap();
                if edges.len() >= n {
                    return edges.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.edges.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RelationshipNotifier for FakeNotifier {
    async fn notify(&self, from: &Resource, to: &Resource) -> anyhow::Result<()> {
        self.edges.lock().unwrap().push((from.clone(), to.clone()));
        if self.fail {
            anyhow::bail!("relationship graph unavailable");
        }
        Ok(())
    }
}

/// Rejects any config whose params contain an empty value.
pub struct NoEmptyValues;

#[async_trait::async_trait]
impl SchemaValidator for NoEmptyValues {
    async fn validate(&self, _kind: ConfigKind, id: &ConfigId, document: &serde_json::Value) -> anyhow::Result<()> {
        let text = document.to_string();
        if text.contains(":\"\"") {
            anyhow::bail!("{id} has an empty value");
        }
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────

pub struct Harness {
    pub service: ConfigService,
    pub kv: RevisionedKv,
    pub authorizer: Arc<FakeAuthorizer>,
    pub nodes: Arc<FakeNodes>,
    pub disseminator: Arc<FakeDisseminator>,
    pub notifier: Arc<FakeNotifier>,
}

pub struct HarnessBuilder {
    config: ControlPlaneConfig,
    authorizer: Arc<FakeAuthorizer>,
    nodes: Arc<FakeNodes>,
    disseminator: Arc<FakeDisseminator>,
    notifier: Arc<FakeNotifier>,
}

impl HarnessBuilder {
    pub fn config(mut self, toml: &str) -> Self {
        self.config = ControlPlaneConfig::parse(toml).unwrap();
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<FakeAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn nodes(mut self, nodes: Arc<FakeNodes>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn disseminator(mut self, disseminator: Arc<FakeDisseminator>) -> Self {
        self.disseminator = disseminator;
        self
    }

    pub fn notifier(mut self, notifier: Arc<FakeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> Harness {
        init_tracing();
        let kv = RevisionedKv::open_in_memory().unwrap();
        let service = ConfigService::from_config(&self.config, kv.clone(), self.collaborators());
        Harness {
            service,
            kv,
            authorizer: self.authorizer,
            nodes: self.nodes,
            disseminator: self.disseminator,
            notifier: self.notifier,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            authorizer: self.authorizer.clone(),
            nodes: self.nodes.clone(),
            disseminator: self.disseminator.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

pub fn harness() -> HarnessBuilder {
    HarnessBuilder {
        config: ControlPlaneConfig::default(),
        authorizer: FakeAuthorizer::allow_all(),
        nodes: FakeNodes::returning(&["node-1", "node-2", "node-3"]),
        disseminator: FakeDisseminator::reliable(),
        notifier: FakeNotifier::recording(),
    }
}

// ── Fixtures ──────────────────────────────────────────────────────

pub fn subject() -> Subject {
    Subject::new("alice")
}

/// A receiver whose sender is gone; it always reads `false`.
pub fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

pub fn standalone(name: &str, version: &str, pairs: &[(&str, &str)]) -> StandaloneConfig {
    StandaloneConfig::new("acme", version, NamedParamSet::from_pairs(name, pairs.iter().copied()))
}

pub fn group(name: &str, version: &str, sets: Vec<NamedParamSet>) -> ConfigGroup {
    ConfigGroup::new("acme", name, version, sets)
}

pub fn set(name: &str, pairs: &[(&str, &str)]) -> NamedParamSet {
    NamedParamSet::from_pairs(name, pairs.iter().copied())
}
