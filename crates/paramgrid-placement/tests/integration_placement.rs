//! Integration tests for the placement engine.
//!
//! Each test wires a `ConfigService` over an in-memory redb store with fake
//! node discovery, dissemination, authorization and relationship
//! collaborators, then drives placements end to end.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use common::*;
use paramgrid_core::{ConfigKind, ErrorKind, PlacementStatus, Selector, SelectorOp, StandaloneConfig};
use paramgrid_placement::{NodeCommand, Permission, PlacementError, ResourceKind};

// ── Partial failure ──────────────────────────────────────────────

#[tokio::test]
async fn dissemination_failure_skips_only_that_node() {
    let h = harness()
        .disseminator(FakeDisseminator::failing_for(&["node-2"]))
        .build();
    let stored = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap();
    let id = stored.id();

    let tasks = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();

    let nodes: Vec<_> = tasks.iter().map(|t| t.node.as_str()).collect();
    assert_eq!(nodes, vec!["node-1", "node-3"]);
    assert!(tasks.iter().all(|t| t.status == PlacementStatus::Accepted));
    assert!(tasks.iter().all(|t| t.namespace == "prod"));
    assert_eq!(h.disseminator.attempt_count(), 3);

    // node-2's task stays recorded as Accepted.
    let recorded = h.service.engine().list(ConfigKind::Standalone, &id).unwrap();
    assert_eq!(recorded.len(), 3);
    assert!(recorded
        .iter()
        .any(|t| t.node == "node-2" && t.status == PlacementStatus::Accepted));
}

#[tokio::test]
async fn delivery_timeout_counts_as_failure() {
    let h = harness()
        .config("[placement]\ndissemination_timeout = \"50ms\"\n")
        .disseminator(FakeDisseminator::stalling_for(&["node-1"]))
        .build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    let tasks = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();

    let nodes: Vec<_> = tasks.iter().map(|t| t.node.as_str()).collect();
    assert_eq!(nodes, vec!["node-2", "node-3"]);
}

#[tokio::test]
async fn command_build_failure_skips_node() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    let calls = AtomicUsize::new(0);
    let tasks = h
        .service
        .engine()
        .place::<StandaloneConfig, _>(&subject(), &id, "prod", &[], no_cancel(), |config, task_id| {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(PlacementError::Marshal("simulated".into()));
            }
            NodeCommand::apply_standalone(config, "prod", task_id).encode()
        })
        .await
        .unwrap();

    let nodes: Vec<_> = tasks.iter().map(|t| t.node.as_str()).collect();
    assert_eq!(nodes, vec!["node-1", "node-3"]);
    assert_eq!(h.disseminator.delivered_nodes(), vec!["node-1", "node-3"]);
}

// ── Hard failures ────────────────────────────────────────────────

#[tokio::test]
async fn missing_namespace_permission_has_no_side_effects() {
    let h = harness()
        .authorizer(FakeAuthorizer::denying(Permission::NamespacePut))
        .build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let revision_before = h.kv.current_revision().unwrap();

    let err = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(h.kv.current_revision().unwrap(), revision_before);
    assert_eq!(h.disseminator.attempt_count(), 0);
    assert_eq!(h.nodes.query_count(), 0);
    assert!(h.service.engine().list(ConfigKind::Standalone, &id).unwrap().is_empty());
}

#[tokio::test]
async fn missing_config_permission_is_checked_first() {
    let h = harness()
        .authorizer(FakeAuthorizer::denying(Permission::ConfigGet))
        .build();
    let id = standalone("db", "v1", &[]).id();

    let err = h
        .service
        .engine()
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap_err();

    assert!(matches!(err, PlacementError::Unauthorized(_)));
    let checks = h.authorizer.checks.lock().unwrap().clone();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].0, Permission::ConfigGet);
    assert_eq!(checks[0].1.kind, ResourceKind::Config);
    assert_eq!(checks[0].1.id, "standalone/acme/db/v1");
}

#[tokio::test]
async fn unknown_config_is_not_found() {
    let h = harness().build();
    let id = standalone("ghost", "v9", &[]).id();

    let err = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.nodes.query_count(), 0);
}

#[tokio::test]
async fn node_query_failure_aborts_placement() {
    let h = harness().nodes(FakeNodes::failing()).build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    let err = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap_err();

    assert!(matches!(err, PlacementError::NodeQuery(_)));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(h.service.engine().list(ConfigKind::Standalone, &id).unwrap().is_empty());
    assert_eq!(h.disseminator.attempt_count(), 0);
}

// ── Collaborator inputs ──────────────────────────────────────────

#[tokio::test]
async fn selectors_are_forwarded_with_org() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let selectors = vec![
        Selector::parse("region=eu-west").unwrap(),
        Selector::new("cpus", SelectorOp::Gt, "4"),
    ];

    h.service
        .place_standalone(&subject(), &id, "prod", &selectors, no_cancel())
        .await
        .unwrap();

    let queries = h.nodes.queries.lock().unwrap().clone();
    assert_eq!(queries, vec![("acme".to_string(), selectors)]);
}

#[tokio::test]
async fn namespace_relationship_is_announced() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    h.service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();

    // One edge from `put` (org -> config), one from `place` (namespace -> config).
    let edges = h.notifier.wait_for_edges(2).await;
    assert!(edges.iter().any(|(from, to)| {
        from.kind == ResourceKind::Namespace && from.id == "prod" && to.id == "standalone/acme/db/v1"
    }));
}

#[tokio::test]
async fn notifier_failure_does_not_fail_placement() {
    let h = harness().notifier(FakeNotifier::failing()).build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    let tasks = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();

    assert_eq!(tasks.len(), 3);
}

// ── Commands ─────────────────────────────────────────────────────

#[tokio::test]
async fn group_command_carries_task_and_content() {
    let h = harness().nodes(FakeNodes::returning(&["node-1"])).build();
    let stored = h
        .service
        .put(
            &subject(),
            group(
                "stack",
                "v1",
                vec![set("web", &[("replicas", "3")]), set("db", &[("port", "5432")])],
            ),
        )
        .await
        .unwrap();

    let tasks = h
        .service
        .place_group(&subject(), &stored.id(), "edge", &[], no_cancel())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);

    let delivered = h.disseminator.delivered.lock().unwrap().clone();
    let (node, payload) = &delivered[0];
    assert_eq!(node, "node-1");
    match NodeCommand::decode(payload).unwrap() {
        NodeCommand::ApplyConfigGroup(cmd) => {
            assert_eq!(cmd.task_id, tasks[0].id);
            assert_eq!(cmd.namespace, "edge");
            assert_eq!(cmd.name, "stack");
            assert_eq!(cmd.param_sets, stored.param_sets);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

// ── Cancellation ─────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_before_start_is_an_error() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.nodes.query_count(), 0);
    assert_eq!(h.disseminator.attempt_count(), 0);
}

#[tokio::test]
async fn cancellation_mid_loop_returns_partial_result() {
    let (tx, rx) = watch::channel(false);
    let h = harness().disseminator(FakeDisseminator::cancelling(tx)).build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();

    let tasks = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], rx)
        .await
        .unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].node, "node-1");
    assert_eq!(h.disseminator.attempt_count(), 1);
    assert_eq!(h.service.engine().list(ConfigKind::Standalone, &id).unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_interrupts_blocked_node_query() {
    let h = harness().nodes(FakeNodes::stalling()).build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        h.service.place_standalone(&subject(), &id, "prod", &[], rx),
    )
    .await
    .expect("placement should stop once cancelled");

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(h.nodes.query_count(), 1);
    assert_eq!(h.disseminator.attempt_count(), 0);
    assert!(h.service.engine().list(ConfigKind::Standalone, &id).unwrap().is_empty());
}

#[tokio::test]
async fn cancel_interrupts_blocked_delivery() {
    let h = harness()
        .disseminator(FakeDisseminator::stalling_for(&["node-1"]))
        .build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);
    });

    // The default 10s dissemination timeout must not be waited out.
    let tasks = tokio::time::timeout(
        Duration::from_secs(2),
        h.service.place_standalone(&subject(), &id, "prod", &[], rx),
    )
    .await
    .expect("placement should stop once cancelled")
    .unwrap();

    assert!(tasks.is_empty());
    assert_eq!(h.disseminator.attempt_count(), 1);

    let recorded = h.service.engine().list(ConfigKind::Standalone, &id).unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].node, "node-1");
    assert_eq!(recorded[0].status, PlacementStatus::Accepted);
}

// ── Acknowledgments and dedup ────────────────────────────────────

#[tokio::test]
async fn acknowledgments_drive_membership_views() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let tasks = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();
    let engine = h.service.engine();

    engine
        .update_status(ConfigKind::Standalone, &id, &tasks[0].id, PlacementStatus::Placed)
        .unwrap();
    engine
        .update_status(ConfigKind::Standalone, &id, &tasks[1].id, PlacementStatus::Failed)
        .unwrap();
    let err = engine
        .update_status(ConfigKind::Standalone, &id, &tasks[0].id, PlacementStatus::Failed)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let nodes = engine.nodes_for_config(ConfigKind::Standalone, &id).unwrap();
    assert_eq!(nodes.into_iter().collect::<Vec<_>>(), vec![tasks[0].node.clone()]);
    assert!(engine
        .configs_on_node("acme", &tasks[0].node)
        .unwrap()
        .contains(&(ConfigKind::Standalone, id.clone())));
    assert_eq!(engine.configs_in_namespace("acme", "prod").unwrap().len(), 1);
    assert!(engine.configs_in_namespace("acme", "staging").unwrap().is_empty());
}

#[tokio::test]
async fn already_placed_nodes_are_skipped_when_enabled() {
    let h = harness()
        .config("[placement]\nskip_already_placed = true\n")
        .build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let first = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();
    let placed = first.iter().find(|t| t.node == "node-1").unwrap();
    h.service
        .engine()
        .update_status(ConfigKind::Standalone, &id, &placed.id, PlacementStatus::Placed)
        .unwrap();

    let second = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();
    let nodes: Vec<_> = second.iter().map(|t| t.node.as_str()).collect();
    assert_eq!(nodes, vec!["node-2", "node-3"]);

    // A different namespace is a different placement.
    let other_ns = h
        .service
        .place_standalone(&subject(), &id, "staging", &[], no_cancel())
        .await
        .unwrap();
    assert_eq!(other_ns.len(), 3);
}

#[tokio::test]
async fn repeated_placement_disseminates_again_by_default() {
    let h = harness().build();
    let id = h
        .service
        .put(&subject(), standalone("db", "v1", &[("port", "5432")]))
        .await
        .unwrap()
        .id();
    let first = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();
    for task in &first {
        h.service
            .engine()
            .update_status(ConfigKind::Standalone, &id, &task.id, PlacementStatus::Placed)
            .unwrap();
    }

    let second = h
        .service
        .place_standalone(&subject(), &id, "prod", &[], no_cancel())
        .await
        .unwrap();

    assert_eq!(second.len(), 3);
    assert_eq!(h.disseminator.attempt_count(), 6);
}
