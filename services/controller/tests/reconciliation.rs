//! Integration tests for the reconciliation sweep.
//!
//! The sweep is the durability backstop: these tests verify race
//! correction (delete-and-recreate), slot-safety after corrections,
//! FIFO promotion, survival of a deleted limit object, and that a
//! failure on one run never stops the rest of the pass.

use std::sync::Arc;

use gantry_controller::{
    Evaluator, FakeStore, LimitSource, Reconciler, ReconcilerConfig, RunStore, Watcher,
};
use gantry_model::{
    NamespacePattern, PipelineRun, MANAGED_LABEL, MANAGED_VALUE, PENDING_SPEC_STATUS,
};

const NS: &str = "team-a-cicd";

struct Harness {
    store: Arc<FakeStore>,
    watcher: Watcher,
    reconciler: Reconciler,
}

async fn harness(limit: u32) -> Harness {
    let store = Arc::new(FakeStore::new());
    store.add_namespace(NS).await;
    store.set_limit(limit).await;

    let pattern = NamespacePattern::parse("*-cicd").unwrap();
    let limits = Arc::new(LimitSource::new(store.clone(), limit));
    let evaluator = Evaluator::new(store.clone(), pattern.clone(), limits.clone());
    let watcher = Watcher::new(store.clone(), pattern.clone(), evaluator);
    let reconciler = Reconciler::new(
        store.clone(),
        pattern,
        limits,
        ReconcilerConfig::default(),
    );

    Harness {
        store,
        watcher,
        reconciler,
    }
}

/// A parked managed run seeded directly into the store.
fn queued_run(name: &str, stamp: &str) -> PipelineRun {
    let mut run = PipelineRun::new(NS, name);
    run.metadata
        .labels
        .insert(MANAGED_LABEL.to_string(), MANAGED_VALUE.to_string());
    run.metadata.creation_timestamp = Some(stamp.parse().unwrap());
    run.spec.pause = Some(PENDING_SPEC_STATUS.to_string());
    run
}

#[tokio::test]
async fn test_race_victim_is_replaced_and_requeued() {
    let h = harness(1).await;

    // One admitted run fills the only slot.
    let alpha = h.store.submit(NS, "alpha").await;
    h.watcher.handle_created(&alpha).await.unwrap();
    h.store.mark_running(NS, "alpha").await;

    // The next run is parked, but the platform starts it anyway before
    // the pause lands.
    let whiskey = h.store.submit(NS, "whiskey").await;
    h.watcher.handle_created(&whiskey).await.unwrap();
    h.store.mark_running(NS, "whiskey").await;

    let stats = h.reconciler.sweep().await.unwrap();

    assert_eq!(stats.replaced, 1);
    assert!(h
        .store
        .deleted()
        .await
        .contains(&format!("{NS}/whiskey")));

    // The successor carries the same spec but a fresh identity: no
    // marker, no pause, no status.
    let successor = h
        .store
        .runs()
        .await
        .into_iter()
        .find(|run| run.metadata.name.starts_with("whiskey-q"))
        .expect("successor must exist");
    assert!(!successor.is_managed());
    assert!(successor.spec.pause.is_none());
    assert!(successor.status.is_none());

    // It re-enters at the watcher and, with no free slot, queues behind
    // the limit.
    h.watcher.handle_created(&successor).await.unwrap();
    let stored = h.store.run(NS, &successor.metadata.name).await.unwrap();
    assert!(stored.is_managed());
    assert_eq!(stored.spec.pause.as_deref(), Some(PENDING_SPEC_STATUS));
}

#[tokio::test]
async fn test_sweep_respects_limit_when_promoting() {
    let h = harness(2).await;

    h.store.seed(queued_run("one", "2026-01-01T00:00:01Z")).await;
    h.store.seed(queued_run("two", "2026-01-01T00:00:02Z")).await;
    h.store
        .seed(queued_run("three", "2026-01-01T00:00:03Z"))
        .await;

    let stats = h.reconciler.sweep().await.unwrap();

    // Exactly limit-many promoted, oldest first.
    assert_eq!(stats.promoted, 2);
    let one = h.store.run(NS, "one").await.unwrap();
    let two = h.store.run(NS, "two").await.unwrap();
    let three = h.store.run(NS, "three").await.unwrap();
    assert!(one.spec.pause.is_none());
    assert!(two.spec.pause.is_none());
    assert_eq!(three.spec.pause.as_deref(), Some(PENDING_SPEC_STATUS));

    // Re-running the sweep changes nothing: the promoted runs now hold
    // the slots.
    let stats = h.reconciler.sweep().await.unwrap();
    assert_eq!(stats.promoted, 0);
    assert_eq!(stats.running, 2);
}

#[tokio::test]
async fn test_limit_object_deleted_mid_run() {
    let h = harness(10).await;
    h.store.set_limit(1).await;

    // One sweep observes the configured value...
    h.reconciler.sweep().await.unwrap();

    // ...then an operator deletes the object entirely.
    h.store.clear_limit().await;
    h.store.seed(queued_run("one", "2026-01-01T00:00:01Z")).await;
    h.store.seed(queued_run("two", "2026-01-01T00:00:02Z")).await;

    let stats = h.reconciler.sweep().await.unwrap();

    // The sweep keeps going with the last known limit of 1.
    assert_eq!(stats.promoted, 1);
    let one = h.store.run(NS, "one").await.unwrap();
    assert!(one.spec.pause.is_none());
}

#[tokio::test]
async fn test_no_matched_namespaces_is_a_noop() {
    let store = Arc::new(FakeStore::new());
    store.add_namespace("prod").await;
    store.set_limit(2).await;

    let pattern = NamespacePattern::parse("*-cicd").unwrap();
    let limits = Arc::new(LimitSource::new(store.clone(), 2));
    let reconciler = Reconciler::new(
        store.clone(),
        pattern,
        limits,
        ReconcilerConfig::default(),
    );

    // Even a parked managed run in an unmatched namespace stays put.
    let mut run = PipelineRun::new("prod", "parked");
    run.metadata
        .labels
        .insert(MANAGED_LABEL.to_string(), MANAGED_VALUE.to_string());
    run.spec.pause = Some(PENDING_SPEC_STATUS.to_string());
    store.seed(run).await;

    let stats = reconciler.sweep().await.unwrap();

    assert_eq!(stats.running, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.promoted, 0);
    assert_eq!(stats.replaced, 0);
    assert!(store.deleted().await.is_empty());
}

#[tokio::test]
async fn test_one_failing_victim_does_not_stop_the_pass() {
    let h = harness(1).await;

    // Two race victims; deleting the first one keeps failing.
    let mut v1 = queued_run("victim-a", "2026-01-01T00:00:01Z");
    v1.status = started_status();
    let mut v2 = queued_run("victim-b", "2026-01-01T00:00:02Z");
    v2.status = started_status();
    h.store.seed(v1).await;
    h.store.seed(v2).await;
    h.store.fail_delete(NS, "victim-a").await;

    let stats = h.reconciler.sweep().await.unwrap();

    // The second victim is still corrected.
    assert_eq!(stats.replaced, 1);
    assert!(h
        .store
        .deleted()
        .await
        .contains(&format!("{NS}/victim-b")));
    assert!(h.store.run(NS, "victim-a").await.is_some());
}

#[tokio::test]
async fn test_promotion_tolerates_vanished_runs() {
    let h = harness(2).await;

    h.store.seed(queued_run("one", "2026-01-01T00:00:01Z")).await;

    // Delete between the sweep's listing and its patch: simulated by a
    // second sweep over an already-empty store after manual delete.
    h.store.delete_run(NS, "one").await.unwrap();
    let stats = h.reconciler.sweep().await.unwrap();
    assert_eq!(stats.promoted, 0);
}

fn started_status() -> Option<gantry_model::RunStatus> {
    Some(gantry_model::RunStatus {
        conditions: vec![gantry_model::Condition {
            type_: "Succeeded".to_string(),
            status: "Unknown".to_string(),
            reason: Some("Running".to_string()),
            message: None,
        }],
        rest: serde_json::Map::new(),
    })
}
