//! End-to-end tests for the watch loop.
//!
//! Spawns the real watcher task over the in-memory store and drives it
//! through the store's own event feed, including a dropped subscription.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use gantry_controller::{Evaluator, FakeStore, LimitSource, Watcher};
use gantry_model::{NamespacePattern, PENDING_SPEC_STATUS};

const NS: &str = "team-a-cicd";

async fn spawn_watcher(
    store: &Arc<FakeStore>,
    limit: u32,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    store.add_namespace(NS).await;
    store.set_limit(limit).await;

    let pattern = NamespacePattern::parse("*-cicd").unwrap();
    let limits = Arc::new(LimitSource::new(store.clone(), limit));
    let evaluator = Evaluator::new(store.clone(), pattern.clone(), limits);
    let watcher = Watcher::new(store.clone(), pattern, evaluator)
        .with_resubscribe_delay(Duration::from_millis(10));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        watcher.run(shutdown_rx).await;
    });

    // Give the task time to subscribe before events start flowing.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (shutdown_tx, handle)
}

#[tokio::test]
async fn test_watch_driven_tag_and_admission() {
    let store = Arc::new(FakeStore::new());
    let (shutdown_tx, handle) = spawn_watcher(&store, 1).await;

    store.submit(NS, "build-1").await;
    store.submit(NS, "build-2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = store.run(NS, "build-1").await.unwrap();
    let second = store.run(NS, "build-2").await.unwrap();
    assert!(first.is_managed());
    assert!(second.is_managed());
    assert!(first.spec.pause.is_none());
    assert_eq!(second.spec.pause.as_deref(), Some(PENDING_SPEC_STATUS));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_watch_survives_dropped_subscription() {
    let store = Arc::new(FakeStore::new());
    let (shutdown_tx, handle) = spawn_watcher(&store, 2).await;

    // Connection reset: every subscriber stream ends.
    store.drop_watchers().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The loop resubscribed and still processes new runs.
    store.submit(NS, "build-1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.run(NS, "build-1").await.unwrap().is_managed());

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
