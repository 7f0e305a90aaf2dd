//! Object-store interface and in-memory fake.
//!
//! The store interface abstracts the platform's object store:
//! - Listing namespaces and runs, reading the limit singleton
//! - Label and pause-knob mutations, delete/create
//! - The run event subscription
//!
//! The platform's optimistic concurrency is the only synchronization the
//! controller relies on; every mutation here can come back `NotFound` or
//! `Conflict` and callers must treat both as normal outcomes.
//!
//! A fake implementation is provided for testing and development.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio_stream::wrappers::UnboundedReceiverStream;

use gantry_model::{Condition, GlobalLimit, LimitSpec, PipelineRun, RunStatus};

/// Errors from object-store operations.
///
/// `NotFound` and `Conflict` are expected outcomes of racing with the
/// platform and with the controller's own concurrent triggers, not
/// failures; everything else is retried on the next trigger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict on {0}")]
    Conflict(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The platform refused the mutation (e.g. the run already started).
    #[error("rejected by the platform: {0}")]
    Rejected(String),

    /// Timeouts, connection drops, unexpected statuses.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// One notification from the run event subscription.
///
/// Delivery is at-least-once and may be reordered; the periodic sweep's
/// full listing is the durability backstop for anything missed here.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Created(PipelineRun),
    Updated(PipelineRun),
    Deleted(PipelineRun),
}

/// Object-store interface.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// All namespace names known to the platform.
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError>;

    /// All runs, cluster-wide.
    async fn list_runs(&self) -> Result<Vec<PipelineRun>, StoreError>;

    async fn get_run(&self, namespace: &str, name: &str) -> Result<PipelineRun, StoreError>;

    /// Merge the given labels into a run's metadata.
    async fn patch_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;

    /// Set (`Some`) or clear (`None`) the pause knob on a run's spec.
    async fn patch_pause(
        &self,
        namespace: &str,
        name: &str,
        pause: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Delete a run with background propagation.
    async fn delete_run(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn create_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Read the cluster-wide limit singleton.
    async fn get_limit(&self) -> Result<GlobalLimit, StoreError>;

    /// Subscribe to run events. The stream ends when the platform drops
    /// the connection; callers re-subscribe.
    async fn watch_runs(&self) -> Result<BoxStream<'static, RunEvent>, StoreError>;
}

// =============================================================================
// Fake store
// =============================================================================

/// Seconds since the epoch for the fake clock's first stamp.
const FAKE_EPOCH: i64 = 1_767_225_600; // 2026-01-01T00:00:00Z

#[derive(Default)]
struct FakeInner {
    namespaces: BTreeSet<String>,
    runs: BTreeMap<String, PipelineRun>,
    limit: Option<GlobalLimit>,
    clock: i64,
    uid_seq: u64,
    deleted: Vec<String>,
    created: Vec<String>,
    fail_limit_reads: bool,
    rejected_pause: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
    conflict_label_once: BTreeSet<String>,
    watchers: Vec<mpsc::UnboundedSender<RunEvent>>,
}

impl FakeInner {
    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    fn broadcast(&mut self, event: RunEvent) {
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-memory store for tests and development.
///
/// Assigns uid, resourceVersion, and strictly increasing creation
/// timestamps on create, and feeds watch subscribers from its own
/// mutations. Failure-injection helpers simulate the races the real
/// platform produces.
#[derive(Default)]
pub struct FakeStore {
    inner: Arc<RwLock<FakeInner>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_namespace(&self, namespace: &str) {
        self.inner
            .write()
            .await
            .namespaces
            .insert(namespace.to_string());
    }

    pub async fn set_limit(&self, max_concurrent: u32) {
        self.inner.write().await.limit = Some(GlobalLimit {
            metadata: Default::default(),
            spec: LimitSpec { max_concurrent },
        });
    }

    /// Remove the limit object entirely (operator deleted it).
    pub async fn clear_limit(&self) {
        self.inner.write().await.limit = None;
    }

    /// Make limit reads fail with a transport error.
    pub async fn fail_limit_reads(&self, fail: bool) {
        self.inner.write().await.fail_limit_reads = fail;
    }

    /// Create a run the way an external trigger would.
    pub async fn submit(&self, namespace: &str, name: &str) -> PipelineRun {
        let run = PipelineRun::new(namespace, name);
        self.create_run(&run)
            .await
            .expect("fake submit must not collide");
        self.run(namespace, name).await.expect("just created")
    }

    /// Seed a pre-existing object without emitting a watch event
    /// (state present before the controller started).
    pub async fn seed(&self, run: PipelineRun) {
        let mut inner = self.inner.write().await;
        let key = run.key();
        inner.runs.insert(key, run);
    }

    /// Platform starts a run: first condition goes `Unknown/Running`.
    /// Used both for normal starts and to simulate a run racing past a
    /// queue decision.
    pub async fn mark_running(&self, namespace: &str, name: &str) {
        self.set_condition(namespace, name, "Unknown", "Running").await;
    }

    pub async fn mark_succeeded(&self, namespace: &str, name: &str) {
        self.set_condition(namespace, name, "True", "Succeeded").await;
    }

    pub async fn mark_failed(&self, namespace: &str, name: &str) {
        self.set_condition(namespace, name, "False", "Failed").await;
    }

    async fn set_condition(&self, namespace: &str, name: &str, status: &str, reason: &str) {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        if let Some(run) = inner.runs.get_mut(&key) {
            run.status = Some(RunStatus {
                conditions: vec![Condition {
                    type_: "Succeeded".to_string(),
                    status: status.to_string(),
                    reason: Some(reason.to_string()),
                    message: None,
                }],
                rest: serde_json::Map::new(),
            });
        }
    }

    /// Make the next pause patches for this run fail as platform-refused.
    pub async fn reject_pause(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        inner.rejected_pause.insert(key);
    }

    /// Make deletes of this run fail with a transport error.
    pub async fn fail_delete(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        inner.fail_delete.insert(key);
    }

    /// Make the next label patch for this run fail with a conflict.
    pub async fn conflict_label_once(&self, namespace: &str, name: &str) {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        inner.conflict_label_once.insert(key);
    }

    /// Drop every active watch subscription (connection reset).
    pub async fn drop_watchers(&self) {
        self.inner.write().await.watchers.clear();
    }

    pub async fn run(&self, namespace: &str, name: &str) -> Option<PipelineRun> {
        let inner = self.inner.read().await;
        inner.runs.get(&FakeInner::key(namespace, name)).cloned()
    }

    pub async fn runs(&self) -> Vec<PipelineRun> {
        self.inner.read().await.runs.values().cloned().collect()
    }

    /// Keys of runs deleted through the store, in order.
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.read().await.deleted.clone()
    }

    /// Keys of runs created through the store, in order.
    pub async fn created(&self) -> Vec<String> {
        self.inner.read().await.created.clone()
    }
}

#[async_trait]
impl RunStore for FakeStore {
    async fn list_namespaces(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.read().await.namespaces.iter().cloned().collect())
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, StoreError> {
        Ok(self.inner.read().await.runs.values().cloned().collect())
    }

    async fn get_run(&self, namespace: &str, name: &str) -> Result<PipelineRun, StoreError> {
        let key = FakeInner::key(namespace, name);
        self.inner
            .read()
            .await
            .runs
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    async fn patch_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        if inner.conflict_label_once.remove(&key) {
            return Err(StoreError::Conflict(key));
        }
        let run = inner
            .runs
            .get_mut(&key)
            .ok_or(StoreError::NotFound(key))?;
        run.metadata.labels.extend(labels.clone());
        bump_version(run);
        let updated = run.clone();
        inner.broadcast(RunEvent::Updated(updated));
        Ok(())
    }

    async fn patch_pause(
        &self,
        namespace: &str,
        name: &str,
        pause: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        if inner.rejected_pause.contains(&key) {
            return Err(StoreError::Rejected(key));
        }
        let run = inner
            .runs
            .get_mut(&key)
            .ok_or(StoreError::NotFound(key))?;
        run.spec.pause = pause.map(|p| p.to_string());
        bump_version(run);
        let updated = run.clone();
        inner.broadcast(RunEvent::Updated(updated));
        Ok(())
    }

    async fn delete_run(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = FakeInner::key(namespace, name);
        if inner.fail_delete.contains(&key) {
            return Err(StoreError::Transport(format!("delete {key}: timed out")));
        }
        let run = inner
            .runs
            .remove(&key)
            .ok_or(StoreError::NotFound(key.clone()))?;
        inner.deleted.push(key);
        inner.broadcast(RunEvent::Deleted(run));
        Ok(())
    }

    async fn create_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = run.key();
        if inner.runs.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut stored = run.clone();
        inner.uid_seq += 1;
        inner.clock += 1;
        stored.metadata.uid = Some(format!("uid-{:04}", inner.uid_seq));
        stored.metadata.resource_version = Some("1".to_string());
        stored.metadata.creation_timestamp = DateTime::from_timestamp(FAKE_EPOCH + inner.clock, 0);
        stored.status = None;

        inner.runs.insert(key.clone(), stored.clone());
        inner.created.push(key);
        inner.broadcast(RunEvent::Created(stored));
        Ok(())
    }

    async fn get_limit(&self) -> Result<GlobalLimit, StoreError> {
        let inner = self.inner.read().await;
        if inner.fail_limit_reads {
            return Err(StoreError::Transport("limit read timed out".to_string()));
        }
        inner
            .limit
            .clone()
            .ok_or_else(|| StoreError::NotFound(gantry_model::LIMIT_NAME.to_string()))
    }

    async fn watch_runs(&self) -> Result<BoxStream<'static, RunEvent>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.watchers.push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

fn bump_version(run: &mut PipelineRun) {
    let next = run
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    run.metadata.resource_version = Some(next.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_store_assigns_identity_in_order() {
        let store = FakeStore::new();
        let a = store.submit("ns-cicd", "a").await;
        let b = store.submit("ns-cicd", "b").await;

        assert!(a.metadata.uid.is_some());
        assert!(a.metadata.creation_timestamp < b.metadata.creation_timestamp);
    }

    #[tokio::test]
    async fn test_fake_store_create_conflicts_on_existing() {
        let store = FakeStore::new();
        let run = PipelineRun::new("ns-cicd", "a");
        store.create_run(&run).await.unwrap();

        let err = store.create_run(&run).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_fake_store_delete_not_found() {
        let store = FakeStore::new();
        let err = store.delete_run("ns-cicd", "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fake_store_watch_sees_creates() {
        let store = FakeStore::new();
        let mut stream = store.watch_runs().await.unwrap();

        store.submit("ns-cicd", "a").await;

        match stream.next().await {
            Some(RunEvent::Created(run)) => assert_eq!(run.metadata.name, "a"),
            other => panic!("expected create event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fake_store_limit_lifecycle() {
        let store = FakeStore::new();
        assert!(store.get_limit().await.unwrap_err().is_not_found());

        store.set_limit(4).await;
        assert_eq!(store.get_limit().await.unwrap().max_concurrent(), Some(4));

        store.clear_limit().await;
        assert!(store.get_limit().await.unwrap_err().is_not_found());
    }
}
