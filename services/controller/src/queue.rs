//! The derived queue view.
//!
//! There is no persisted queue: every pass recomputes a snapshot from the
//! live object listing: filter to matched namespaces and managed runs,
//! partition by desired × observed state, sort the waiting runs into FIFO
//! order. Nothing here survives between invocations.

use std::collections::BTreeSet;

use gantry_model::{NamespacePattern, PipelineRun};

use crate::store::{RunStore, StoreError};

/// One pass's view of the managed runs.
#[derive(Debug, Default)]
pub struct QueueSnapshot {
    /// Managed runs counting against the limit.
    pub occupying: Vec<PipelineRun>,

    /// Managed runs waiting for a slot, in FIFO order.
    pub queued: Vec<PipelineRun>,

    /// Managed runs the platform started despite a queue decision.
    pub victims: Vec<PipelineRun>,
}

impl QueueSnapshot {
    /// Load a fresh snapshot. A pattern matching zero namespaces yields
    /// an empty snapshot without listing any runs.
    pub async fn load(
        store: &dyn RunStore,
        pattern: &NamespacePattern,
    ) -> Result<Self, StoreError> {
        let namespaces: BTreeSet<String> = store
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| pattern.matches(ns))
            .collect();

        if namespaces.is_empty() {
            return Ok(Self::default());
        }

        let runs = store.list_runs().await?;
        Ok(Self::classify(runs.into_iter().filter(|run| {
            namespaces.contains(&run.metadata.namespace)
        })))
    }

    /// Partition managed runs by desired × observed state.
    pub fn classify(runs: impl IntoIterator<Item = PipelineRun>) -> Self {
        let mut snapshot = Self::default();

        for run in runs {
            if !run.is_managed() {
                continue;
            }
            if run.is_race_victim() {
                snapshot.victims.push(run);
            } else if run.is_queued() {
                snapshot.queued.push(run);
            } else if run.occupies_slot() {
                snapshot.occupying.push(run);
            }
            // Terminal runs fall through: nothing left to do with them.
        }

        snapshot.queued.sort_by(|a, b| a.fifo_cmp(b));
        snapshot
    }

    /// Managed runs currently holding a slot.
    pub fn running_count(&self) -> usize {
        self.occupying.len()
    }

    /// Slot count with one run (the one under evaluation) excluded.
    pub fn running_excluding(&self, key: &str) -> usize {
        self.occupying
            .iter()
            .filter(|run| run.key() != key)
            .count()
    }

    /// Slots still free under `limit`.
    pub fn free_slots(&self, limit: u32) -> usize {
        (limit as usize).saturating_sub(self.running_count())
    }
}
