//! Periodic reconciliation sweep.
//!
//! The sweep is the durability backstop for every decision: on a fixed
//! interval it rebuilds the queue view from a full listing, corrects
//! runs the platform started despite a queue decision, and promotes the
//! oldest waiting runs into freed slots. Every action is idempotent and
//! per-run failures never abort the rest of the pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gantry_model::{NamespacePattern, PipelineRun};

use crate::limit::LimitSource;
use crate::queue::QueueSnapshot;
use crate::store::{RunStore, StoreError};

/// Sweep configuration.
pub struct ReconcilerConfig {
    /// Interval between sweeps.
    pub sweep_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Statistics from one sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepStats {
    pub running: usize,
    pub queued: usize,
    pub replaced: usize,
    pub promoted: usize,
}

impl SweepStats {
    fn acted(&self) -> bool {
        self.replaced > 0 || self.promoted > 0
    }
}

/// The periodic sweep.
pub struct Reconciler {
    store: Arc<dyn RunStore>,
    pattern: NamespacePattern,
    limits: Arc<LimitSource>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RunStore>,
        pattern: NamespacePattern,
        limits: Arc<LimitSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            pattern,
            limits,
            config,
        }
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            pattern = %self.pattern,
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.config.sweep_interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(stats) if stats.acted() => {
                            info!(
                                running = stats.running,
                                queued = stats.queued,
                                replaced = stats.replaced,
                                promoted = stats.promoted,
                                "Sweep complete"
                            );
                        }
                        Ok(stats) => {
                            debug!(running = stats.running, queued = stats.queued, "Sweep complete");
                        }
                        Err(e) => {
                            error!(error = %e, "Sweep failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full pass: correct race victims, then promote into free slots.
    pub async fn sweep(&self) -> Result<SweepStats, StoreError> {
        let limit = self.limits.effective().await;
        let snapshot = QueueSnapshot::load(self.store.as_ref(), &self.pattern).await?;

        let mut stats = SweepStats {
            running: snapshot.running_count(),
            queued: snapshot.queued.len(),
            ..SweepStats::default()
        };

        for victim in &snapshot.victims {
            match self.replace(victim).await {
                Ok(()) => stats.replaced += 1,
                Err(e) => {
                    warn!(run = %victim.key(), error = %e, "Failed to replace run, will retry next sweep");
                }
            }
        }

        // Victims never held a counted slot, so the free-slot budget is
        // unaffected by the corrections above.
        let free = snapshot.free_slots(limit);
        for run in snapshot.queued.iter().take(free) {
            let namespace = &run.metadata.namespace;
            let name = &run.metadata.name;
            match self.store.patch_pause(namespace, name, None).await {
                Ok(()) => {
                    info!(run = %run.key(), limit, "Promoted queued run");
                    stats.promoted += 1;
                }
                // Completed or deleted between list and act.
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(run = %run.key(), error = %e, "Failed to promote run, will retry next sweep");
                }
            }
        }

        Ok(stats)
    }

    /// Delete-and-recreate a run the platform started over the limit.
    ///
    /// The successor re-enters at the watcher with a fresh creation
    /// timestamp, which puts it at the back of the FIFO order.
    async fn replace(&self, victim: &PipelineRun) -> Result<(), StoreError> {
        let successor = victim.successor(&format!("q{}", Utc::now().timestamp()));
        info!(
            run = %victim.key(),
            successor = %successor.metadata.name,
            "Replacing run started over the limit"
        );

        match self
            .store
            .delete_run(&victim.metadata.namespace, &victim.metadata.name)
            .await
        {
            Ok(()) => {}
            // Delete raced ahead of us - already gone.
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.store.create_run(&successor).await {
            Ok(()) => Ok(()),
            // An earlier attempt already landed the successor.
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
