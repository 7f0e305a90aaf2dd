//! Watch loop: tag-and-evaluate for newly created runs.
//!
//! Subscribes to run events and, for every creation inside a matched
//! namespace, applies the managed marker exactly once and hands the run
//! to the admission evaluator. A dropped subscription is re-established
//! after a short pause; anything missed in between is covered by the
//! next sweep's full listing.
//!
//! Template rule: a run first observed already parked with no marker is
//! a template object and is permanently ignored. The decision is
//! point-in-time: after a controller restart, a managed run whose
//! marker patch never landed is indistinguishable from a template and
//! stays exempt. Known gap in the design; see DESIGN.md.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gantry_model::{DesiredState, NamespacePattern, PipelineRun, MANAGED_LABEL, MANAGED_VALUE};

use crate::admission::Evaluator;
use crate::store::{RunEvent, RunStore, StoreError};

/// Attempts at the marker patch before giving up on a conflicting run.
/// The next sweep's listing picks it up again either way.
const TAG_ATTEMPTS: usize = 3;

/// Watch loop over run creations.
pub struct Watcher {
    store: Arc<dyn RunStore>,
    pattern: NamespacePattern,
    evaluator: Evaluator,
    resubscribe_delay: Duration,
}

impl Watcher {
    pub fn new(store: Arc<dyn RunStore>, pattern: NamespacePattern, evaluator: Evaluator) -> Self {
        Self {
            store,
            pattern,
            evaluator,
            resubscribe_delay: Duration::from_secs(1),
        }
    }

    /// Shorten the resubscribe pause (tests).
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Run the watch loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(pattern = %self.pattern, "Starting watch loop");

        loop {
            let mut stream = match self.store.watch_runs().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Watch subscription failed, retrying");
                    if self.pause_or_shutdown(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    event = stream.next() => match event {
                        Some(RunEvent::Created(run)) => {
                            if let Err(e) = self.handle_created(&run).await {
                                warn!(run = %run.key(), error = %e, "Failed to process new run");
                            }
                        }
                        // Updates and deletes are the sweep's business.
                        Some(_) => {}
                        None => {
                            warn!("Watch stream dropped, resubscribing");
                            break;
                        }
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Watcher shutting down");
                            return;
                        }
                    }
                }
            }

            if self.pause_or_shutdown(&mut shutdown).await {
                return;
            }
        }
    }

    /// Returns true when shutdown was signaled during the pause.
    async fn pause_or_shutdown(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.resubscribe_delay) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }

    /// Tag-and-evaluate for one newly observed run.
    pub async fn handle_created(&self, run: &PipelineRun) -> Result<(), StoreError> {
        if !self.pattern.matches(&run.metadata.namespace) {
            return Ok(());
        }
        if run.is_managed() {
            // Resync replay of something already ours.
            return Ok(());
        }
        if run.desired_state() == DesiredState::Pending {
            debug!(run = %run.key(), "Ignoring template run");
            return Ok(());
        }
        if run.is_terminal() {
            return Ok(());
        }

        let Some(tagged) = self.tag(run).await? else {
            // Deleted before the marker landed.
            return Ok(());
        };

        self.evaluator.evaluate(&tagged).await?;
        Ok(())
    }

    /// Apply the managed marker, idempotently. Conflicts re-fetch and
    /// retry; not-found means the run vanished and yields `None`.
    async fn tag(&self, run: &PipelineRun) -> Result<Option<PipelineRun>, StoreError> {
        let namespace = &run.metadata.namespace;
        let name = &run.metadata.name;
        let labels: BTreeMap<String, String> = [(
            MANAGED_LABEL.to_string(),
            MANAGED_VALUE.to_string(),
        )]
        .into_iter()
        .collect();

        for _ in 0..TAG_ATTEMPTS {
            match self.store.patch_labels(namespace, name, &labels).await {
                Ok(()) => {
                    debug!(run = %run.key(), "Tagged run as managed");
                    let mut tagged = run.clone();
                    tagged
                        .metadata
                        .labels
                        .insert(MANAGED_LABEL.to_string(), MANAGED_VALUE.to_string());
                    return Ok(Some(tagged));
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) if e.is_conflict() => match self.store.get_run(namespace, name).await {
                    Ok(fresh) if fresh.is_managed() => return Ok(Some(fresh)),
                    Ok(_) => continue,
                    Err(e) if e.is_not_found() => return Ok(None),
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Conflict(run.key()))
    }
}
