//! Admission evaluator.
//!
//! Decides admit-or-queue for a run entering the system. Stateless
//! between invocations: every call re-reads the limit and recounts slot
//! occupancy from a fresh listing, so no drift can accumulate. The
//! forced-pending request issued here can itself lose the race against
//! the platform starting the run; that race is resolved by the
//! reconciler, not here.

use std::sync::Arc;

use tracing::{info, warn};

use gantry_model::{DesiredState, NamespacePattern, PipelineRun, PENDING_SPEC_STATUS};

use crate::limit::LimitSource;
use crate::queue::QueueSnapshot;
use crate::store::{RunStore, StoreError};

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Slot available; the run is left free to start.
    Admitted,

    /// Limit reached; the run was parked (or a parking decision stands
    /// while the platform refused it; the sweep will correct).
    Queued,

    /// The run disappeared before the decision landed.
    Gone,
}

/// Stateless admit-or-queue evaluator.
pub struct Evaluator {
    store: Arc<dyn RunStore>,
    pattern: NamespacePattern,
    limits: Arc<LimitSource>,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn RunStore>,
        pattern: NamespacePattern,
        limits: Arc<LimitSource>,
    ) -> Self {
        Self {
            store,
            pattern,
            limits,
        }
    }

    /// Decide for one managed run transitioning into the system.
    pub async fn evaluate(&self, run: &PipelineRun) -> Result<AdmissionDecision, StoreError> {
        let limit = self.limits.effective().await;
        let snapshot = QueueSnapshot::load(self.store.as_ref(), &self.pattern).await?;

        // The run under evaluation must not count against itself.
        let running = snapshot.running_excluding(&run.key());
        let namespace = &run.metadata.namespace;
        let name = &run.metadata.name;

        if (running as u32) < limit {
            // Admitted runs are left alone; only a previously parked run
            // needs its knob cleared.
            if run.desired_state() == DesiredState::Pending {
                match self.store.patch_pause(namespace, name, None).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => return Ok(AdmissionDecision::Gone),
                    Err(e) => return Err(e),
                }
            }
            info!(run = %run.key(), running, limit, "Admitted run");
            Ok(AdmissionDecision::Admitted)
        } else {
            match self
                .store
                .patch_pause(namespace, name, Some(PENDING_SPEC_STATUS))
                .await
            {
                Ok(()) => {
                    info!(run = %run.key(), running, limit, "Queued run");
                    Ok(AdmissionDecision::Queued)
                }
                Err(e) if e.is_not_found() => Ok(AdmissionDecision::Gone),
                Err(e) if e.is_rejected() || e.is_conflict() => {
                    // The platform already started it or someone got
                    // there first; the sweep resolves either way.
                    warn!(
                        run = %run.key(),
                        error = %e,
                        "Pending transition refused, leaving to the sweep"
                    );
                    Ok(AdmissionDecision::Queued)
                }
                Err(e) => Err(e),
            }
        }
    }
}
