//! # gantry-model
//!
//! Object model and state classification for the gantry queue controller.
//!
//! ## Design Principles
//!
//! - Objects mirror the platform's wire shapes; everything the controller
//!   does not interpret is carried as opaque JSON and copied verbatim
//! - State is always classified from a live object, never cached; the
//!   object store is the single source of truth
//! - Classification is deterministic given the same object, including the
//!   FIFO ordering used for promotion
//!
//! ## Modules
//!
//! - `run`: pipeline-run objects, desired/observed state, slot occupancy,
//!   successor construction for delete-and-recreate
//! - `limit`: the cluster-wide concurrency limit singleton
//! - `pattern`: namespace name globs that select the managed namespaces

mod error;
mod limit;
mod pattern;
mod run;

pub use error::ModelError;
pub use limit::{GlobalLimit, LimitSpec, LIMIT_API_VERSION, LIMIT_KIND, LIMIT_NAME};
pub use pattern::NamespacePattern;
pub use run::{
    Condition, DesiredState, ObjectMeta, ObservedState, PipelineRun, RunSpec, RunStatus,
    MANAGED_LABEL, MANAGED_VALUE, MAX_NAME_LEN, PENDING_SPEC_STATUS, RUN_API_VERSION, RUN_KIND,
};
