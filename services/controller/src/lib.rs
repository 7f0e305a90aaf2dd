//! Gantry Queue Controller
//!
//! Enforces a cluster-wide concurrency ceiling on pipeline runs spread
//! across namespaces, where the platform only supports per-namespace
//! quotas. Runs it manages are tagged with a marker label; at most
//! `maxConcurrent` of them run at once and the rest wait in FIFO order.
//!
//! ## Architecture
//!
//! - **Watcher**: tags newly created runs and triggers the first
//!   admission decision
//! - **Admission Evaluator**: admit-or-queue against the live count
//! - **Reconciler**: periodic sweep - corrects runs the platform started
//!   despite a queue decision (delete-and-recreate) and promotes the
//!   oldest waiting runs into freed slots
//! - **Store**: trait boundary to the platform object store (REST client
//!   in production, in-memory fake in tests)
//!
//! The object store is the sole source of truth and the sole
//! synchronization point: the queue is a derived view over object
//! metadata, recomputed from a full listing on every pass.

pub mod admission;
pub mod client;
pub mod config;
pub mod limit;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use admission::{AdmissionDecision, Evaluator};
pub use client::ApiStore;
pub use config::Config;
pub use limit::LimitSource;
pub use queue::QueueSnapshot;
pub use reconciler::{Reconciler, ReconcilerConfig, SweepStats};
pub use store::{FakeStore, RunEvent, RunStore, StoreError};
pub use watcher::Watcher;
