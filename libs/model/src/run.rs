//! Pipeline-run objects and state classification.
//!
//! A run carries two independent state axes:
//!
//! - **Desired state**: what the controller wants. Expressed through the
//!   platform's `spec.status` knob: `"PipelineRunPending"` keeps the run
//!   out of the running path, absence lets the platform start it.
//! - **Observed state**: what the platform reports through status
//!   conditions. The controller never writes this axis.
//!
//! The queue itself is not modeled here: it is a derived view (filter +
//! sort over these objects) owned by the controller crate.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API group/version of pipeline-run objects.
pub const RUN_API_VERSION: &str = "tekton.dev/v1";

/// Kind of pipeline-run objects.
pub const RUN_KIND: &str = "PipelineRun";

/// Label marking a run as managed by the controller.
///
/// Set exactly once when a run is first observed; never cleared.
pub const MANAGED_LABEL: &str = "queue.gantry.dev/managed";

/// Value of [`MANAGED_LABEL`] on managed runs.
pub const MANAGED_VALUE: &str = "true";

/// Sentinel value of `spec.status` that forces a run to stay pending.
pub const PENDING_SPEC_STATUS: &str = "PipelineRunPending";

/// Platform cap on object name length.
pub const MAX_NAME_LEN: usize = 63;

/// Metadata fields the API server populates on every stored object.
/// Stripped when building a successor so the create is accepted as new.
const SERVER_METADATA_KEYS: &[&str] = &["ownerReferences", "managedFields", "generation"];

/// Object metadata.
///
/// Fields the controller reads or rewrites are typed; everything else
/// (annotations and the like) rides along in `rest` and survives
/// delete-and-recreate untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Run spec. Only the pause knob is interpreted; the rest is opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpec {
    /// The platform's pause knob (`spec.status` on the wire).
    #[serde(rename = "status", default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<String>,

    /// Opaque remainder of the spec, copied verbatim on recreate.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Run status as reported by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// A single status condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    /// `"True"`, `"False"`, or `"Unknown"`.
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The state the controller wants a run to end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    /// Held back from the running path.
    Pending,

    /// Free to start (or already started).
    Runnable,
}

/// The state the platform reports for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedState {
    Pending,
    Running,
    Succeeded,
    Failed,

    /// The platform has not reported anything yet.
    Unknown,
}

impl ObservedState {
    /// Terminal states are never counted and never acted on.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One pipeline run as stored by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: RunSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

fn default_api_version() -> String {
    RUN_API_VERSION.to_string()
}

fn default_kind() -> String {
    RUN_KIND.to_string()
}

impl PipelineRun {
    /// Minimal run for construction in tests and fakes.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec: RunSpec::default(),
            status: None,
        }
    }

    /// `namespace/name`, for logging and per-object keys.
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    /// Whether the managed marker is present.
    pub fn is_managed(&self) -> bool {
        self.metadata
            .labels
            .get(MANAGED_LABEL)
            .map(|v| v == MANAGED_VALUE)
            .unwrap_or(false)
    }

    pub fn desired_state(&self) -> DesiredState {
        match self.spec.pause.as_deref() {
            Some(PENDING_SPEC_STATUS) => DesiredState::Pending,
            _ => DesiredState::Runnable,
        }
    }

    /// Classify the platform-reported state.
    ///
    /// A run without any condition yet is `Unknown` unless its pause knob
    /// is set, in which case the platform is guaranteed not to start it
    /// and it is already effectively `Pending`.
    pub fn observed_state(&self) -> ObservedState {
        let condition = self
            .status
            .as_ref()
            .and_then(|status| status.conditions.first());

        match condition {
            Some(c) if c.status == "True" => ObservedState::Succeeded,
            Some(c) if c.status == "False" => ObservedState::Failed,
            Some(c) if c.reason.as_deref() == Some(PENDING_SPEC_STATUS) => ObservedState::Pending,
            Some(_) => ObservedState::Running,
            None => match self.desired_state() {
                DesiredState::Pending => ObservedState::Pending,
                DesiredState::Runnable => ObservedState::Unknown,
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.observed_state().is_terminal()
    }

    /// Whether this run counts against the concurrency limit.
    ///
    /// A non-terminal run the controller has not held back occupies a slot
    /// even before the platform reports it running: the platform is
    /// committed to starting it.
    pub fn occupies_slot(&self) -> bool {
        !self.is_terminal() && self.desired_state() == DesiredState::Runnable
    }

    /// Whether the platform started this run despite a queue decision.
    pub fn is_race_victim(&self) -> bool {
        self.desired_state() == DesiredState::Pending
            && self.observed_state() == ObservedState::Running
    }

    /// Whether this run is waiting in the queue.
    pub fn is_queued(&self) -> bool {
        self.desired_state() == DesiredState::Pending
            && self.observed_state() == ObservedState::Pending
    }

    /// FIFO promotion order: earliest creation first, ties broken by
    /// `namespace/name` for determinism. Runs the server has not stamped
    /// yet sort last.
    pub fn fifo_cmp(&self, other: &Self) -> Ordering {
        let ts = |run: &Self| run.metadata.creation_timestamp;
        ts(self)
            .map_or((true, None), |t| (false, Some(t)))
            .cmp(&ts(other).map_or((true, None), |t| (false, Some(t))))
            .then_with(|| self.key().cmp(&other.key()))
    }

    /// Build the replacement object for a race-corrected run.
    ///
    /// Same namespace and spec blob, pause knob cleared and controller
    /// labels stripped so the successor re-enters at the watcher with a
    /// fresh identity and creation timestamp. Server-populated metadata is
    /// dropped so the create is accepted; the name is rebuilt from a
    /// truncated base plus `suffix` and always fits the platform's cap.
    pub fn successor(&self, suffix: &str) -> PipelineRun {
        let mut spec = self.spec.clone();
        spec.pause = None;

        let mut labels = self.metadata.labels.clone();
        labels.remove(MANAGED_LABEL);

        let mut rest = self.metadata.rest.clone();
        for key in SERVER_METADATA_KEYS {
            rest.remove(*key);
        }

        let base_len = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
        let base: String = self.metadata.name.chars().take(base_len).collect();

        PipelineRun {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            metadata: ObjectMeta {
                name: format!("{base}-{suffix}"),
                namespace: self.metadata.namespace.clone(),
                uid: None,
                resource_version: None,
                creation_timestamp: None,
                labels,
                rest,
            },
            spec,
            status: None,
        }
    }
}
