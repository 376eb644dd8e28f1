//! `TransformRun` and `TransformGroupRun` Custom Resource Definitions.
//!
//! Grounded on `controller/src/crds/docsrun.rs`'s `CustomResource` derive
//! pattern — same `#[kube(...)]` attribute shape, one CRD per workflow
//! kind, `status` as a dedicated subresource.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fleetlift_core::model::{ExecutionProgress, GroupResult, SteeringState, Task, TaskResult};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::driver::Driver;
use crate::phases::{DispatchPhase, TransformPhase};
use crate::signals::SignalEnvelope;

/// One workflow execution: a single sandbox running one task's (or one
/// group's) repositories through provision → clone → execute → approve →
/// verify → PR/report.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "fleetlift.io", version = "v1", kind = "TransformRun")]
#[kube(namespaced)]
#[kube(status = "TransformRunStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TransformRunSpec {
    #[serde(flatten)]
    pub task: Task,
    /// Set when this `TransformRun` is a child spawned by a
    /// `TransformGroupRun` for one group; absent for single-group tasks.
    #[serde(default)]
    pub group_name: Option<String>,
    /// The next signal to apply, patched in by the CLI. Cleared by the
    /// reconciler once consumed.
    #[serde(default)]
    pub pending_signal: Option<SignalEnvelope>,
    /// `agent` (default) drives execution through the sidecar's Agent
    /// Protocol; `legacy` execs the agent CLI directly.
    #[serde(default)]
    pub driver: Driver,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformRunStatus {
    #[serde(default)]
    pub phase: TransformPhase,
    #[serde(default)]
    pub message: String,
    pub sandbox_ref: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// When the run most recently entered `awaiting_approval`, so the
    /// 24-hour approval timeout can be evaluated without a durable timer.
    pub awaiting_since: Option<DateTime<Utc>>,
    /// Cached diff, refreshed at each approval checkpoint by the query
    /// handlers.
    pub diff: Option<String>,
    pub verifier_output: Option<String>,
    #[serde(default)]
    pub steering: SteeringState,
    pub last_consumed_signal_id: Option<String>,
    pub result: Option<TaskResult>,
    /// Repo-keyed workdirs resolved during cloning, so later steps don't
    /// need to recompute layout.
    #[serde(default)]
    pub repo_workdirs: HashMap<String, String>,
}

/// The multi-group dispatcher: fans `task.groups` out into one
/// child `TransformRun` per group, bounded by `maxParallel`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "fleetlift.io", version = "v1", kind = "TransformGroupRun")]
#[kube(namespaced)]
#[kube(status = "TransformGroupRunStatus")]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TransformGroupRunSpec {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub pending_signal: Option<SignalEnvelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformGroupRunStatus {
    #[serde(default)]
    pub phase: DispatchPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress: ExecutionProgress,
    /// When the dispatcher most recently entered `awaiting_approval` or
    /// `paused`, so the 24-hour timeout can be evaluated without a durable
    /// timer. Reused across both waits since only one applies at a time.
    pub awaiting_since: Option<DateTime<Utc>>,
    pub last_consumed_signal_id: Option<String>,
    /// Groups that have completed so far, keyed by group name. Collection
    /// order is non-deterministic; the final `TaskResult.groups` is
    /// rebuilt from `task.groups`' declared order.
    #[serde(default)]
    pub groups: HashMap<String, GroupResult>,
    #[serde(default)]
    pub skipped_groups: Vec<String>,
    pub result: Option<TaskResult>,
}
