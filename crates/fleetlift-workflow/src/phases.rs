//! Workflow phase enums.
//!
//! These are the `kube`-native analogue of the abstract workflow's
//! execution state: `status.phase` on the CRD, advanced by one step per
//! reconcile.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `TransformRun` state machine: `pending → provisioning →
/// cloning → running → (awaiting_approval ↔ running)* → creating_prs →
/// completed`, terminal at `{completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformPhase {
    #[default]
    Pending,
    Provisioning,
    Cloning,
    Running,
    AwaitingApproval,
    CreatingPrs,
    Completed,
    Failed,
    Cancelled,
}

impl TransformPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransformPhase::Completed | TransformPhase::Failed | TransformPhase::Cancelled
        )
    }
}

impl std::fmt::Display for TransformPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "{s}")
    }
}

/// `TransformGroupRun` dispatcher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    #[default]
    AwaitingApproval,
    Dispatching,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DispatchPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchPhase::Completed | DispatchPhase::Failed | DispatchPhase::Cancelled
        )
    }
}
