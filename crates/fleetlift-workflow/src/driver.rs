//! Execution driver selection: the agent-mode workflow (v2), which hands
//! work to the in-sandbox sidecar over the Agent Protocol, is the default.
//! The direct-exec driver from the original design is kept compiled but
//! deprecated — both drivers exist simultaneously during the migration
//! from one to the other.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    /// Direct exec of the agent CLI inside the sandbox, no sidecar
    /// involved. Superseded by `Agent`; kept for tasks pinned to it.
    Legacy,
    #[default]
    Agent,
}
