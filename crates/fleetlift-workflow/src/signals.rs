//! Signal delivery: a duplicate `approve` signal behaves identically to
//! exactly one.
//!
//! Signals are realized as patches to `spec.pending_signal`, consumed and
//! cleared by the next reconcile. Each
//! envelope carries an `id` so a reconcile that observes the same id twice
//! (e.g. the CLI retried a patch that had already landed) treats the
//! second observation as a no-op, the `kube`-native analogue of Temporal's
//! at-least-once signal delivery combined with idempotent handling.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Approve,
    Reject,
    Cancel,
    Steer,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignalEnvelope {
    /// Unique per delivery attempt. The CLI mints a fresh id for each
    /// invocation of `approve`/`reject`/`steer`/etc.
    pub id: String,
    pub kind: SignalKind,
    /// `steer` payload.
    #[serde(default)]
    pub prompt: Option<String>,
    /// `continue` payload.
    #[serde(default)]
    pub skip_remaining: Option<bool>,
}

/// Returns `true` when `envelope` is new relative to `last_consumed_id` —
/// i.e. it has not already been acted on by a previous reconcile.
#[must_use]
pub fn is_fresh(envelope: &SignalEnvelope, last_consumed_id: Option<&str>) -> bool {
    last_consumed_id != Some(envelope.id.as_str())
}
