//! Shared reconciler context and error type, grounded on
//! `controller/src/tasks/types.rs`'s `Context`/`Error` pair.

use std::sync::Arc;

use fleetlift_core::config::WorkerConfig;
use fleetlift_sandbox::SandboxProvider;
use kube::Client;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("missing object key")]
    MissingObjectKey,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] fleetlift_sandbox::SandboxError),

    #[error("activity error: {0}")]
    Activity(String),

    #[error("general error: {0}")]
    General(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared across every reconcile invocation: `Context { client, namespace,
/// config }`.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub config: Arc<WorkerConfig>,
    pub sandbox_provider: Arc<dyn SandboxProvider>,
}

pub(crate) const TRANSFORM_FINALIZER_NAME: &str = "transformruns.fleetlift.io/finalizer";
pub(crate) const GROUP_FINALIZER_NAME: &str = "transformgrouprun.fleetlift.io/finalizer";
