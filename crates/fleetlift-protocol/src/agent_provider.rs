//! `AgentProvider`: the file-drop protocol layered on top of any
//! [`SandboxProvider`]. Every sandbox backend gets the protocol
//! for free via the blanket impl below — callers keep naming
//! `Arc<dyn SandboxProvider>` and reach the protocol through this trait's
//! extension methods.

use std::time::Duration;

use async_trait::async_trait;
use fleetlift_core::model::{AgentResult, AgentStatus, SteeringDecision, Task};
use fleetlift_sandbox::{SandboxProvider, SandboxRef};
use tracing::warn;

use crate::control::ControlPaths;
use crate::files::ProtocolError;
use crate::staleness::is_stale;

/// Attempts/interval for in-sandbox reads, mirroring the sidecar's
/// FIFO-readiness loop (60 attempts, 2s apart).
const READ_MAX_ATTEMPTS: u32 = 60;
const READ_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait AgentProvider: SandboxProvider {
    async fn write_manifest(
        &self,
        id: &SandboxRef,
        paths: &ControlPaths,
        task: &Task,
    ) -> Result<(), ProtocolError> {
        write_json(self, id, &paths.manifest(), task).await
    }

    async fn read_status(
        &self,
        id: &SandboxRef,
        paths: &ControlPaths,
    ) -> Result<AgentStatus, ProtocolError> {
        read_json(self, id, &paths.status()).await
    }

    async fn read_result(
        &self,
        id: &SandboxRef,
        paths: &ControlPaths,
    ) -> Result<AgentResult, ProtocolError> {
        read_json(self, id, &paths.result()).await
    }

    async fn write_steering(
        &self,
        id: &SandboxRef,
        paths: &ControlPaths,
        decision: &SteeringDecision,
    ) -> Result<(), ProtocolError> {
        write_json(self, id, &paths.steering(), decision).await
    }

    /// True if the agent's last reported status is older than `threshold`:
    /// the workflow must fail the activity, not retry it.
    async fn is_agent_stale(
        &self,
        id: &SandboxRef,
        paths: &ControlPaths,
        threshold: Duration,
    ) -> Result<bool, ProtocolError> {
        let status = self.read_status(id, paths).await?;
        Ok(is_stale(&status, threshold))
    }
}

impl<T: SandboxProvider + ?Sized> AgentProvider for T {}

async fn write_json<T: serde::Serialize + Sync>(
    provider: &(impl SandboxProvider + ?Sized),
    id: &SandboxRef,
    dest_path: &str,
    value: &T,
) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp_path = format!("{dest_path}.tmp");
    provider
        .copy_to(id, Box::new(std::io::Cursor::new(body)), &tmp_path)
        .await?;
    provider
        .exec_shell(id, &format!("mv '{tmp_path}' '{dest_path}'"), None)
        .await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(
    provider: &(impl SandboxProvider + ?Sized),
    id: &SandboxRef,
    src_path: &str,
) -> Result<T, ProtocolError> {
    let mut last_err: Option<ProtocolError> = None;
    for attempt in 1..=READ_MAX_ATTEMPTS {
        match provider.copy_from(id, src_path).await {
            Ok(mut reader) => {
                let mut buf = Vec::new();
                tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf).await?;
                match serde_json::from_slice::<T>(&buf) {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        warn!(path = src_path, attempt, "control file parse failed, retrying");
                        last_err = Some(ProtocolError::Parse(e));
                    }
                }
            }
            Err(e) => last_err = Some(ProtocolError::Sandbox(e)),
        }
        tokio::time::sleep(READ_INTERVAL).await;
    }

    Err(last_err.unwrap_or(ProtocolError::Exhausted {
        path: src_path.to_string(),
        attempts: READ_MAX_ATTEMPTS,
    }))
}
