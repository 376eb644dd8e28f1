//! Execute activity: for agentic tasks, hands the manifest to the
//! in-sandbox agent via the Agent Protocol and polls `status.json` to
//! completion, heartbeating every ~500ms; an agent whose status goes stale
//! is a non-retriable failure. Deterministic tasks instead run a single
//! hardened container invocation directly.

use std::time::Duration;

use fleetlift_core::model::{AgentResult, DeterministicExecution, Task};
use fleetlift_protocol::{AgentProvider, ControlPaths};
use fleetlift_sandbox::{SandboxError, SandboxProvider, SandboxRef};
use thiserror::Error;
use tracing::{info, warn};

use crate::validation::shell_single_quote;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const STALE_THRESHOLD: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("agent protocol error: {0}")]
    Protocol(#[from] fleetlift_protocol::ProtocolError),
    #[error("agent went stale awaiting completion")]
    Stale,
}

/// Runs a deterministic (container image) transformation directly in the
/// sandbox. No files changed ⇒ caller should short-circuit to an empty PR
/// list.
pub async fn run_deterministic(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    workdir: &str,
    det: &DeterministicExecution,
) -> Result<fleetlift_sandbox::ExecOutput, ExecuteError> {
    let joined_args: String = det.args.iter().map(|a| shell_single_quote(a)).collect::<Vec<_>>().join(" ");
    let script = format!(
        "cd {workdir} && docker run --rm --network none --cap-drop=ALL --read-only \
         --security-opt=no-new-privileges:true --tmpfs /tmp:rw,noexec,nosuid,size=512m \
         -v {workdir}:{workdir} -w {workdir} {image} {args}",
        workdir = shell_single_quote(workdir),
        image = shell_single_quote(&det.image),
        args = joined_args,
    );
    Ok(provider.exec_shell(id, &script, None).await?)
}

/// Drives an agentic execution end-to-end through the sidecar: writes the
/// manifest, then polls `status.json` until a terminal phase, and finally
/// reads `result.json`.
pub async fn run_agentic<P>(
    provider: &P,
    id: &SandboxRef,
    paths: &ControlPaths,
    task: &Task,
) -> Result<AgentResult, ExecuteError>
where
    P: AgentProvider + ?Sized,
{
    provider.write_manifest(id, paths, task).await?;
    info!(sandbox = %id, "manifest handed to sandboxed agent");

    loop {
        let status = provider.read_status(id, paths).await?;
        if fleetlift_protocol::is_stale(&status, STALE_THRESHOLD) {
            warn!(sandbox = %id, "agent status is stale, declaring it dead");
            return Err(ExecuteError::Stale);
        }
        if status.phase.is_terminal() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Ok(provider.read_result(id, paths).await?)
}
