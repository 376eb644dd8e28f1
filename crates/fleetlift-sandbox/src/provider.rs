//! The `SandboxProvider` contract.
//!
//! A polymorphic capability with variants `{local-container, remote-pod}`.
//! Workflow code never names a concrete implementation — it is handed an
//! `Arc<dyn SandboxProvider>` built by [`crate::factory::SandboxProviderFactory`]
//! at worker startup via dynamic dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Opaque handle returned by [`SandboxProvider::provision`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxRef(pub String);

impl std::fmt::Display for SandboxRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create sandbox: {0}")]
    CreationFailed(String),
    #[error("image pull failed: {0}")]
    ImagePullFailed(String),
    #[error("resource limits rejected: {0}")]
    ResourceLimitsRejected(String),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("exec failed: {0}")]
    Exec(String),
    #[error("copy failed: {0}")]
    Copy(String),
    #[error("sandbox not found: {0}")]
    NotFound(SandboxRef),
}

/// Network mode applied to a provisioned sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPolicy {
    None,
    Bridge,
    Host,
}

/// Inputs to [`SandboxProvider::provision`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionOptions {
    pub image: String,
    pub working_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Bytes.
    pub memory_limit_bytes: u64,
    /// 1/100000-CPU units.
    pub cpu_quota: u32,
    pub network: NetworkPolicy,
    pub timeout_secs: u64,
    /// Unique per attempt, so retried `Provision` calls never collide even
    /// though the provider itself need not be idempotent.
    pub task_attempt_id: String,
    /// Security hardening flags applied for deterministic-mode runs:
    /// `--network none --cap-drop=ALL --read-only
    /// --security-opt=no-new-privileges:true --tmpfs
    /// /tmp:rw,noexec,nosuid,size=512m`.
    pub hardened: bool,
}

/// Output of [`SandboxProvider::exec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Lifecycle phase reported by [`SandboxProvider::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxPhase {
    Provisioning,
    Running,
    Stopped,
    Gone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub phase: SandboxPhase,
    pub message: String,
}

/// A polymorphic capability that provisions an isolated compute context,
/// executes shell commands in it, copies files in/out, reports status, and
/// destroys it.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn provision(&self, opts: ProvisionOptions) -> Result<SandboxRef, SandboxError>;

    async fn exec(
        &self,
        id: &SandboxRef,
        argv: &[String],
        env: &HashMap<String, String>,
        user: Option<&str>,
        workdir: Option<&str>,
        timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError>;

    /// Convenience wrapping `{bash, -c, command}`.
    async fn exec_shell(
        &self,
        id: &SandboxRef,
        command: &str,
        user: Option<&str>,
    ) -> Result<ExecOutput, SandboxError> {
        self.exec(
            id,
            &["bash".to_string(), "-c".to_string(), command.to_string()],
            &HashMap::new(),
            user,
            None,
            300,
        )
        .await
    }

    /// Streams a tar archive's bytes into `dest_path` inside the sandbox.
    async fn copy_to(
        &self,
        id: &SandboxRef,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        dest_path: &str,
    ) -> Result<(), SandboxError>;

    /// Returns a reader yielding the file's raw bytes. The caller is
    /// responsible for any container-specific envelope.
    async fn copy_from(
        &self,
        id: &SandboxRef,
        src_path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SandboxError>;

    async fn status(&self, id: &SandboxRef) -> Result<SandboxStatus, SandboxError>;

    /// Must be idempotent and succeed if the sandbox is already gone.
    async fn cleanup(&self, id: &SandboxRef) -> Result<(), SandboxError>;
}
