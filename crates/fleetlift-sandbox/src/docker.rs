//! Local-container `SandboxProvider`, backed by the `docker` CLI.
//!
//! Shells out to `docker` rather than binding the Docker Engine API
//! directly, matching the corpus's habit of driving external CLI tools
//! from async Rust (`tokio::process::Command` + captured stdout/stderr)
//! instead of vendoring a client library for every external system.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::provider::{
    ExecOutput, NetworkPolicy, ProvisionError, ProvisionOptions, SandboxError, SandboxPhase,
    SandboxProvider, SandboxRef, SandboxStatus,
};

pub struct DockerProvider {
    binary: String,
}

impl Default for DockerProvider {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, args: &[String]) -> Result<ExecOutput, SandboxError> {
        debug!(args = ?args, "running docker command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandboxError::Exec(format!("failed to spawn docker: {e}")))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Security hardening flags for deterministic-mode execution.
fn hardening_args() -> Vec<String> {
    vec![
        "--network".to_string(),
        "none".to_string(),
        "--cap-drop=ALL".to_string(),
        "--read-only".to_string(),
        "--security-opt=no-new-privileges:true".to_string(),
        "--tmpfs".to_string(),
        "/tmp:rw,noexec,nosuid,size=512m".to_string(),
    ]
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    #[instrument(skip(self, opts), fields(image = %opts.image))]
    async fn provision(&self, opts: ProvisionOptions) -> Result<SandboxRef, SandboxError> {
        let name = format!("fleetlift-{}", opts.task_attempt_id);

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.clone(),
            "-w".to_string(),
            opts.working_dir.clone(),
            "--memory".to_string(),
            opts.memory_limit_bytes.to_string(),
            "--cpu-quota".to_string(),
            opts.cpu_quota.to_string(),
            "--cpu-period".to_string(),
            "100000".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
        ];

        match opts.network {
            NetworkPolicy::None => args.extend(["--network".to_string(), "none".to_string()]),
            NetworkPolicy::Host => args.extend(["--network".to_string(), "host".to_string()]),
            NetworkPolicy::Bridge => {}
        }

        if opts.hardened {
            args.extend(hardening_args());
        }

        for (k, v) in &opts.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }

        args.push(opts.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        let result = self.run(&args).await?;
        if result.exit_code != 0 {
            return Err(SandboxError::Provision(ProvisionError::CreationFailed(
                result.stderr,
            )));
        }

        info!(container = %name, "sandbox provisioned");
        Ok(SandboxRef(name))
    }

    #[instrument(skip(self, env), fields(sandbox = %id))]
    async fn exec(
        &self,
        id: &SandboxRef,
        argv: &[String],
        env: &HashMap<String, String>,
        user: Option<&str>,
        workdir: Option<&str>,
        timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError> {
        let mut args = vec!["exec".to_string()];
        if let Some(u) = user {
            args.push("-u".to_string());
            args.push(u.to_string());
        }
        if let Some(w) = workdir {
            args.push("-w".to_string());
            args.push(w.to_string());
        }
        for (k, v) in env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        args.push(id.0.clone());
        args.extend(argv.iter().cloned());

        match tokio::time::timeout(Duration::from_secs(timeout_secs), self.run(&args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(sandbox = %id, "exec timed out");
                Err(SandboxError::Exec(format!(
                    "exec timed out after {timeout_secs}s"
                )))
            }
        }
    }

    #[instrument(skip(self, reader), fields(sandbox = %id))]
    async fn copy_to(
        &self,
        id: &SandboxRef,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        dest_path: &str,
    ) -> Result<(), SandboxError> {
        let mut child = Command::new(&self.binary)
            .args(["cp", "-", &format!("{}:{}", id.0, dest_path)])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Copy(format!("failed to spawn docker cp: {e}")))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        stdin
            .write_all(&buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        if !status.success() {
            return Err(SandboxError::Copy(format!(
                "docker cp exited with {status}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn copy_from(
        &self,
        id: &SandboxRef,
        src_path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SandboxError> {
        let output = Command::new(&self.binary)
            .args(["cp", &format!("{}:{}", id.0, src_path), "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SandboxError::Copy(format!("failed to spawn docker cp: {e}")))?;

        if !output.status.success() {
            return Err(SandboxError::Copy(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(Box::new(std::io::Cursor::new(output.stdout)))
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn status(&self, id: &SandboxRef) -> Result<SandboxStatus, SandboxError> {
        let result = self
            .run(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.Status}}".to_string(),
                id.0.clone(),
            ])
            .await?;

        if result.exit_code != 0 {
            return Ok(SandboxStatus {
                phase: SandboxPhase::Gone,
                message: result.stderr,
            });
        }

        let phase = match result.stdout.trim() {
            "running" => SandboxPhase::Running,
            "created" => SandboxPhase::Provisioning,
            _ => SandboxPhase::Stopped,
        };
        Ok(SandboxStatus {
            phase,
            message: result.stdout.trim().to_string(),
        })
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn cleanup(&self, id: &SandboxRef) -> Result<(), SandboxError> {
        let result = self
            .run(&["rm".to_string(), "-f".to_string(), id.0.clone()])
            .await?;

        // Idempotent: docker rm on a missing container exits non-zero but
        // that is not a cleanup failure.
        if result.exit_code != 0 && !result.stderr.contains("No such container") {
            warn!(sandbox = %id, stderr = %result.stderr, "cleanup reported an error");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardening_args_include_no_new_privileges() {
        let args = hardening_args();
        assert!(args.contains(&"--security-opt=no-new-privileges:true".to_string()));
        assert!(args.contains(&"--cap-drop=ALL".to_string()));
    }
}
