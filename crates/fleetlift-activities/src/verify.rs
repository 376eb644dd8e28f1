//! Verifier and diff activities.

use fleetlift_sandbox::{SandboxError, SandboxProvider, SandboxRef};
use thiserror::Error;

use crate::validation::shell_single_quote;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("verifier '{command}' failed in {repo} (exit {exit_code}): {stderr}")]
    Failed {
        repo: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

/// Prefix marking a verifier's output section in combined output, so the CLI
/// can slice out a single verifier's output by index (`logs --verifier N`).
pub const VERIFIER_SECTION_MARKER: &str = "=== verifier";

/// Runs every verifier command in `workdir`, in order, failing fast on the
/// first non-zero exit: any verifier failing fails the workflow. Each
/// command's output is prefixed with a `VERIFIER_SECTION_MARKER` header
/// naming its index and command, so the combined output can later be sliced
/// back into per-verifier sections.
pub async fn run_verifiers(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    repo: &str,
    workdir: &str,
    verifiers: &[String],
) -> Result<String, VerifyError> {
    let mut combined_output = String::new();
    for (index, command) in verifiers.iter().enumerate() {
        let scoped = format!("cd {} && {command}", shell_single_quote(workdir));
        let result = provider.exec_shell(id, &scoped, None).await?;
        combined_output.push_str(&format!(
            "{VERIFIER_SECTION_MARKER} {index}: {command} ===\n"
        ));
        combined_output.push_str(&result.stdout);
        combined_output.push_str(&result.stderr);
        if result.exit_code != 0 {
            return Err(VerifyError::Failed {
                repo: repo.to_string(),
                command: command.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
    }
    Ok(combined_output)
}

/// Splits `combined` (as produced by [`run_verifiers`], possibly
/// concatenated across repositories by the caller) into the sections
/// introduced by each `VERIFIER_SECTION_MARKER` header, in verifier-index
/// order across however many repositories contributed to it.
#[must_use]
pub fn verifier_sections(combined: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in combined.split_inclusive('\n') {
        if line.starts_with(VERIFIER_SECTION_MARKER) && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

/// Returns the cached diff for `workdir`, as served by the query handlers
/// that expose the current diff and verifier output.
pub async fn get_diff(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    workdir: &str,
) -> Result<String, SandboxError> {
    let result = provider
        .exec_shell(id, &format!("cd {} && git diff", shell_single_quote(workdir)), None)
        .await?;
    Ok(result.stdout)
}

/// `true` if `git status --porcelain` reports no changes in `workdir`. A
/// non-zero exit (not a git repository, command not found, etc.) is never
/// treated as "no changes" — only a clean, successful status check is.
pub async fn has_no_changes(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    workdir: &str,
) -> Result<bool, SandboxError> {
    let result = provider
        .exec_shell(
            id,
            &format!("cd {} && git status --porcelain", shell_single_quote(workdir)),
            None,
        )
        .await?;
    Ok(result.exit_code == 0 && result.stdout.trim().is_empty())
}
