//! Clone & setup activity: clones each repository into
//! the sandbox workspace, runs its `setup[]` commands, and — in
//! transformation-repo layout — relocates the recipe repo's contents
//! (including dotfiles) into `/workspace` before cloning targets under
//! `/workspace/targets/{name}`.

use fleetlift_core::model::Repository;
use fleetlift_sandbox::{SandboxError, SandboxProvider, SandboxRef};
use thiserror::Error;
use tracing::info;

use fleetlift_protocol::control::DEFAULT_WORKSPACE;

use crate::validation::{shell_single_quote, validate_ref, validate_url, ValidationError};

#[derive(Debug, Error)]
pub enum CloneError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("clone failed for {repo}: {stderr}")]
    CloneFailed { repo: String, stderr: String },
    #[error("setup command '{command}' failed in {repo}: {stderr}")]
    SetupFailed {
        repo: String,
        command: String,
        stderr: String,
    },
}

const WORKSPACE: &str = DEFAULT_WORKSPACE;

async fn run(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    script: &str,
) -> Result<fleetlift_sandbox::ExecOutput, SandboxError> {
    provider.exec_shell(id, script, None).await
}

/// Clones `repo` into `dest` and runs its setup commands there. `depth`
/// is the `--depth` passed to `git clone`; `0` means a full clone (no
/// `--depth` flag at all).
pub async fn clone_repo(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    repo: &Repository,
    dest: &str,
    depth: u32,
) -> Result<(), CloneError> {
    validate_url(&repo.url)?;
    validate_ref(&repo.branch)?;

    let depth_flag = if depth == 0 {
        String::new()
    } else {
        format!("--depth {depth} ")
    };
    let clone_script = format!(
        "git clone --branch {branch} {depth_flag}{url} {dest}",
        branch = shell_single_quote(&repo.branch),
        url = shell_single_quote(&repo.url),
        dest = shell_single_quote(dest),
    );
    let result = run(provider, id, &clone_script).await?;
    if result.exit_code != 0 {
        return Err(CloneError::CloneFailed {
            repo: repo.effective_name(),
            stderr: result.stderr,
        });
    }

    for command in &repo.setup {
        let scoped = format!("cd {} && {command}", shell_single_quote(dest));
        let result = run(provider, id, &scoped).await?;
        if result.exit_code != 0 {
            return Err(CloneError::SetupFailed {
                repo: repo.effective_name(),
                command: command.clone(),
                stderr: result.stderr,
            });
        }
    }

    info!(repo = %repo.url, dest, "repository cloned and set up");
    Ok(())
}

/// Transformation-repo layout: clone the recipe to a
/// temp path, move all entries (including dotfiles) into `/workspace`,
/// then clone each target under `/workspace/targets/{name}`.
pub async fn clone_transformation_layout(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    transformation: &Repository,
    targets: &[Repository],
    depth: u32,
) -> Result<(), CloneError> {
    let tmp_dest = "/tmp/fleetlift-recipe";
    clone_repo(provider, id, transformation, tmp_dest, depth).await?;

    // `mv` can't move a directory's dotfiles into an existing directory in
    // one call portably, so move `.`-prefixed and regular entries
    // separately via a shell glob that tolerates either being empty.
    let move_script = format!(
        "shopt -s dotglob nullglob 2>/dev/null; mv {tmp_dest}/* {workspace}/",
        tmp_dest = tmp_dest,
        workspace = WORKSPACE,
    );
    let result = run(provider, id, &move_script).await?;
    if result.exit_code != 0 {
        return Err(CloneError::CloneFailed {
            repo: transformation.effective_name(),
            stderr: result.stderr,
        });
    }

    for target in targets {
        let dest = format!("{WORKSPACE}/targets/{}", target.effective_name());
        clone_repo(provider, id, target, &dest, depth).await?;
    }

    Ok(())
}

/// Writes a generated `AGENTS.md` describing the task into `/workspace`.
pub async fn write_agents_md(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    content: &str,
) -> Result<(), SandboxError> {
    provider
        .copy_to(
            id,
            Box::new(std::io::Cursor::new(content.as_bytes().to_vec())),
            &format!("{WORKSPACE}/AGENTS.md"),
        )
        .await
}

#[must_use]
pub fn render_agents_md(title: &str, description: &str, repos: &[Repository]) -> String {
    let mut out = format!("# {title}\n\n{description}\n\n## Repositories\n\n");
    for repo in repos {
        out.push_str(&format!("- {} ({})\n", repo.effective_name(), repo.url));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_agents_md_lists_every_repo() {
        let repos = vec![Repository {
            url: "https://github.com/acme/widgets".into(),
            branch: "main".into(),
            name: None,
            setup: vec![],
        }];
        let md = render_agents_md("Bump deps", "Upgrade to latest", &repos);
        assert!(md.contains("widgets"));
        assert!(md.contains("Bump deps"));
    }
}
