//! PR creation activity: runs git plumbing inside the sandbox via shell,
//! then opens the PR through the hosting provider's REST API. GitHub calls
//! go through `octocrab` (`Octocrab::builder().personal_token`,
//! `octocrab.pulls(...)`).

use fleetlift_core::model::{PullRequest, PullRequestConfig, Repository};
use fleetlift_sandbox::{SandboxProvider, SandboxRef};
use octocrab::Octocrab;
use thiserror::Error;
use tracing::info;

use crate::validation::{shell_single_quote, validate_ref, validate_url, ValidationError};

#[derive(Debug, Error)]
pub enum PrError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] fleetlift_sandbox::SandboxError),
    #[error("github API error: {0}")]
    GitHub(#[from] octocrab::Error),
    #[error("could not parse owner/repo out of '{0}'")]
    UnparsableRepo(String),
}

pub struct CreatePrInput<'a> {
    pub sandbox: &'a SandboxRef,
    pub workdir: &'a str,
    pub repo: &'a Repository,
    pub task_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub pr_config: &'a PullRequestConfig,
    pub github_token: &'a str,
}

/// Runs the full sequence: status check, branch, commit, push via
/// a sandbox-local credential helper, then opens the PR via REST. Returns
/// `Ok(None)` when there were no changes to commit.
pub async fn create_pr(
    provider: &dyn SandboxProvider,
    input: CreatePrInput<'_>,
) -> Result<Option<PullRequest>, PrError> {
    let status = provider
        .exec_shell(
            input.sandbox,
            &format!("cd {} && git status --porcelain", shell_single_quote(input.workdir)),
            None,
        )
        .await?;
    if status.stdout.trim().is_empty() {
        return Ok(None);
    }

    let branch = format!(
        "{}{}",
        input.pr_config.branch_prefix.clone().unwrap_or_else(|| "fix/claude-".to_string()),
        input.task_id
    );
    validate_ref(&branch)?;
    validate_url(&input.repo.url)?;

    let (owner, repo_name) = parse_owner_repo(&input.repo.url)
        .ok_or_else(|| PrError::UnparsableRepo(input.repo.url.clone()))?;

    configure_git_user(provider, input.sandbox, input.workdir).await?;

    // Single-quoted rather than a heredoc: a heredoc's terminator is a fixed
    // string, and a title/body line matching it would end the here-document
    // early and let the remainder of the task-supplied content run as shell.
    let commit_message = format!("{}\n\n{}", input.title, input.description);
    let commit_script = format!(
        "cd {workdir} && git checkout -b {branch} && git add -A && printf '%s' {message} | git commit -F -",
        workdir = shell_single_quote(input.workdir),
        branch = shell_single_quote(&branch),
        message = shell_single_quote(&commit_message),
    );
    let commit = provider.exec_shell(input.sandbox, &commit_script, None).await?;
    if commit.exit_code != 0 {
        return Err(PrError::Sandbox(fleetlift_sandbox::SandboxError::Exec(
            commit.stderr,
        )));
    }

    // GITHUB_TOKEN is expanded by the in-sandbox shell; it never appears in
    // the command string this activity sees or logs.
    let credential_script = format!(
        "umask 077 && cd {workdir} && git config credential.helper store && \
         printf 'https://x-access-token:%s@github.com\\n' \"$GITHUB_TOKEN\" > ~/.git-credentials && \
         git push -u origin {branch}",
        workdir = shell_single_quote(input.workdir),
        branch = shell_single_quote(&branch),
    );
    let push = provider
        .exec(
            input.sandbox,
            &["bash".to_string(), "-c".to_string(), credential_script],
            &[("GITHUB_TOKEN".to_string(), input.github_token.to_string())]
                .into_iter()
                .collect(),
            None,
            None,
            300,
        )
        .await?;
    if push.exit_code != 0 {
        return Err(PrError::Sandbox(fleetlift_sandbox::SandboxError::Exec(
            push.stderr,
        )));
    }

    let octocrab = Octocrab::builder()
        .personal_token(input.github_token.to_string())
        .build()?;

    let pr = octocrab
        .pulls(&owner, &repo_name)
        .create(input.title, &branch, &input.repo.branch)
        .body(input.description)
        .send()
        .await?;

    if !input.pr_config.labels.is_empty() {
        octocrab
            .issues(&owner, &repo_name)
            .add_labels(pr.number, &input.pr_config.labels)
            .await?;
    }
    if !input.pr_config.reviewers.is_empty() {
        octocrab
            .pulls(&owner, &repo_name)
            .request_reviews(pr.number, input.pr_config.reviewers.clone(), Vec::new())
            .await?;
    }

    info!(repo = %input.repo.url, pr = pr.number, "pull request opened");

    Ok(Some(PullRequest {
        repo: input.repo.effective_name(),
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        number: pr.number,
        branch,
        title: input.title.to_string(),
    }))
}

async fn configure_git_user(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    workdir: &str,
) -> Result<(), PrError> {
    let script = format!(
        "cd {workdir} && git config user.name \"${{GIT_AUTHOR_NAME:-fleetlift-bot}}\" && \
         git config user.email \"${{GIT_AUTHOR_EMAIL:-fleetlift-bot@users.noreply.github.com}}\"",
        workdir = shell_single_quote(workdir),
    );
    provider.exec_shell(id, &script, None).await?;
    Ok(())
}

// `create_pr` calls `validate_url` first, which only accepts the
// https/http/git/ssh URL schemes `url::Url` can parse, so `repo_url` is
// never in SCP shorthand (`git@github.com:acme/widgets.git`) form here.
fn parse_owner_repo(repo_url: &str) -> Option<(String, String)> {
    let cleaned = repo_url
        .trim_end_matches(".git")
        .replace("https://github.com/", "");
    let mut parts = cleaned.split('/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.to_string();
    Some((owner, repo))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_owner_repo_handles_https_url() {
        assert_eq!(
            parse_owner_repo("https://github.com/acme/widgets"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
    }
}
