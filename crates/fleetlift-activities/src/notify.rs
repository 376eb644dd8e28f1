//! Chat notifications: posts to a Slack incoming webhook via `reqwest`,
//! a plain JSON client rather than a dedicated Slack SDK.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request to chat webhook failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

/// Posts `text` to the Slack incoming webhook at `webhook_url`. Failures
/// here are logged by the caller but never fail the workflow — a
/// notification is best-effort.
pub async fn slack_webhook(webhook_url: &str, text: &str) -> Result<(), NotifyError> {
    let client = reqwest::Client::new();
    client
        .post(webhook_url)
        .json(&SlackPayload { text })
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[must_use]
pub fn diff_summary_message(repo: &str, files_modified: &[String]) -> String {
    if files_modified.is_empty() {
        format!(":mag: *{repo}*: transformation produced no changes.")
    } else {
        format!(
            ":mag: *{repo}*: {} file(s) changed:\n```\n{}\n```",
            files_modified.len(),
            files_modified.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_summary_reports_file_count() {
        let msg = diff_summary_message("widgets", &["a.rs".into(), "b.rs".into()]);
        assert!(msg.contains("2 file(s) changed"));
    }

    #[test]
    fn diff_summary_handles_no_changes() {
        let msg = diff_summary_message("widgets", &[]);
        assert!(msg.contains("no changes"));
    }
}
