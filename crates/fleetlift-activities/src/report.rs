//! Report collection & schema validation activity: extract a
//! tar-streamed `REPORT.md` out of the sandbox, parse its YAML frontmatter,
//! and validate it with `jsonschema` against the task's output contract.

use fleetlift_core::model::{Report, ValidationErrorEntry};
use fleetlift_sandbox::{SandboxError, SandboxProvider, SandboxRef};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report file not found at {0}")]
    NotFound(String),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("io error reading report stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Path of the report file for `repo`, or `REPORT-{target}.md` in a
/// `forEach` iteration.
#[must_use]
pub fn report_path(repo_workdir: &str, target: Option<&str>) -> String {
    match target {
        Some(target) => format!("{repo_workdir}/REPORT-{target}.md"),
        None => format!("{repo_workdir}/REPORT.md"),
    }
}

/// Collects and parses a report. Missing-file and parse errors are
/// returned to the caller to surface as a per-repo `error` rather than
/// failing the whole workflow: a missing or invalid report is a partial
/// failure, not a reason to fail every other repository's run.
pub async fn collect_report(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    path: &str,
    schema: Option<&serde_json::Value>,
) -> Result<Report, ReportError> {
    let mut reader = provider
        .copy_from(id, path)
        .await
        .map_err(|e| match e {
            SandboxError::NotFound(_) => ReportError::NotFound(path.to_string()),
            other => ReportError::Sandbox(other),
        })?;

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    let text = String::from_utf8_lossy(&bytes);

    let (frontmatter, body) = split_frontmatter(&text);
    let mut validation_errors = Vec::new();

    if let (Some(fm), Some(schema_value)) = (&frontmatter, schema) {
        validation_errors = validate_against_schema(fm, schema_value);
    }

    Ok(Report {
        frontmatter,
        body: body.trim().to_string(),
        validation_errors,
    })
}

/// Splits `---`-delimited YAML frontmatter from the trailing Markdown body.
fn split_frontmatter(text: &str) -> (Option<serde_json::Value>, String) {
    let trimmed = text.trim_start();
    if !trimmed.starts_with("---") {
        return (None, text.to_string());
    }

    let rest = &trimmed[3..];
    let Some(end) = rest.find("\n---") else {
        return (None, text.to_string());
    };

    let frontmatter_yaml = &rest[..end];
    let body = &rest[end + 4..];

    match serde_yaml::from_str::<serde_json::Value>(frontmatter_yaml) {
        Ok(value) => (Some(value), body.to_string()),
        Err(e) => {
            warn!("failed to parse report frontmatter: {e}");
            (None, text.to_string())
        }
    }
}

fn validate_against_schema(
    instance: &serde_json::Value,
    schema: &serde_json::Value,
) -> Vec<ValidationErrorEntry> {
    let Ok(compiled) = jsonschema::validator_for(schema) else {
        warn!("output schema failed to compile, skipping validation");
        return Vec::new();
    };

    compiled
        .iter_errors(instance)
        .map(|e| ValidationErrorEntry {
            instance_path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_frontmatter_extracts_yaml_and_body() {
        let text = "---\ntitle: hello\ncount: 3\n---\nBody text here.\n";
        let (fm, body) = split_frontmatter(text);
        let fm = fm.expect("frontmatter should parse");
        assert_eq!(fm["title"], "hello");
        assert_eq!(fm["count"], 3);
        assert_eq!(body.trim(), "Body text here.");
    }

    #[test]
    fn split_frontmatter_handles_missing_frontmatter() {
        let text = "Just a plain report.\n";
        let (fm, body) = split_frontmatter(text);
        assert!(fm.is_none());
        assert_eq!(body.trim(), "Just a plain report.");
    }

    #[test]
    fn validate_against_schema_reports_instance_paths() {
        let schema = serde_json::json!({
            "type": "object",
            "required": ["status"],
            "properties": { "status": { "type": "string" } }
        });
        let instance = serde_json::json!({ "status": 5 });
        let errors = validate_against_schema(&instance, &schema);
        assert!(!errors.is_empty());
        assert_eq!(errors[0].instance_path, "/status");
    }

    #[test]
    fn report_path_includes_target_when_present() {
        assert_eq!(report_path("/workspace/widgets", None), "/workspace/widgets/REPORT.md");
        assert_eq!(
            report_path("/workspace/widgets", Some("users-api")),
            "/workspace/widgets/REPORT-users-api.md"
        );
    }
}
