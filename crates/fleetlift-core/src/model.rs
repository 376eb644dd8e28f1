//! Fleetlift's data model.
//!
//! Every type here crosses three boundaries — CLI YAML, Kubernetes CRD
//! JSON, and the Agent Protocol `manifest.json` — so everything derives
//! `Serialize + Deserialize + JsonSchema` to keep those representations
//! interchangeable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{FleetliftError, Result};

/// Execution mode for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    #[default]
    Transform,
    Report,
}

/// A single target repository.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Repository {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Derived from the URL basename when absent.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub setup: Vec<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Repository {
    /// Resolve the effective name, deriving it from the URL when absent.
    #[must_use]
    pub fn effective_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.url
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit('/')
            .next()
            .unwrap_or("repo")
            .to_string()
    }
}

/// A named entry for `forEach` iteration (report mode only).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ForEachTarget {
    pub name: String,
    #[serde(default)]
    pub context: String,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

/// Resource and timeout limits for an agentic execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgenticLimits {
    pub memory_bytes: Option<u64>,
    pub cpu_millis: Option<u32>,
}

/// The JSON-Schema-bearing output contract for a `report`-mode agentic run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputContract {
    pub schema: Option<serde_json::Value>,
}

/// A deterministic (container image) transformation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeterministicExecution {
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub verifiers: Vec<String>,
}

/// An agentic (natural-language prompt) transformation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgenticExecution {
    pub prompt: String,
    #[serde(default)]
    pub verifiers: Vec<String>,
    #[serde(default)]
    pub limits: AgenticLimits,
    #[serde(default)]
    pub output: Option<OutputContract>,
}

/// Exactly one of `agentic` or `deterministic`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Execution {
    pub agentic: Option<AgenticExecution>,
    pub deterministic: Option<DeterministicExecution>,
}

impl Execution {
    fn validate(&self) -> Result<()> {
        match (&self.agentic, &self.deterministic) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(FleetliftError::Validation(
                "execution must set exactly one of agentic or deterministic".into(),
            )),
        }
    }

    #[must_use]
    pub fn is_agentic(&self) -> bool {
        self.agentic.is_some()
    }
}

/// PR metadata template.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PullRequestConfig {
    pub branch_prefix: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
}

/// Action the group dispatcher takes when the failure threshold is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    Pause,
    Abort,
    Continue,
}

/// `{thresholdPercent, action, minCompleted}` group failure policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FailurePolicy {
    pub threshold_percent: f64,
    pub action: FailureAction,
    #[serde(default)]
    pub min_completed: u32,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold_percent: 100.0,
            action: FailureAction::Continue,
            min_completed: 0,
        }
    }
}

/// A group of repositories executed together in one sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RepoGroup {
    pub name: String,
    pub repositories: Vec<Repository>,
}

/// One submitted unit of work; one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: TaskMode,

    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub groups: Vec<RepoGroup>,
    /// Present in transformation-repo layout: the recipe repo URL.
    pub transformation: Option<Repository>,
    /// Present in transformation-repo layout: the target repos.
    #[serde(default)]
    pub targets: Vec<Repository>,

    #[serde(default)]
    pub for_each: Vec<ForEachTarget>,

    pub execution: Execution,

    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_true")]
    pub require_approval: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: u32,
    #[serde(default = "default_max_steering")]
    pub max_steering_iterations: u32,

    #[serde(default)]
    pub pull_request: PullRequestConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    pub ticket_url: Option<String>,
    pub slack_channel: Option<String>,
    pub requester: Option<String>,
}

fn default_timeout() -> String {
    "30m".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_parallel() -> u32 {
    5
}

fn default_max_steering() -> u32 {
    5
}

static NAME_RE: &str = r"^[A-Za-z0-9_-]+$";

impl Task {
    /// Validate task invariants. Rejects before any side effect.
    pub fn validate(&self) -> Result<()> {
        self.execution.validate()?;

        let has_repositories = !self.repositories.is_empty();
        let has_groups = !self.groups.is_empty();
        let has_targets = !self.targets.is_empty() || self.transformation.is_some();

        if has_groups && has_repositories {
            return Err(FleetliftError::Validation(
                "groups and repositories cannot coexist".into(),
            ));
        }

        if !self.targets.is_empty() && self.transformation.is_none() {
            return Err(FleetliftError::Validation(
                "targets requires transformation".into(),
            ));
        }

        let families = [has_repositories, has_groups, has_targets]
            .iter()
            .filter(|b| **b)
            .count();
        if families == 0 {
            return Err(FleetliftError::Validation(
                "one of repositories, groups, or transformation+targets is required".into(),
            ));
        }
        if families > 1 {
            return Err(FleetliftError::Validation(
                "repositories, groups, and transformation+targets are mutually exclusive".into(),
            ));
        }

        if !self.for_each.is_empty() && self.mode != TaskMode::Report {
            return Err(FleetliftError::Validation(
                "forEach requires mode=report".into(),
            ));
        }

        let re = regex::Regex::new(NAME_RE).expect("static regex is valid");
        for target in &self.for_each {
            if !re.is_match(&target.name) {
                return Err(FleetliftError::Validation(format!(
                    "forEach target name '{}' does not match {NAME_RE}",
                    target.name
                )));
            }
        }

        if self.max_parallel == 0 {
            return Err(FleetliftError::Validation(
                "max_parallel must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// All repositories this task will touch, in declared order, regardless
    /// of which mutually-exclusive family was used.
    #[must_use]
    pub fn effective_repositories(&self) -> Vec<Repository> {
        if !self.repositories.is_empty() {
            return self.repositories.clone();
        }
        if !self.groups.is_empty() {
            return self
                .groups
                .iter()
                .flat_map(|g| g.repositories.clone())
                .collect();
        }
        self.targets.clone()
    }

    #[must_use]
    pub fn is_multi_group(&self) -> bool {
        self.groups.len() > 1
    }

    /// Where each effective repository lands under `workspace_root`,
    /// mirroring the clone activity's own layout: a transformation recipe
    /// is relocated directly into `workspace_root` and its targets cloned
    /// under `{workspace_root}/targets/{name}`; every other layout clones
    /// each repository straight into `{workspace_root}/{name}`.
    #[must_use]
    pub fn repo_workdirs(&self, workspace_root: &str) -> Vec<(String, String)> {
        if self.transformation.is_some() {
            self.targets
                .iter()
                .map(|t| {
                    (
                        t.effective_name(),
                        format!("{workspace_root}/targets/{}", t.effective_name()),
                    )
                })
                .collect()
        } else {
            self.effective_repositories()
                .into_iter()
                .map(|r| (r.effective_name(), format!("{workspace_root}/{}", r.effective_name())))
                .collect()
        }
    }
}

/// Per-repository outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Success,
    Failed,
    Skipped,
}

/// An opened pull request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PullRequest {
    pub repo: String,
    pub url: String,
    pub number: u64,
    pub branch: String,
    pub title: String,
}

/// Frontmatter validation error with its instance path.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidationErrorEntry {
    pub instance_path: String,
    pub message: String,
}

/// A collected `REPORT.md` (or `REPORT-{target}.md`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    pub frontmatter: Option<serde_json::Value>,
    pub body: String,
    #[serde(default)]
    pub validation_errors: Vec<ValidationErrorEntry>,
}

/// Result of one `forEach` iteration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ForEachResult {
    pub target: String,
    pub report: Option<Report>,
    pub error: Option<String>,
}

/// Per-repository result, nested in `TaskResult`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RepoResult {
    pub repository: String,
    pub status: RepoStatus,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub pull_request: Option<PullRequest>,
    pub report: Option<Report>,
    #[serde(default)]
    pub for_each_results: Vec<ForEachResult>,
    pub error: Option<String>,
}

/// Overall workflow terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one group in a multi-group run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GroupResult {
    pub group: String,
    pub status: TaskStatus,
    pub repositories: Vec<RepoResult>,
}

/// The workflow's terminal output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub mode: TaskMode,
    #[serde(default)]
    pub repositories: Vec<RepoResult>,
    #[serde(default)]
    pub groups: Vec<GroupResult>,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// One round of the HITL steering loop.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SteeringEntry {
    pub iteration_number: u32,
    pub prompt: String,
    pub output: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Workflow-local, queryable steering state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SteeringState {
    pub current_iteration: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub history: Vec<SteeringEntry>,
}

/// Multi-group, queryable execution progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionProgress {
    pub total_groups: u32,
    pub completed_groups: u32,
    pub failed_groups: u32,
    pub failure_percent: f64,
    pub is_paused: bool,
    pub paused_reason: Option<String>,
    #[serde(default)]
    pub failed_group_names: Vec<String>,
}

impl ExecutionProgress {
    /// Recompute `failure_percent` from `failed_groups`/`completed_groups`:
    /// `failedGroups / completedGroups * 100` whenever `completedGroups > 0`.
    pub fn recompute_failure_percent(&mut self) {
        self.failure_percent = if self.completed_groups > 0 {
            f64::from(self.failed_groups) / f64::from(self.completed_groups) * 100.0
        } else {
            0.0
        };
    }
}

/// Sidecar agent lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Pending,
    Executing,
    AwaitingInput,
    Complete,
    Failed,
    Cancelled,
}

impl AgentPhase {
    /// Terminal phases are always treated as matches when waiting for any
    /// phase set.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentPhase::Complete | AgentPhase::Failed | AgentPhase::Cancelled)
    }
}

/// Polled sidecar status (`status.json`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    #[serde(default)]
    pub message: String,
    pub updated_at: DateTime<Utc>,
    pub progress: Option<f64>,
}

/// Per-file change status reported by the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileStatus {
    pub path: String,
    pub change: String,
}

/// Terminal sidecar output (`result.json`), read once.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub file_statuses: Vec<FileStatus>,
    pub raw_diff: Option<String>,
    pub report: Option<Report>,
    pub error: Option<String>,
}

/// A steering/approval decision delivered by an external actor
/// (`steering.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SteeringAction {
    Steer,
    Approve,
    Reject,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SteeringDecision {
    pub action: SteeringAction,
    pub prompt: Option<String>,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> Task {
        Task {
            id: "t1".into(),
            title: "title".into(),
            description: String::new(),
            mode: TaskMode::Transform,
            repositories: vec![Repository {
                url: "https://github.com/acme/widgets".into(),
                branch: default_branch(),
                name: None,
                setup: vec![],
            }],
            groups: vec![],
            transformation: None,
            targets: vec![],
            for_each: vec![],
            execution: Execution {
                agentic: Some(AgenticExecution {
                    prompt: "do the thing".into(),
                    verifiers: vec![],
                    limits: AgenticLimits::default(),
                    output: None,
                }),
                deterministic: None,
            },
            timeout: default_timeout(),
            require_approval: true,
            max_parallel: default_max_parallel(),
            max_steering_iterations: default_max_steering(),
            pull_request: PullRequestConfig::default(),
            failure_policy: FailurePolicy::default(),
            ticket_url: None,
            slack_channel: None,
            requester: None,
        }
    }

    #[test]
    fn validate_accepts_single_repo_agentic_task() {
        assert!(base_task().validate().is_ok());
    }

    #[test]
    fn validate_rejects_both_groups_and_repositories() {
        let mut task = base_task();
        task.groups.push(RepoGroup {
            name: "g1".into(),
            repositories: vec![],
        });
        assert!(task.validate().is_err());
    }

    #[test]
    fn validate_rejects_targets_without_transformation() {
        let mut task = base_task();
        task.repositories.clear();
        task.targets.push(Repository {
            url: "https://github.com/acme/target".into(),
            branch: default_branch(),
            name: None,
            setup: vec![],
        });
        assert!(task.validate().is_err());
    }

    #[test]
    fn validate_rejects_for_each_outside_report_mode() {
        let mut task = base_task();
        task.for_each.push(ForEachTarget {
            name: "users-api".into(),
            context: String::new(),
            fields: HashMap::new(),
        });
        assert!(task.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_for_each_name() {
        let mut task = base_task();
        task.mode = TaskMode::Report;
        task.for_each.push(ForEachTarget {
            name: "users/../api".into(),
            context: String::new(),
            fields: HashMap::new(),
        });
        assert!(task.validate().is_err());
    }

    #[test]
    fn validate_rejects_both_execution_kinds() {
        let mut task = base_task();
        task.execution.deterministic = Some(DeterministicExecution {
            image: "no-op:latest".into(),
            args: vec![],
            env: HashMap::new(),
            verifiers: vec![],
        });
        assert!(task.validate().is_err());
    }

    #[test]
    fn effective_name_derives_from_url() {
        let repo = Repository {
            url: "https://github.com/acme/widgets.git".into(),
            branch: default_branch(),
            name: None,
            setup: vec![],
        };
        assert_eq!(repo.effective_name(), "widgets");
    }

    #[test]
    fn round_trip_yaml_is_stable() {
        let task = base_task();
        let yaml = serde_yaml::to_string(&task).unwrap();
        let parsed: Task = serde_yaml::from_str(&yaml).unwrap();
        let yaml2 = serde_yaml::to_string(&parsed).unwrap();
        assert_eq!(yaml, yaml2);
    }

    #[test]
    fn execution_progress_recomputes_percent() {
        let mut progress = ExecutionProgress {
            total_groups: 4,
            completed_groups: 3,
            failed_groups: 2,
            ..Default::default()
        };
        progress.recompute_failure_percent();
        assert!((progress.failure_percent - 66.666_666_666_666_66).abs() < 1e-9);
    }
}
