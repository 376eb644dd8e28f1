//! Activity-composition-level integration tests: a hand-rolled mock
//! `SandboxProvider` stands in for a real container/pod backend, letting
//! these drive `execute`/`report`/`pr` end to end without a Kubernetes API
//! server. Scenarios that need full reconciler/dispatcher state (approval,
//! steering, multi-group failure thresholds) are covered instead by the
//! pure-function unit tests on the workflow crate's `dispatch`/`transform`
//! modules, since simulating those needs a live `kube::Client`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use fleetlift_activities::{execute, pr, report};
use fleetlift_core::model::{
    AgentPhase, AgentResult, AgentStatus, AgenticExecution, DeterministicExecution, Execution,
    PullRequestConfig, Repository, Task, TaskMode, TaskStatus,
};
use fleetlift_protocol::ControlPaths;
use fleetlift_sandbox::{
    ExecOutput, ProvisionOptions, SandboxError, SandboxPhase, SandboxProvider, SandboxRef,
    SandboxStatus,
};
use tokio::io::AsyncRead;

/// An in-memory sandbox: a path-keyed byte store plus a scripted shell
/// response table, enough to drive the activities without a real
/// container or pod.
struct MockSandbox {
    files: Mutex<HashMap<String, Vec<u8>>>,
    shell_responses: HashMap<String, ExecOutput>,
}

impl MockSandbox {
    fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            shell_responses: HashMap::new(),
        }
    }

    fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.lock().unwrap().insert(path.to_string(), contents.into());
        self
    }

    fn with_shell_response(mut self, command_contains: &str, output: ExecOutput) -> Self {
        self.shell_responses.insert(command_contains.to_string(), output);
        self
    }
}

fn parse_mv(command: &str) -> Option<(String, String)> {
    if !command.starts_with("mv '") {
        return None;
    }
    let parts: Vec<&str> = command.split('\'').collect();
    Some((parts.get(1)?.to_string(), parts.get(3)?.to_string()))
}

#[async_trait]
impl SandboxProvider for MockSandbox {
    async fn provision(&self, _opts: ProvisionOptions) -> Result<SandboxRef, SandboxError> {
        Ok(SandboxRef("mock-sandbox".to_string()))
    }

    async fn exec(
        &self,
        _id: &SandboxRef,
        _argv: &[String],
        _env: &HashMap<String, String>,
        _user: Option<&str>,
        _workdir: Option<&str>,
        _timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn exec_shell(
        &self,
        _id: &SandboxRef,
        command: &str,
        _user: Option<&str>,
    ) -> Result<ExecOutput, SandboxError> {
        if let Some((src, dst)) = parse_mv(command) {
            let mut files = self.files.lock().unwrap();
            if let Some(bytes) = files.remove(&src) {
                files.insert(dst, bytes);
            }
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        for (needle, response) in &self.shell_responses {
            if command.contains(needle) {
                return Ok(response.clone());
            }
        }

        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn copy_to(
        &self,
        _id: &SandboxRef,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        dest_path: &str,
    ) -> Result<(), SandboxError> {
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        self.files.lock().unwrap().insert(dest_path.to_string(), buf);
        Ok(())
    }

    async fn copy_from(
        &self,
        id: &SandboxRef,
        src_path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SandboxError> {
        let files = self.files.lock().unwrap();
        match files.get(src_path) {
            Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
            None => Err(SandboxError::NotFound(id.clone())),
        }
    }

    async fn status(&self, _id: &SandboxRef) -> Result<SandboxStatus, SandboxError> {
        Ok(SandboxStatus {
            phase: SandboxPhase::Running,
            message: String::new(),
        })
    }

    async fn cleanup(&self, _id: &SandboxRef) -> Result<(), SandboxError> {
        Ok(())
    }
}

fn base_task(execution: Execution) -> Task {
    Task {
        id: "task-1".to_string(),
        title: "bump lockfile".to_string(),
        description: String::new(),
        mode: TaskMode::Transform,
        repositories: vec![Repository {
            url: "https://github.com/acme/widgets".to_string(),
            branch: "main".to_string(),
            name: None,
            setup: Vec::new(),
        }],
        groups: Vec::new(),
        transformation: None,
        targets: Vec::new(),
        for_each: Vec::new(),
        execution,
        timeout: "30m".to_string(),
        require_approval: false,
        max_parallel: 5,
        max_steering_iterations: 5,
        pull_request: PullRequestConfig::default(),
        failure_policy: Default::default(),
        ticket_url: None,
        slack_channel: None,
        requester: None,
    }
}

/// Scenario 4: deterministic transformation with no changes. Expect zero
/// PRs because `git status --porcelain` reports a clean tree, and no
/// verifiers are invoked since the activity under test doesn't run them.
#[tokio::test]
async fn deterministic_no_op_yields_no_pull_request() {
    let sandbox = MockSandbox::new().with_shell_response("git status --porcelain", ExecOutput {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
    });
    let id = SandboxRef("mock-sandbox".to_string());
    let det = DeterministicExecution {
        image: "no-op:latest".to_string(),
        args: Vec::new(),
        env: HashMap::new(),
        verifiers: Vec::new(),
    };

    let exec_output = execute::run_deterministic(&sandbox, &id, "/workspace/widgets", &det)
        .await
        .expect("deterministic run should succeed");
    assert_eq!(exec_output.exit_code, 0);

    let repo = Repository {
        url: "https://github.com/acme/widgets".to_string(),
        branch: "main".to_string(),
        name: None,
        setup: Vec::new(),
    };
    let pr_config = PullRequestConfig::default();
    let result = pr::create_pr(
        &sandbox,
        pr::CreatePrInput {
            sandbox: &id,
            workdir: "/workspace/widgets",
            repo: &repo,
            task_id: "task-1",
            title: "no-op",
            description: "nothing changed",
            pr_config: &pr_config,
            github_token: "unused",
        },
    )
    .await
    .expect("create_pr should not error on a clean tree");

    assert!(result.is_none(), "a clean working tree must not open a pull request");
}

fn report_markdown(score_present: bool) -> String {
    if score_present {
        "---\nscore: 9\n---\nEverything checks out.\n".to_string()
    } else {
        "---\nnotes: looks fine\n---\nEverything checks out.\n".to_string()
    }
}

/// Scenario 6: forEach report mode with schema validation. The first
/// target's frontmatter satisfies the schema; the second is missing the
/// required `score` field and must carry a non-empty validation error.
#[tokio::test]
async fn for_each_report_validates_each_target_independently() {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["score"],
        "properties": { "score": { "type": "number" } }
    });

    let sandbox = MockSandbox::new()
        .with_file("/workspace/users-api/REPORT-users-api.md", report_markdown(true))
        .with_file("/workspace/orders-api/REPORT-orders-api.md", report_markdown(false));
    let id = SandboxRef("mock-sandbox".to_string());

    let valid_path = report::report_path("/workspace/users-api", Some("users-api"));
    let invalid_path = report::report_path("/workspace/orders-api", Some("orders-api"));

    let valid_report = report::collect_report(&sandbox, &id, &valid_path, Some(&schema))
        .await
        .expect("users-api report should parse");
    assert!(
        valid_report.validation_errors.is_empty(),
        "a report with a numeric score must satisfy the schema"
    );

    let invalid_report = report::collect_report(&sandbox, &id, &invalid_path, Some(&schema))
        .await
        .expect("orders-api report should still parse even though it fails schema validation");
    assert!(
        !invalid_report.validation_errors.is_empty(),
        "a report missing score must carry a validation error"
    );
}

/// Scenario 1: agentic happy path, no approval. The mock's control files
/// are pre-seeded as if the sidecar had already finished, so `run_agentic`
/// observes a terminal phase on its very first poll and returns without
/// sleeping through the poll loop.
#[tokio::test]
async fn agentic_happy_path_returns_completed_result() {
    let paths = ControlPaths::default();
    let status = AgentStatus {
        phase: AgentPhase::Complete,
        message: "done".to_string(),
        updated_at: Utc::now(),
        progress: Some(1.0),
    };
    let result = AgentResult {
        status: TaskStatus::Completed,
        files_modified: vec!["src/main.go".to_string()],
        file_statuses: Vec::new(),
        raw_diff: None,
        report: None,
        error: None,
    };

    let sandbox = MockSandbox::new()
        .with_file(
            &paths.status(),
            serde_json::to_vec(&status).expect("status serializes"),
        )
        .with_file(
            &paths.result(),
            serde_json::to_vec(&result).expect("result serializes"),
        );
    let id = SandboxRef("mock-sandbox".to_string());

    let task = base_task(Execution {
        agentic: Some(AgenticExecution {
            prompt: "upgrade the dependency".to_string(),
            verifiers: vec!["cargo test".to_string()],
            limits: Default::default(),
            output: None,
        }),
        deterministic: None,
    });

    let outcome = execute::run_agentic(&sandbox, &id, &paths, &task)
        .await
        .expect("agentic run should complete");

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.files_modified, vec!["src/main.go".to_string()]);
}
