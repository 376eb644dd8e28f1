use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fleetlift_core::model::{
    AgentPhase, AgentResult, AgentStatus, SteeringAction, SteeringDecision, Task, TaskStatus,
};
use fleetlift_protocol::{retry_read_json, write_json_atomic, ControlPaths};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

mod manifest_wait;

#[derive(Clone)]
struct AppState {
    paths: ControlPaths,
    workspace: PathBuf,
    write_lock: Arc<Mutex<()>>,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    iteration: Arc<AtomicU32>,
    /// The running agent's stdin, set once `drive_agent` has spawned it.
    /// Writing a steering prompt here is this sidecar's equivalent of the
    /// teacher's FIFO-backed `/input` route — the prompt reaches the agent
    /// directly since this process owns the child, rather than crossing a
    /// named pipe to a sibling container.
    agent_stdin: Arc<Mutex<Option<ChildStdin>>>,
}

#[derive(Deserialize)]
struct SteerRequest {
    action: SteeringAction,
    #[serde(default)]
    prompt: Option<String>,
}

async fn handle_steer(
    State(state): State<AppState>,
    Json(payload): Json<SteerRequest>,
) -> impl IntoResponse {
    let _guard = state.write_lock.lock().await;

    let decision = SteeringDecision {
        action: payload.action,
        prompt: payload.prompt.clone(),
        iteration: state.iteration.fetch_add(1, Ordering::SeqCst),
        timestamp: Utc::now(),
    };

    let path = state.workspace.join(state.paths.steering());
    if let Err(e) = write_json_atomic(&path, &decision) {
        error!("failed to write steering.json: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to record decision");
    }

    if let (SteeringAction::Steer, Some(prompt)) = (decision.action, decision.prompt.as_deref()) {
        let mut stdin_guard = state.agent_stdin.lock().await;
        if let Some(stdin) = stdin_guard.as_mut() {
            if let Err(e) = stdin.write_all(format!("{prompt}\n").as_bytes()).await {
                warn!("failed to forward steering prompt to agent stdin: {e}");
            }
        } else {
            warn!("received a steer decision but no agent is currently attached");
        }
    }

    (StatusCode::OK, "steering decision recorded")
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    let mut guard = state.shutdown_tx.lock().await;
    if let Some(tx) = guard.take() {
        let _ = tx.send(());
        (StatusCode::OK, "shutting down")
    } else {
        (StatusCode::OK, "already shutting down")
    }
}

async fn write_status(path: &std::path::Path, phase: AgentPhase, message: &str, progress: Option<f64>) {
    let status = AgentStatus {
        phase,
        message: message.to_string(),
        updated_at: Utc::now(),
        progress,
    };
    if let Err(e) = write_json_atomic(path, &status) {
        error!("failed to write status.json: {e}");
    }
}

fn agentic_argv(cli_command: &str, prompt: &str) -> Vec<String> {
    match cli_command {
        "claude" => vec!["-p".to_string(), prompt.to_string()],
        _ => vec![prompt.to_string()],
    }
}

/// Drives the wrapped agent CLI (agentic mode) or container entrypoint
/// (deterministic mode) to completion, reporting progress through
/// `status.json` and writing `result.json` at the terminal phase — the
/// in-sandbox half of the agent-mode workflow.
async fn drive_agent(
    workspace: PathBuf,
    paths: ControlPaths,
    agent_stdin: Arc<Mutex<Option<ChildStdin>>>,
) {
    let manifest_path = workspace.join(paths.manifest());
    info!(path = %manifest_path.display(), "waiting for task manifest");

    let task: Task = match retry_read_json(&manifest_path, 60, Duration::from_secs(2)).await {
        Ok(task) => task,
        Err(e) => {
            error!("manifest never became available: {e}");
            return;
        }
    };

    let status_path = workspace.join(paths.status());
    let result_path = workspace.join(paths.result());

    write_status(&status_path, AgentPhase::Executing, "starting agent", Some(0.0)).await;

    let (program, args) = match &task.execution.deterministic {
        Some(det) => (det.image.clone(), det.args.clone()),
        None => {
            let agentic = task
                .execution
                .agentic
                .as_ref()
                .expect("Task::validate enforces exactly-one-of agentic/deterministic");
            let cli = std::env::var("AGENT_CLI_COMMAND").unwrap_or_else(|_| "claude".to_string());
            let args = agentic_argv(&cli, &agentic.prompt);
            (cli, args)
        }
    };

    let spawn_result = Command::new(&program)
        .args(&args)
        .current_dir(&workspace)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawn_result {
        Ok(child) => child,
        Err(e) => {
            error!("failed to spawn agent process {program}: {e}");
            write_status(&status_path, AgentPhase::Failed, &e.to_string(), None).await;
            let result = AgentResult {
                status: TaskStatus::Failed,
                files_modified: vec![],
                file_statuses: vec![],
                raw_diff: None,
                report: None,
                error: Some(e.to_string()),
            };
            let _ = write_json_atomic(&result_path, &result);
            return;
        }
    };

    *agent_stdin.lock().await = child.stdin.take();

    let wait_result = child.wait().await;
    *agent_stdin.lock().await = None;
    let workdirs = repo_workdirs(&task, &workspace);
    let files_modified = git_diff_names_all(&workdirs).await;
    let raw_diff = git_diff_all(&workdirs).await;

    match wait_result {
        Ok(exit) if exit.success() => {
            write_status(&status_path, AgentPhase::Complete, "agent finished", Some(1.0)).await;
            let result = AgentResult {
                status: TaskStatus::Completed,
                files_modified,
                file_statuses: vec![],
                raw_diff,
                report: None,
                error: None,
            };
            let _ = write_json_atomic(&result_path, &result);
        }
        Ok(exit) => {
            let message = format!("agent exited with {exit}");
            warn!(%message);
            write_status(&status_path, AgentPhase::Failed, &message, None).await;
            let result = AgentResult {
                status: TaskStatus::Failed,
                files_modified,
                file_statuses: vec![],
                raw_diff,
                report: None,
                error: Some(message),
            };
            let _ = write_json_atomic(&result_path, &result);
        }
        Err(e) => {
            error!("failed to wait on agent process: {e}");
            write_status(&status_path, AgentPhase::Failed, &e.to_string(), None).await;
        }
    }
}

/// Where each of the task's repositories was cloned, mirroring the clone
/// activity's own layout (`repo_workdirs` is the single source of truth for
/// this so the workflow and sidecar never disagree about it).
fn repo_workdirs(task: &Task, workspace: &std::path::Path) -> Vec<PathBuf> {
    task.repo_workdirs(&workspace.to_string_lossy())
        .into_iter()
        .map(|(_, dir)| PathBuf::from(dir))
        .collect()
}

async fn git_diff_names(workdir: &std::path::Path) -> Vec<String> {
    let output = Command::new("git")
        .args(["diff", "--name-only", "HEAD"])
        .current_dir(workdir)
        .output()
        .await;
    match output {
        Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout)
            .lines()
            .map(str::to_string)
            .collect(),
        _ => vec![],
    }
}

async fn git_diff(workdir: &std::path::Path) -> Option<String> {
    let output = Command::new("git")
        .args(["diff", "HEAD"])
        .current_dir(workdir)
        .output()
        .await
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        None
    }
}

/// Concatenates each repo's modified-file names, deduplicated in case a
/// transformation recipe and a target happen to share a relative path.
async fn git_diff_names_all(workdirs: &[PathBuf]) -> Vec<String> {
    let mut names = Vec::new();
    for dir in workdirs {
        for name in git_diff_names(dir).await {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Concatenates each repo's diff under a `--- {workdir} ---` header. `None`
/// only when every repo's diff came back empty.
async fn git_diff_all(workdirs: &[PathBuf]) -> Option<String> {
    let mut combined = String::new();
    for dir in workdirs {
        if let Some(diff) = git_diff(dir).await {
            if !diff.trim().is_empty() {
                combined.push_str(&format!("--- {} ---\n{diff}\n", dir.display()));
            }
        }
    }
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let workspace = PathBuf::from(
        std::env::var("FLEETLIFT_WORKSPACE").unwrap_or_else(|_| "/workspace".to_string()),
    );
    let control_dir = std::env::var("FLEETLIFT_CONTROL_DIR")
        .unwrap_or_else(|_| fleetlift_protocol::control::DEFAULT_CONTROL_DIR.to_string());
    let paths = ControlPaths::new(control_dir);

    let manifest_path = workspace.join(paths.manifest());
    let control_path = manifest_path
        .parent()
        .expect("manifest path always has a parent");
    if let Err(e) = manifest_wait::ensure_control_dir(control_path) {
        warn!("failed to ensure control directory exists: {e}");
    }

    info!(workspace = %workspace.display(), "starting fleetlift sidecar");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let agent_stdin = Arc::new(Mutex::new(None));
    let state = AppState {
        paths: paths.clone(),
        workspace: workspace.clone(),
        write_lock: Arc::new(Mutex::new(())),
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
        iteration: Arc::new(AtomicU32::new(0)),
        agent_stdin: agent_stdin.clone(),
    };

    let app = Router::new()
        .route("/steer", post(handle_steer))
        .route("/health", get(health_check))
        .route("/shutdown", post(shutdown))
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("sidecar listening on {addr}");

    tokio::spawn(drive_agent(workspace, paths, agent_stdin));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        .unwrap();
}
