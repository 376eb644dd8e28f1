//! The `TransformRun` reconciler — the transform workflow, realized as a
//! `match status.phase` dispatch in a status-first idempotent reconcile
//! style. Each arm performs the activity that phase names and persists
//! whichever phase comes next; a reconcile call never blocks past an
//! activity's own retry budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use fleetlift_activities::{clone, execute, notify, pr, report, validation, verify, with_retry};
use fleetlift_core::config::{parse_duration_secs, NetworkMode};
use fleetlift_core::model::{
    AgentResult, Execution, ForEachResult, ForEachTarget, RepoResult, RepoStatus, SteeringEntry,
    Task, TaskMode, TaskResult, TaskStatus,
};
use fleetlift_core::FleetliftError;
use fleetlift_protocol::ControlPaths;
use fleetlift_sandbox::{NetworkPolicy, ProvisionOptions, SandboxProvider, SandboxRef};

use crate::classify;
use crate::context::{Context, Error, Result, TRANSFORM_FINALIZER_NAME};
use crate::crds::{TransformRun, TransformRunStatus};
use crate::driver::Driver;
use crate::phases::TransformPhase;
use crate::signals::{is_fresh, SignalKind};

/// Entry point registered with `kube::runtime::Controller`.
#[instrument(skip(tr, ctx), fields(transform_run = %tr.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile(tr: Arc<TransformRun>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    finalizer(&api, TRANSFORM_FINALIZER_NAME, tr.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(tr) => reconcile_apply(&tr, &ctx).await,
            FinalizerEvent::Cleanup(tr) => reconcile_cleanup(&tr, &ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        kube::runtime::finalizer::Error::ApplyFailed(err)
        | kube::runtime::finalizer::Error::CleanupFailed(err) => err,
        kube::runtime::finalizer::Error::AddFinalizer(e)
        | kube::runtime::finalizer::Error::RemoveFinalizer(e) => Error::Kube(e),
        kube::runtime::finalizer::Error::UnnamedObject => Error::MissingObjectKey,
        kube::runtime::finalizer::Error::InvalidFinalizer => {
            Error::Activity("invalid finalizer name".to_string())
        }
    })
}

#[must_use]
pub fn error_policy(_tr: Arc<TransformRun>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "TransformRun reconciliation failed, requeueing");
    Action::requeue(Duration::from_secs(30))
}

/// Runs the `TransformRun` controller until cancelled, mirroring
/// `run_code_controller`'s `Controller::new(...).run(...).for_each(...)`.
pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let api: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    Controller::new(api, WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(r) => debug!(?r, "TransformRun reconciled"),
                Err(e) => warn!(error = ?e, "TransformRun reconciliation error"),
            }
        })
        .await;
    Ok(())
}

async fn reconcile_apply(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let phase = tr.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    if let Err(e) = tr.spec.task.validate() {
        fail(tr, ctx, &format!("task validation failed: {e}")).await?;
        return Ok(Action::await_change());
    }

    match phase {
        TransformPhase::Pending => step_register(tr, ctx).await,
        TransformPhase::Provisioning => step_provision(tr, ctx).await,
        TransformPhase::Cloning => step_clone(tr, ctx).await,
        TransformPhase::Running => step_run(tr, ctx).await,
        TransformPhase::AwaitingApproval => step_awaiting_approval(tr, ctx).await,
        TransformPhase::CreatingPrs => step_finalize(tr, ctx).await,
        TransformPhase::Completed | TransformPhase::Failed | TransformPhase::Cancelled => {
            Ok(Action::await_change())
        }
    }
}

/// Cleanup always runs via the finalizer, deletion or not — the
/// `kube`-native equivalent of deferring cleanup on a disconnected context
/// so it runs even if the workflow is cancelled.
async fn reconcile_cleanup(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    if let Some(sandbox_ref) = tr.status.as_ref().and_then(|s| s.sandbox_ref.clone()) {
        let id = SandboxRef(sandbox_ref);
        let provider = ctx.sandbox_provider.clone();
        let outcome = with_retry("cleanup", 3, || {
            let provider = provider.clone();
            let id = id.clone();
            async move {
                provider
                    .cleanup(&id)
                    .await
                    .map_err(|e| FleetliftError::Infrastructure(e.to_string()))
            }
        })
        .await;
        if let Err(e) = outcome {
            // Cleanup errors are logged but never mask an earlier failure.
            warn!(error = %e, sandbox = %id, "sandbox cleanup failed");
        }
    }
    Ok(Action::await_change())
}

fn duration_since(started: Option<DateTime<Utc>>) -> f64 {
    started
        .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0)
}

async fn patch_status<F>(tr: &TransformRun, ctx: &Context, f: F) -> Result<()>
where
    F: FnOnce(&mut TransformRunStatus),
{
    let api: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let mut status = tr.status.clone().unwrap_or_default();
    f(&mut status);
    status.updated_at = Some(Utc::now());
    api.patch_status(
        &tr.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

async fn clear_pending_signal(tr: &TransformRun, ctx: &Context) -> Result<()> {
    let api: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    api.patch(
        &tr.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "spec": { "pendingSignal": null } })),
    )
    .await?;
    Ok(())
}

async fn fail(tr: &TransformRun, ctx: &Context, message: &str) -> Result<()> {
    warn!(task_id = %tr.spec.task.id, message, "TransformRun failed");
    let task_id = tr.spec.task.id.clone();
    let mode = tr.spec.task.mode;
    let message = message.to_string();
    patch_status(tr, ctx, |s| {
        let duration = duration_since(s.started_at);
        s.phase = TransformPhase::Failed;
        s.message = message.clone();
        s.finished_at = Some(Utc::now());
        s.result = Some(TaskResult {
            task_id,
            status: TaskStatus::Failed,
            mode,
            repositories: vec![],
            groups: vec![],
            duration_seconds: duration,
            error: Some(message),
        });
    })
    .await
}

async fn cancel(tr: &TransformRun, ctx: &Context, message: &str) -> Result<()> {
    info!(task_id = %tr.spec.task.id, message, "TransformRun cancelled");
    let task_id = tr.spec.task.id.clone();
    let mode = tr.spec.task.mode;
    let message = message.to_string();
    patch_status(tr, ctx, |s| {
        let duration = duration_since(s.started_at);
        s.phase = TransformPhase::Cancelled;
        s.message = message.clone();
        s.finished_at = Some(Utc::now());
        s.result = Some(TaskResult {
            task_id,
            status: TaskStatus::Cancelled,
            mode,
            repositories: vec![],
            groups: vec![],
            duration_seconds: duration,
            error: Some(message),
        });
    })
    .await
}

async fn complete_with_no_changes(tr: &TransformRun, ctx: &Context) -> Result<()> {
    let task = &tr.spec.task;
    let task_id = task.id.clone();
    let mode = task.mode;
    let repositories: Vec<RepoResult> = task
        .effective_repositories()
        .into_iter()
        .map(|r| RepoResult {
            repository: r.effective_name(),
            status: RepoStatus::Success,
            files_modified: vec![],
            pull_request: None,
            report: None,
            for_each_results: vec![],
            error: None,
        })
        .collect();
    patch_status(tr, ctx, |s| {
        let duration = duration_since(s.started_at);
        s.phase = TransformPhase::Completed;
        s.message = "no changes produced".to_string();
        s.finished_at = Some(Utc::now());
        s.result = Some(TaskResult {
            task_id,
            status: TaskStatus::Completed,
            mode,
            repositories,
            groups: vec![],
            duration_seconds: duration,
            error: None,
        });
    })
    .await
}

/// No durable signal-merging routine to register in the `kube` mapping —
/// watches already deliver every spec change as a reconcile. This arm
/// just seeds `steering.max_iterations` and moves on.
async fn step_register(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let max_iterations = tr.spec.task.max_steering_iterations;
    patch_status(tr, ctx, |s| {
        s.phase = TransformPhase::Provisioning;
        s.message = "provisioning sandbox".to_string();
        s.steering.max_iterations = max_iterations;
    })
    .await?;
    Ok(Action::requeue(Duration::from_millis(100)))
}

/// Step 2: provision the sandbox.
async fn step_provision(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let task = &tr.spec.task;
    let timeout_secs = parse_duration_secs(&task.timeout).unwrap_or(1800);
    let network = match &ctx.config.sandbox_network_mode {
        NetworkMode::None => NetworkPolicy::None,
        NetworkMode::Bridge => NetworkPolicy::Bridge,
        NetworkMode::Host => NetworkPolicy::Host,
    };
    let opts = ProvisionOptions {
        image: ctx.config.sandbox_image.clone(),
        working_dir: "/workspace".to_string(),
        env: ctx.config.env.clone(),
        memory_limit_bytes: ctx.config.sandbox_memory_limit,
        cpu_quota: ctx.config.sandbox_cpu_quota,
        network,
        timeout_secs,
        task_attempt_id: format!("{}-{}", task.id, tr.uid().unwrap_or_default()),
        hardened: task.execution.deterministic.is_some(),
    };

    let provider = ctx.sandbox_provider.clone();
    let outcome = with_retry("provision", 3, || {
        let provider = provider.clone();
        let opts = opts.clone();
        async move {
            provider
                .provision(opts)
                .await
                .map_err(|e| FleetliftError::Infrastructure(e.to_string()))
        }
    })
    .await;

    match outcome {
        Ok(sandbox_ref) => {
            patch_status(tr, ctx, |s| {
                s.phase = TransformPhase::Cloning;
                s.sandbox_ref = Some(sandbox_ref.0.clone());
                s.message = "sandbox provisioned, cloning repositories".to_string();
            })
            .await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        Err(e) => {
            fail(tr, ctx, &format!("provision failed: {e}")).await?;
            Ok(Action::await_change())
        }
    }
}

/// Step 3: clone repositories and run setup, including the
/// transformation-repo layout's recipe relocation.
async fn step_clone(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let Some(sandbox_ref) = tr.status.as_ref().and_then(|s| s.sandbox_ref.clone()) else {
        fail(tr, ctx, "cloning phase entered without a sandbox_ref").await?;
        return Ok(Action::await_change());
    };
    let id = SandboxRef(sandbox_ref);
    let task = &tr.spec.task;
    let provider = ctx.sandbox_provider.as_ref();
    let workdirs: HashMap<String, String> = task
        .repo_workdirs(fleetlift_protocol::control::DEFAULT_WORKSPACE)
        .into_iter()
        .collect();

    let outcome: std::result::Result<(), FleetliftError> = async {
        let depth = ctx.config.sandbox_git_clone_depth;
        if let Some(transformation) = &task.transformation {
            with_retry("clone_transformation_layout", 3, || async {
                clone::clone_transformation_layout(
                    provider,
                    &id,
                    transformation,
                    &task.targets,
                    depth,
                )
                .await
                .map_err(classify::clone_err)
            })
            .await?;
        } else {
            for repo in task.effective_repositories() {
                let dest = &workdirs[&repo.effective_name()];
                with_retry("clone_repo", 3, || async {
                    clone::clone_repo(provider, &id, &repo, dest, depth)
                        .await
                        .map_err(classify::clone_err)
                })
                .await?;
            }
        }

        let agents_md = clone::render_agents_md(
            &task.title,
            &task.description,
            &task.effective_repositories(),
        );
        clone::write_agents_md(provider, &id, &agents_md)
            .await
            .map_err(|e| FleetliftError::Infrastructure(e.to_string()))?;
        Ok(())
    }
    .await;

    match outcome {
        Ok(()) => {
            patch_status(tr, ctx, |s| {
                s.phase = TransformPhase::Running;
                s.repo_workdirs = workdirs.clone();
                s.message = "repositories cloned, executing transformation".to_string();
            })
            .await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        Err(e) => {
            fail(tr, ctx, &format!("clone failed: {e}")).await?;
            Ok(Action::await_change())
        }
    }
}

struct SteeringContext<'a> {
    feedback: &'a str,
    iteration: u32,
    previous_output: &'a str,
}

/// Assembles the prompt handed to the agent: task instructions, absolute
/// repository paths, verifier instructions, the
/// output-contract note for report mode, and — on a steering round —
/// the feedback/iteration/previous-output block.
fn build_agentic_task(task: &Task, steering: Option<SteeringContext<'_>>) -> Task {
    let mut assembled = task
        .execution
        .agentic
        .as_ref()
        .map(|a| a.prompt.clone())
        .unwrap_or_default();

    assembled.push_str("\n\nRepositories:\n");
    for repo in task.effective_repositories() {
        assembled.push_str(&format!(
            "- {} at /workspace/{}\n",
            repo.effective_name(),
            repo.effective_name()
        ));
    }

    if let Some(agentic) = &task.execution.agentic {
        if !agentic.verifiers.is_empty() {
            assembled.push_str("\nVerify the change with:\n");
            for v in &agentic.verifiers {
                assembled.push_str(&format!("- {v}\n"));
            }
        }
        if agentic.output.as_ref().and_then(|o| o.schema.as_ref()).is_some() {
            assembled.push_str(
                "\nWrite REPORT.md with YAML frontmatter matching the declared output schema.\n",
            );
        }
    }

    if let Some(s) = steering {
        assembled.push_str(&format!(
            "\n\nSteering feedback (iteration {}): {}\n\nPrevious output:\n{}\n",
            s.iteration, s.feedback, s.previous_output
        ));
    }

    let mut task = task.clone();
    if let Some(agentic) = task.execution.agentic.as_mut() {
        agentic.prompt = assembled;
    }
    task
}

async fn git_names_modified(provider: &dyn SandboxProvider, id: &SandboxRef, workdir: &str) -> Vec<String> {
    let script = format!(
        "cd {} && git diff --name-only HEAD",
        validation::shell_single_quote(workdir)
    );
    match provider.exec_shell(id, &script, None).await {
        Ok(out) => out
            .stdout
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect(),
        Err(_) => vec![],
    }
}

fn agentic_verifiers(task: &Task) -> Vec<String> {
    task.execution
        .agentic
        .as_ref()
        .map(|a| a.verifiers.clone())
        .unwrap_or_default()
}

/// Runs the task's verifiers in every cloned repository's own workdir,
/// concatenating output in a deterministic (name-sorted) order.
async fn run_verifiers_best_effort(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> Option<String> {
    let verifiers = agentic_verifiers(task);
    if verifiers.is_empty() {
        return None;
    }
    let mut combined = String::new();
    for (name, workdir) in sorted_workdirs(task, workdirs) {
        match verify::run_verifiers(provider, id, &name, &workdir, &verifiers).await {
            Ok(output) => combined.push_str(&output),
            Err(e) => combined.push_str(&format!("verifier error in {name}: {e}\n")),
        }
    }
    Some(combined)
}

/// Concatenates `git diff` across every cloned repository's own workdir.
async fn get_diff_all(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> Option<String> {
    let mut combined = String::new();
    for (name, workdir) in sorted_workdirs(task, workdirs) {
        if let Ok(diff) = verify::get_diff(provider, id, &workdir).await {
            if !diff.trim().is_empty() {
                combined.push_str(&format!("--- {name} ---\n{diff}\n"));
            }
        }
    }
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

/// `true` only if every cloned repository's workdir reports no changes.
async fn has_no_changes_all(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> bool {
    for (_, workdir) in sorted_workdirs(task, workdirs) {
        match verify::has_no_changes(provider, id, &workdir).await {
            Ok(true) => continue,
            _ => return false,
        }
    }
    true
}

/// Pairs each effective repository with its cloned workdir, falling back to
/// the standard-layout convention (`/workspace/{name}`) if `workdirs` (built
/// during the cloning phase) hasn't been populated yet. Sorted by name so
/// the aggregate diff/verifier/no-changes checks above run in a stable,
/// deterministic order.
fn sorted_workdirs(task: &Task, workdirs: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = task
        .effective_repositories()
        .into_iter()
        .map(|repo| {
            let name = repo.effective_name();
            let workdir = workdirs
                .get(&name)
                .cloned()
                .unwrap_or_else(|| format!("/workspace/{name}"));
            (name, workdir)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

async fn notify_best_effort(task: &Task, files_modified: &[String]) {
    let Ok(webhook) = std::env::var("SLACK_WEBHOOK") else {
        return;
    };
    let mut message = notify::diff_summary_message(&task.title, files_modified);
    if let Some(channel) = &task.slack_channel {
        message = format!("<#{channel}> {message}");
    }
    if let Err(e) = notify::slack_webhook(&webhook, &message).await {
        warn!(error = %e, "failed to post chat notification");
    }
}

/// Step 4: run the transformation. Deterministic tasks run a single
/// hardened container; agentic non-forEach tasks go through the Agent
/// Protocol (or, for `driver: legacy`, a direct exec). ForEach report-mode
/// tasks skip the single run entirely and are handled per-target in step 7.
async fn step_run(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let task = &tr.spec.task;
    let Some(sandbox_ref) = tr.status.as_ref().and_then(|s| s.sandbox_ref.clone()) else {
        fail(tr, ctx, "running phase entered without a sandbox_ref").await?;
        return Ok(Action::await_change());
    };
    let id = SandboxRef(sandbox_ref);
    let provider = ctx.sandbox_provider.as_ref();
    let workdirs = tr
        .status
        .as_ref()
        .map(|s| s.repo_workdirs.clone())
        .unwrap_or_default();

    if task.mode == TaskMode::Report && !task.for_each.is_empty() {
        patch_status(tr, ctx, |s| {
            s.phase = TransformPhase::CreatingPrs;
            s.message = "forEach report mode, iterating per target".to_string();
        })
        .await?;
        return Ok(Action::requeue(Duration::from_millis(100)));
    }

    if let Some(det) = &task.execution.deterministic {
        let workdir = "/workspace".to_string();
        let outcome = with_retry("execute_deterministic", 3, || async {
            execute::run_deterministic(provider, &id, &workdir, det)
                .await
                .map_err(classify::execute_err)
        })
        .await;

        return match outcome {
            Ok(output) if output.exit_code != 0 => {
                fail(
                    tr,
                    ctx,
                    &format!(
                        "deterministic transformation failed (exit {}): {}",
                        output.exit_code, output.stderr
                    ),
                )
                .await?;
                Ok(Action::await_change())
            }
            Ok(_) => {
                let no_changes = has_no_changes_all(provider, &id, task, &workdirs).await;
                if no_changes {
                    complete_with_no_changes(tr, ctx).await?;
                    return Ok(Action::await_change());
                }
                patch_status(tr, ctx, |s| {
                    s.phase = TransformPhase::CreatingPrs;
                    s.message = "deterministic transformation produced changes".to_string();
                })
                .await?;
                Ok(Action::requeue(Duration::from_millis(100)))
            }
            Err(e) => {
                fail(tr, ctx, &format!("execute failed: {e}")).await?;
                Ok(Action::await_change())
            }
        };
    }

    let agentic_task = build_agentic_task(task, None);
    let paths = ControlPaths::default();
    let outcome: std::result::Result<AgentResult, FleetliftError> = match tr.spec.driver {
        Driver::Agent => {
            with_retry("execute_agentic", 3, || async {
                execute::run_agentic(provider, &id, &paths, &agentic_task)
                    .await
                    .map_err(classify::execute_err)
            })
            .await
        }
        Driver::Legacy => {
            with_retry("execute_agentic_legacy", 3, || async {
                #[allow(deprecated)]
                exec_legacy(provider, &id, &agentic_task, &workdirs)
                    .await
                    .map_err(classify::execute_err)
            })
            .await
        }
    };

    match outcome {
        Ok(agent_result) => {
            if agent_result.files_modified.is_empty() {
                complete_with_no_changes(tr, ctx).await?;
                return Ok(Action::await_change());
            }
            let diff = get_diff_all(provider, &id, task, &workdirs).await;
            let needs_approval = task.mode == TaskMode::Transform && task.require_approval;
            if needs_approval {
                let verifier_output = run_verifiers_best_effort(provider, &id, task, &workdirs).await;
                notify_best_effort(task, &agent_result.files_modified).await;
                patch_status(tr, ctx, |s| {
                    s.phase = TransformPhase::AwaitingApproval;
                    s.diff = diff;
                    s.verifier_output = verifier_output;
                    s.awaiting_since = Some(Utc::now());
                    s.message = "awaiting approval".to_string();
                })
                .await?;
                Ok(Action::requeue(Duration::from_secs(30)))
            } else {
                patch_status(tr, ctx, |s| {
                    s.phase = TransformPhase::CreatingPrs;
                    s.diff = diff;
                    s.message = "agent run complete, no approval required".to_string();
                })
                .await?;
                Ok(Action::requeue(Duration::from_millis(100)))
            }
        }
        Err(e) => {
            fail(tr, ctx, &format!("execute failed: {e}")).await?;
            Ok(Action::await_change())
        }
    }
}

/// Direct-exec driver: runs the agent CLI directly inside the
/// sandbox via a base64-encoded prompt file, bypassing the sidecar
/// entirely. Superseded by the agent-mode workflow (v2); kept compiled for
/// tasks pinned to `driver: legacy`.
#[deprecated(note = "superseded by the agent-mode workflow (v2) driver")]
async fn exec_legacy(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> std::result::Result<AgentResult, execute::ExecuteError> {
    let agentic = task
        .execution
        .agentic
        .as_ref()
        .expect("legacy driver requires an agentic execution");
    let encoded = base64::engine::general_purpose::STANDARD.encode(agentic.prompt.as_bytes());
    let script = format!(
        "cd /workspace && echo {encoded} | base64 -d > /tmp/fleetlift-prompt.txt && claude -p \"$(cat /tmp/fleetlift-prompt.txt)\"",
        encoded = validation::shell_single_quote(&encoded),
    );
    let output = provider.exec_shell(id, &script, None).await?;
    let mut files_modified = Vec::new();
    for (_, workdir) in sorted_workdirs(task, workdirs) {
        files_modified.extend(git_names_modified(provider, id, &workdir).await);
    }
    Ok(AgentResult {
        status: if output.exit_code == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        },
        files_modified,
        file_statuses: vec![],
        raw_diff: None,
        report: None,
        error: if output.exit_code == 0 {
            None
        } else {
            Some(output.stderr)
        },
    })
}

/// Step 5: the approval + steering loop.
async fn step_awaiting_approval(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let Some(status) = tr.status.clone() else {
        return Ok(Action::requeue(Duration::from_secs(5)));
    };
    let Some(sandbox_ref) = status.sandbox_ref.clone() else {
        fail(tr, ctx, "awaiting_approval phase entered without a sandbox_ref").await?;
        return Ok(Action::await_change());
    };
    let id = SandboxRef(sandbox_ref);
    let task = &tr.spec.task;
    let provider = ctx.sandbox_provider.as_ref();

    if let Some(since) = status.awaiting_since {
        if Utc::now().signed_duration_since(since) > ChronoDuration::hours(24) {
            cancel(tr, ctx, "approval timed out after 24 hours").await?;
            return Ok(Action::await_change());
        }
    }

    let Some(signal) = tr.spec.pending_signal.clone() else {
        return Ok(Action::requeue(Duration::from_secs(30)));
    };
    if !is_fresh(&signal, status.last_consumed_signal_id.as_deref()) {
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    match signal.kind {
        SignalKind::Approve => {
            clear_pending_signal(tr, ctx).await?;
            let signal_id = signal.id.clone();
            patch_status(tr, ctx, |s| {
                s.phase = TransformPhase::CreatingPrs;
                s.last_consumed_signal_id = Some(signal_id);
                s.message = "approved".to_string();
            })
            .await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        SignalKind::Reject => {
            clear_pending_signal(tr, ctx).await?;
            cancel(tr, ctx, "rejected by reviewer").await?;
            Ok(Action::await_change())
        }
        SignalKind::Cancel => {
            clear_pending_signal(tr, ctx).await?;
            cancel(tr, ctx, "cancelled").await?;
            Ok(Action::await_change())
        }
        SignalKind::Continue => {
            // `continue` targets the group dispatcher's pause, not this
            // loop; a duplicate delivery here is simply consumed.
            clear_pending_signal(tr, ctx).await?;
            Ok(Action::requeue(Duration::from_secs(30)))
        }
        SignalKind::Steer => {
            let prompt = signal.prompt.clone().unwrap_or_default();
            if status.steering.current_iteration >= status.steering.max_iterations {
                // Over the limit: ignore the steer signal and keep waiting.
                clear_pending_signal(tr, ctx).await?;
                let signal_id = signal.id.clone();
                patch_status(tr, ctx, |s| {
                    s.last_consumed_signal_id = Some(signal_id);
                    s.message = "steering ignored: max_steering_iterations reached".to_string();
                })
                .await?;
                return Ok(Action::requeue(Duration::from_secs(30)));
            }

            let previous_output = status.diff.clone().unwrap_or_default();
            let iteration = status.steering.current_iteration + 1;
            let agentic_task = build_agentic_task(
                task,
                Some(SteeringContext {
                    feedback: &prompt,
                    iteration,
                    previous_output: &previous_output,
                }),
            );
            let paths = ControlPaths::default();
            let outcome = with_retry("execute_agentic_steer", 3, || async {
                execute::run_agentic(provider, &id, &paths, &agentic_task)
                    .await
                    .map_err(classify::execute_err)
            })
            .await;

            match outcome {
                Ok(agent_result) => {
                    let diff = get_diff_all(provider, &id, task, &status.repo_workdirs).await;
                    let verifier_output =
                        run_verifiers_best_effort(provider, &id, task, &status.repo_workdirs).await;
                    notify_best_effort(task, &agent_result.files_modified).await;
                    clear_pending_signal(tr, ctx).await?;
                    let signal_id = signal.id.clone();
                    patch_status(tr, ctx, |s| {
                        s.last_consumed_signal_id = Some(signal_id);
                        s.steering.current_iteration = iteration;
                        s.steering.history.push(SteeringEntry {
                            iteration_number: iteration,
                            prompt: prompt.clone(),
                            output: agent_result.raw_diff.clone().unwrap_or_default(),
                            files_modified: agent_result.files_modified.clone(),
                            timestamp: Utc::now(),
                        });
                        s.diff = diff;
                        s.verifier_output = verifier_output;
                        s.awaiting_since = Some(Utc::now());
                        s.message = "re-ran after steering feedback".to_string();
                    })
                    .await?;
                    Ok(Action::requeue(Duration::from_secs(30)))
                }
                Err(e) => {
                    fail(tr, ctx, &format!("steering re-execution failed: {e}")).await?;
                    Ok(Action::await_change())
                }
            }
        }
    }
}

/// Step 6 (verifier final gate) + step 7 (terminal step by mode) + step 8
/// (notify completion).
async fn step_finalize(tr: &TransformRun, ctx: &Context) -> Result<Action> {
    let status = tr.status.clone().unwrap_or_default();
    let Some(sandbox_ref) = status.sandbox_ref.clone() else {
        fail(tr, ctx, "creating_prs phase entered without a sandbox_ref").await?;
        return Ok(Action::await_change());
    };
    let id = SandboxRef(sandbox_ref);
    let task = &tr.spec.task;
    let provider = ctx.sandbox_provider.as_ref();

    let verifiers = match &task.execution {
        Execution {
            deterministic: Some(det),
            ..
        } => det.verifiers.clone(),
        _ => agentic_verifiers(task),
    };

    if !verifiers.is_empty() {
        for repo in task.effective_repositories() {
            let workdir = status
                .repo_workdirs
                .get(&repo.effective_name())
                .cloned()
                .unwrap_or_else(|| format!("/workspace/{}", repo.effective_name()));
            let outcome = with_retry("verifiers", 3, || async {
                verify::run_verifiers(provider, &id, &repo.effective_name(), &workdir, &verifiers)
                    .await
                    .map_err(classify::verify_err)
            })
            .await;
            if let Err(e) = outcome {
                fail(tr, ctx, &format!("verifiers failed: {e}")).await?;
                return Ok(Action::await_change());
            }
        }
    }

    let (overall_status, repositories) = match task.mode {
        TaskMode::Transform => finalize_transform(provider, &id, task, &status.repo_workdirs).await,
        TaskMode::Report if task.for_each.is_empty() => {
            finalize_report(provider, &id, task, &status.repo_workdirs).await
        }
        TaskMode::Report => finalize_for_each(provider, &id, task).await,
    };

    let files_touched: Vec<String> = repositories
        .iter()
        .flat_map(|r| r.files_modified.clone())
        .collect();
    notify_best_effort(task, &files_touched).await;

    let task_id = task.id.clone();
    let mode = task.mode;
    patch_status(tr, ctx, |s| {
        let duration = duration_since(s.started_at);
        s.phase = TransformPhase::Completed;
        s.message = "completed".to_string();
        s.finished_at = Some(Utc::now());
        s.result = Some(TaskResult {
            task_id,
            status: overall_status,
            mode,
            repositories,
            groups: vec![],
            duration_seconds: duration,
            error: None,
        });
    })
    .await?;

    Ok(Action::await_change())
}

/// Step 7, transform mode: one PR per changed repository.
async fn finalize_transform(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> (TaskStatus, Vec<RepoResult>) {
    let github_token = std::env::var("GITHUB_TOKEN").unwrap_or_default();
    let title = task
        .pull_request
        .title
        .clone()
        .unwrap_or_else(|| task.title.clone());
    let description = task
        .pull_request
        .body
        .clone()
        .unwrap_or_else(|| task.description.clone());

    let mut repositories = Vec::new();
    let mut overall = TaskStatus::Completed;

    for (name, workdir) in sorted_workdirs(task, workdirs) {
        let repo = task
            .effective_repositories()
            .into_iter()
            .find(|r| r.effective_name() == name)
            .expect("sorted_workdirs only yields effective repositories");
        let files_modified = git_names_modified(provider, id, &workdir).await;
        if files_modified.is_empty() {
            repositories.push(RepoResult {
                repository: repo.effective_name(),
                status: RepoStatus::Skipped,
                files_modified,
                pull_request: None,
                report: None,
                for_each_results: vec![],
                error: None,
            });
            continue;
        }

        let outcome = with_retry("create_pr", 3, || async {
            pr::create_pr(
                provider,
                pr::CreatePrInput {
                    sandbox: id,
                    workdir: &workdir,
                    repo: &repo,
                    task_id: &task.id,
                    title: &title,
                    description: &description,
                    pr_config: &task.pull_request,
                    github_token: &github_token,
                },
            )
            .await
            .map_err(classify::pr_err)
        })
        .await;

        match outcome {
            Ok(Some(pull_request)) => repositories.push(RepoResult {
                repository: repo.effective_name(),
                status: RepoStatus::Success,
                files_modified,
                pull_request: Some(pull_request),
                report: None,
                for_each_results: vec![],
                error: None,
            }),
            Ok(None) => repositories.push(RepoResult {
                repository: repo.effective_name(),
                status: RepoStatus::Skipped,
                files_modified,
                pull_request: None,
                report: None,
                for_each_results: vec![],
                error: None,
            }),
            Err(e) => {
                overall = TaskStatus::Failed;
                repositories.push(RepoResult {
                    repository: repo.effective_name(),
                    status: RepoStatus::Failed,
                    files_modified,
                    pull_request: None,
                    report: None,
                    for_each_results: vec![],
                    error: Some(e.to_string()),
                });
            }
        }
    }

    (overall, repositories)
}

/// Step 7, report mode (non-forEach): one `REPORT.md` per repository.
async fn finalize_report(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
    workdirs: &HashMap<String, String>,
) -> (TaskStatus, Vec<RepoResult>) {
    let schema = task
        .execution
        .agentic
        .as_ref()
        .and_then(|a| a.output.as_ref())
        .and_then(|o| o.schema.clone());

    let mut repositories = Vec::new();
    for (name, workdir) in sorted_workdirs(task, workdirs) {
        let path = report::report_path(&workdir, None);
        let outcome = with_retry("collect_report", 3, || async {
            report::collect_report(provider, id, &path, schema.as_ref())
                .await
                .map_err(classify::report_err)
        })
        .await;

        match outcome {
            // Partial failures (missing file, parse error) don't fail the
            // workflow — other repos still produce reports.
            Ok(rep) => repositories.push(RepoResult {
                repository: name,
                status: RepoStatus::Success,
                files_modified: vec![],
                pull_request: None,
                report: Some(rep),
                for_each_results: vec![],
                error: None,
            }),
            Err(e) => repositories.push(RepoResult {
                repository: name,
                status: RepoStatus::Failed,
                files_modified: vec![],
                pull_request: None,
                report: None,
                for_each_results: vec![],
                error: Some(e.to_string()),
            }),
        }
    }

    (TaskStatus::Completed, repositories)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Substitutes `{{.Name}}`, `{{.Context}}`, and any custom `forEach` field
/// into the agentic prompt template.
fn render_for_each_prompt(template: &str, target: &ForEachTarget) -> String {
    let mut out = template
        .replace("{{.Name}}", &target.name)
        .replace("{{.Context}}", &target.context);
    for (key, value) in &target.fields {
        let placeholder = format!("{{{{.{}}}}}", capitalize(key));
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&placeholder, &value_str);
    }
    out
}

fn build_for_each_task(task: &Task, target: &ForEachTarget) -> Task {
    let mut cloned = task.clone();
    if let Some(agentic) = cloned.execution.agentic.as_mut() {
        agentic.prompt = render_for_each_prompt(&agentic.prompt, target);
    }
    cloned
}

/// Step 7, report mode (forEach): per-target prompt substitution, run,
/// collect `REPORT-{target}.md`.
async fn finalize_for_each(
    provider: &dyn SandboxProvider,
    id: &SandboxRef,
    task: &Task,
) -> (TaskStatus, Vec<RepoResult>) {
    let schema = task
        .execution
        .agentic
        .as_ref()
        .and_then(|a| a.output.as_ref())
        .and_then(|o| o.schema.clone());

    let mut for_each_results = Vec::new();
    for target in &task.for_each {
        let agentic_task = build_for_each_task(task, target);
        let paths = ControlPaths::new(format!(".fleetlift-{}", target.name));
        let run_outcome = with_retry("execute_agentic_for_each", 3, || async {
            execute::run_agentic(provider, id, &paths, &agentic_task)
                .await
                .map_err(classify::execute_err)
        })
        .await;

        match run_outcome {
            Ok(_) => {
                let path = report::report_path("/workspace", Some(&target.name));
                let collected = with_retry("collect_report_for_each", 3, || async {
                    report::collect_report(provider, id, &path, schema.as_ref())
                        .await
                        .map_err(classify::report_err)
                })
                .await;
                match collected {
                    Ok(rep) => for_each_results.push(ForEachResult {
                        target: target.name.clone(),
                        report: Some(rep),
                        error: None,
                    }),
                    Err(e) => for_each_results.push(ForEachResult {
                        target: target.name.clone(),
                        report: None,
                        error: Some(e.to_string()),
                    }),
                }
            }
            Err(e) => for_each_results.push(ForEachResult {
                target: target.name.clone(),
                report: None,
                error: Some(e.to_string()),
            }),
        }
    }

    (
        TaskStatus::Completed,
        vec![RepoResult {
            repository: "forEach".to_string(),
            status: RepoStatus::Success,
            files_modified: vec![],
            pull_request: None,
            report: None,
            for_each_results,
            error: None,
        }],
    )
}
