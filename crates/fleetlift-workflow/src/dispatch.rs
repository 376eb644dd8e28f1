//! The `TransformGroupRun` reconciler — the group dispatcher. One
//! child `TransformRun` per declared group, bounded by `maxParallel`, with
//! the same status-first idempotent reconcile style as [`crate::transform`].
//!
//! A durable in-process semaphore has no `kube`-native analogue: instead
//! each reconcile counts currently in-flight children against
//! `max_parallel` and tops up, the same level-triggered create-or-get
//! pattern used elsewhere in this tree for a single owned child resource,
//! generalized to N owned children.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use fleetlift_core::model::{
    FailureAction, GroupResult, RepoGroup, RepoStatus, Task, TaskResult, TaskStatus,
};

use crate::context::{Context, Error, Result, GROUP_FINALIZER_NAME};
use crate::crds::{TransformGroupRun, TransformGroupRunStatus, TransformRun, TransformRunSpec};
use crate::driver::Driver;
use crate::phases::DispatchPhase;
use crate::signals::{is_fresh, SignalKind};

const GROUP_LABEL: &str = "fleetlift.io/group-run";

/// Entry point registered with `kube::runtime::Controller`.
#[instrument(skip(gr, ctx), fields(group_run = %gr.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile(gr: Arc<TransformGroupRun>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<TransformGroupRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    finalizer(&api, GROUP_FINALIZER_NAME, gr.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(gr) => reconcile_apply(&gr, &ctx).await,
            FinalizerEvent::Cleanup(gr) => reconcile_cleanup(&gr, &ctx).await,
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
pub fn error_policy(_gr: Arc<TransformGroupRun>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "TransformGroupRun reconciliation failed, requeueing");
    Action::requeue(Duration::from_secs(30))
}

/// Runs the `TransformGroupRun` controller, owning the child
/// `TransformRun`s it dispatches the way `run_code_controller` owns its
/// `Job`s.
pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let api: Api<TransformGroupRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let children: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let watcher_config = WatcherConfig::default();
    Controller::new(api, watcher_config.clone())
        .owns(children, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(r) => debug!(?r, "TransformGroupRun reconciled"),
                Err(e) => warn!(error = ?e, "TransformGroupRun reconciliation error"),
            }
        })
        .await;
    Ok(())
}

async fn reconcile_apply(gr: &TransformGroupRun, ctx: &Context) -> Result<Action> {
    let phase = gr.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    if let Err(e) = gr.spec.task.validate() {
        fail(gr, ctx, &format!("task validation failed: {e}")).await?;
        return Ok(Action::await_change());
    }
    if !gr.spec.task.is_multi_group() {
        fail(gr, ctx, "TransformGroupRun requires more than one group").await?;
        return Ok(Action::await_change());
    }

    match phase {
        DispatchPhase::AwaitingApproval => step_await_approval(gr, ctx).await,
        DispatchPhase::Dispatching => step_dispatch(gr, ctx).await,
        DispatchPhase::Paused => step_paused(gr, ctx).await,
        DispatchPhase::Completed | DispatchPhase::Failed | DispatchPhase::Cancelled => {
            Ok(Action::await_change())
        }
    }
}

/// Children are owned `TransformRun`s; cleaning them up is `kube`'s job via
/// `blockOwnerDeletion`/garbage collection, so there is nothing for the
/// dispatcher's own cleanup to do beyond logging.
async fn reconcile_cleanup(gr: &TransformGroupRun, _ctx: &Context) -> Result<Action> {
    info!(task_id = %gr.spec.task.id, "TransformGroupRun cleanup: owned children garbage-collected by Kubernetes");
    Ok(Action::await_change())
}

async fn patch_status<F>(gr: &TransformGroupRun, ctx: &Context, f: F) -> Result<()>
where
    F: FnOnce(&mut TransformGroupRunStatus),
{
    let api: Api<TransformGroupRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let mut status = gr.status.clone().unwrap_or_default();
    f(&mut status);
    api.patch_status(
        &gr.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

async fn clear_pending_signal(gr: &TransformGroupRun, ctx: &Context) -> Result<()> {
    let api: Api<TransformGroupRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    api.patch(
        &gr.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "spec": { "pendingSignal": null } })),
    )
    .await?;
    Ok(())
}

async fn fail(gr: &TransformGroupRun, ctx: &Context, message: &str) -> Result<()> {
    warn!(task_id = %gr.spec.task.id, message, "TransformGroupRun failed");
    finish(gr, ctx, TaskStatus::Failed, message).await
}

async fn cancel(gr: &TransformGroupRun, ctx: &Context, message: &str) -> Result<()> {
    info!(task_id = %gr.spec.task.id, message, "TransformGroupRun cancelled");
    finish(gr, ctx, TaskStatus::Cancelled, message).await
}

/// Builds the terminal `TaskResult`, rebuilding `groups[]` in the task's
/// declared order from the (non-deterministically completed) `status.groups`
/// map, so the result's group order always matches the task's.
async fn finish(gr: &TransformGroupRun, ctx: &Context, status: TaskStatus, message: &str) -> Result<()> {
    let task_id = gr.spec.task.id.clone();
    let mode = gr.spec.task.mode;
    let declared_order: Vec<String> = gr.spec.task.groups.iter().map(|g| g.name.clone()).collect();
    let message = message.to_string();
    patch_status(gr, ctx, |s| {
        let groups = rebuild_groups_in_order(&declared_order, &s.groups, &s.skipped_groups);
        let overall_failed = status == TaskStatus::Failed
            || groups.iter().any(|g| {
                g.repositories
                    .iter()
                    .any(|r| r.status == RepoStatus::Failed)
            });
        let final_status = if status == TaskStatus::Cancelled {
            TaskStatus::Cancelled
        } else if overall_failed {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        s.phase = match final_status {
            TaskStatus::Completed => DispatchPhase::Completed,
            TaskStatus::Failed => DispatchPhase::Failed,
            TaskStatus::Cancelled => DispatchPhase::Cancelled,
        };
        s.message = message.clone();
        s.result = Some(TaskResult {
            task_id,
            status: final_status,
            mode,
            repositories: vec![],
            groups,
            duration_seconds: 0.0,
            error: if final_status == TaskStatus::Completed {
                None
            } else {
                Some(message)
            },
        });
    })
    .await
}

fn rebuild_groups_in_order(
    declared_order: &[String],
    completed: &HashMap<String, GroupResult>,
    skipped: &[String],
) -> Vec<GroupResult> {
    declared_order
        .iter()
        .filter_map(|name| {
            if let Some(result) = completed.get(name) {
                Some(result.clone())
            } else if skipped.contains(name) {
                Some(GroupResult {
                    group: name.clone(),
                    status: TaskStatus::Cancelled,
                    repositories: vec![],
                })
            } else {
                None
            }
        })
        .collect()
}

/// A single parent-level approval gate, mirroring
/// `transform.rs::step_awaiting_approval`'s signal handling but without the
/// steering loop (the dispatcher has no agent of its own to steer).
async fn step_await_approval(gr: &TransformGroupRun, ctx: &Context) -> Result<Action> {
    let task = &gr.spec.task;
    if !task.require_approval {
        patch_status(gr, ctx, |s| {
            s.phase = DispatchPhase::Dispatching;
            s.message = "dispatching groups".to_string();
            s.progress.total_groups = task.groups.len() as u32;
            s.awaiting_since = None;
        })
        .await?;
        return Ok(Action::requeue(Duration::from_millis(100)));
    }

    let status = gr.status.clone().unwrap_or_default();
    if status.awaiting_since.is_none() {
        patch_status(gr, ctx, |s| s.awaiting_since = Some(Utc::now())).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }
    if let Some(since) = status.awaiting_since {
        if Utc::now().signed_duration_since(since) > ChronoDuration::hours(24) {
            cancel(gr, ctx, "parent approval timed out after 24 hours").await?;
            return Ok(Action::await_change());
        }
    }

    let Some(signal) = gr.spec.pending_signal.clone() else {
        return Ok(Action::requeue(Duration::from_secs(30)));
    };
    if !is_fresh(&signal, status.last_consumed_signal_id.as_deref()) {
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    match signal.kind {
        SignalKind::Approve => {
            clear_pending_signal(gr, ctx).await?;
            let signal_id = signal.id.clone();
            patch_status(gr, ctx, |s| {
                s.phase = DispatchPhase::Dispatching;
                s.message = "approved, dispatching groups".to_string();
                s.progress.total_groups = task.groups.len() as u32;
                s.last_consumed_signal_id = Some(signal_id);
                s.awaiting_since = None;
            })
            .await?;
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        SignalKind::Reject => {
            clear_pending_signal(gr, ctx).await?;
            cancel(gr, ctx, "rejected by reviewer").await?;
            Ok(Action::await_change())
        }
        SignalKind::Cancel => {
            clear_pending_signal(gr, ctx).await?;
            cancel(gr, ctx, "cancelled").await?;
            Ok(Action::await_change())
        }
        SignalKind::Steer | SignalKind::Continue => {
            // Neither applies before dispatch has started; consume and ignore.
            clear_pending_signal(gr, ctx).await?;
            let signal_id = signal.id.clone();
            patch_status(gr, ctx, |s| s.last_consumed_signal_id = Some(signal_id)).await?;
            Ok(Action::requeue(Duration::from_secs(5)))
        }
    }
}

fn child_name(task_id: &str, group_name: &str) -> String {
    let raw = format!("{task_id}-{group_name}").to_lowercase().replace('_', "-");
    if raw.len() <= 63 {
        raw
    } else {
        raw.chars().take(63).collect()
    }
}

fn group_task(task: &Task, group: &RepoGroup) -> Task {
    let mut single = task.clone();
    single.groups = vec![];
    single.repositories = group.repositories.clone();
    single.transformation = None;
    single.targets = vec![];
    single
}

async fn create_child_if_absent(
    gr: &TransformGroupRun,
    ctx: &Context,
    group: &RepoGroup,
    children_api: &Api<TransformRun>,
) -> Result<()> {
    let name = child_name(&gr.spec.task.id, &group.name);
    if children_api.get_opt(&name).await?.is_some() {
        return Ok(());
    }

    let owner_ref = OwnerReference {
        api_version: "fleetlift.io/v1".to_string(),
        kind: "TransformGroupRun".to_string(),
        name: gr.name_any(),
        uid: gr.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    let mut labels = std::collections::BTreeMap::new();
    labels.insert(GROUP_LABEL.to_string(), gr.name_any());
    labels.insert("fleetlift.io/group".to_string(), group.name.clone());

    let child = TransformRun {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: TransformRunSpec {
            task: group_task(&gr.spec.task, group),
            group_name: Some(group.name.clone()),
            pending_signal: None,
            driver: Driver::default(),
        },
        status: None,
    };

    match children_api.create(&PostParams::default(), &child).await {
        Ok(_) => {
            info!(group = %group.name, child = %name, "dispatched group");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Top up in-flight children to `min(maxParallel, numGroups)`, harvest
/// terminal children into `status.groups`, then evaluate the failure
/// policy.
async fn step_dispatch(gr: &TransformGroupRun, ctx: &Context) -> Result<Action> {
    let task = &gr.spec.task;
    let children_api: Api<TransformRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let status = gr.status.clone().unwrap_or_default();

    let list = children_api
        .list(&ListParams::default().labels(&format!("{GROUP_LABEL}={}", gr.name_any())))
        .await?;

    let mut newly_completed: HashMap<String, GroupResult> = HashMap::new();
    let mut in_flight = 0u32;
    for child in &list.items {
        let Some(group_name) = child.spec.group_name.clone() else {
            continue;
        };
        if status.groups.contains_key(&group_name) {
            continue;
        }
        let child_phase = child.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if child_phase.is_terminal() {
            if let Some(result) = child.status.as_ref().and_then(|s| s.result.clone()) {
                newly_completed.insert(
                    group_name.clone(),
                    GroupResult {
                        group: group_name,
                        status: result.status,
                        repositories: result.repositories,
                    },
                );
            } else {
                newly_completed.insert(
                    group_name.clone(),
                    GroupResult {
                        group: group_name,
                        status: TaskStatus::Failed,
                        repositories: vec![],
                    },
                );
            }
        } else {
            in_flight += 1;
        }
    }

    if !newly_completed.is_empty() {
        patch_status(gr, ctx, |s| {
            for (name, result) in newly_completed {
                s.groups.insert(name, result);
            }
            s.progress.completed_groups = s.groups.len() as u32;
            s.progress.failed_groups = s
                .groups
                .values()
                .filter(|g| g.status != TaskStatus::Completed)
                .count() as u32;
            s.progress.failed_group_names = s
                .groups
                .values()
                .filter(|g| g.status != TaskStatus::Completed)
                .map(|g| g.group.clone())
                .collect();
            s.progress.recompute_failure_percent();
        })
        .await?;
    }

    let refreshed = fetch_status(gr, ctx).await?;
    let total_completed = refreshed.groups.len() as u32;
    let total_failed = refreshed
        .groups
        .values()
        .filter(|g| g.status != TaskStatus::Completed)
        .count() as u32;

    let policy = &task.failure_policy;
    let failure_percent = if total_completed > 0 {
        f64::from(total_failed) / f64::from(total_completed) * 100.0
    } else {
        0.0
    };
    let threshold_crossed =
        failure_percent > policy.threshold_percent && total_completed >= policy.min_completed;

    if threshold_crossed {
        match policy.action {
            FailureAction::Abort => {
                // Every group not yet reflected in `status.groups` at the moment
                // the threshold is crossed is abandoned, in-flight or not: the
                // dispatcher exits without waiting on it.
                let remaining: Vec<String> = task
                    .groups
                    .iter()
                    .map(|g| g.name.clone())
                    .filter(|n| !refreshed.groups.contains_key(n))
                    .collect();
                patch_status(gr, ctx, |s| {
                    for name in remaining {
                        if !s.skipped_groups.contains(&name) {
                            s.skipped_groups.push(name);
                        }
                    }
                })
                .await?;
                return finalize_if_ready(gr, ctx, task, true).await;
            }
            FailureAction::Pause => {
                patch_status(gr, ctx, |s| {
                    s.phase = DispatchPhase::Paused;
                    s.message = "paused: failure threshold crossed".to_string();
                    s.progress.is_paused = true;
                    s.progress.paused_reason = Some(format!(
                        "failure_percent {failure_percent:.1} exceeds threshold {:.1}",
                        policy.threshold_percent
                    ));
                    s.awaiting_since = Some(Utc::now());
                })
                .await?;
                return Ok(Action::requeue(Duration::from_secs(5)));
            }
            FailureAction::Continue => {}
        }
    }

    // Top up in-flight children toward max_parallel.
    let max_parallel = task.max_parallel.min(task.groups.len() as u32);
    let dispatched_names: std::collections::HashSet<String> = list
        .items
        .iter()
        .filter_map(|c| c.spec.group_name.clone())
        .collect();
    let mut slots = max_parallel.saturating_sub(in_flight);
    for group in &task.groups {
        if slots == 0 {
            break;
        }
        if refreshed.groups.contains_key(&group.name) || dispatched_names.contains(&group.name) {
            continue;
        }
        create_child_if_absent(gr, ctx, group, &children_api).await?;
        slots -= 1;
    }

    finalize_if_ready(gr, ctx, task, false).await
}

async fn fetch_status(gr: &TransformGroupRun, ctx: &Context) -> Result<TransformGroupRunStatus> {
    let api: Api<TransformGroupRun> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let fresh = api.get(&gr.name_any()).await?;
    Ok(fresh.status.unwrap_or_default())
}

async fn finalize_if_ready(
    gr: &TransformGroupRun,
    ctx: &Context,
    task: &Task,
    aborted: bool,
) -> Result<Action> {
    let status = fetch_status(gr, ctx).await?;
    let accounted = status.groups.len() + status.skipped_groups.len();
    if accounted < task.groups.len() && !aborted {
        return Ok(Action::requeue(Duration::from_secs(3)));
    }

    if aborted {
        fail(gr, ctx, "aborted: failure threshold crossed").await?;
    } else {
        let message = if status
            .groups
            .values()
            .any(|g| g.status != TaskStatus::Completed)
        {
            "one or more groups failed"
        } else {
            "all groups completed"
        };
        finish(gr, ctx, TaskStatus::Completed, message).await?;
    }
    Ok(Action::await_change())
}

/// Step 4's `pause` branch: await `continue(skipRemaining)` or `cancel`,
/// same 24-hour timeout as the parent approval gate.
async fn step_paused(gr: &TransformGroupRun, ctx: &Context) -> Result<Action> {
    let task = &gr.spec.task;
    let status = gr.status.clone().unwrap_or_default();

    if let Some(since) = status.awaiting_since {
        if Utc::now().signed_duration_since(since) > ChronoDuration::hours(24) {
            cancel(gr, ctx, "paused dispatcher timed out after 24 hours").await?;
            return Ok(Action::await_change());
        }
    }

    let Some(signal) = gr.spec.pending_signal.clone() else {
        return Ok(Action::requeue(Duration::from_secs(30)));
    };
    if !is_fresh(&signal, status.last_consumed_signal_id.as_deref()) {
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    match signal.kind {
        SignalKind::Cancel => {
            clear_pending_signal(gr, ctx).await?;
            cancel(gr, ctx, "cancelled while paused").await?;
            Ok(Action::await_change())
        }
        SignalKind::Continue => {
            let skip_remaining = signal.skip_remaining.unwrap_or(false);
            clear_pending_signal(gr, ctx).await?;
            let signal_id = signal.id.clone();
            if skip_remaining {
                let remaining: Vec<String> = task
                    .groups
                    .iter()
                    .map(|g| g.name.clone())
                    .filter(|n| !status.groups.contains_key(n))
                    .collect();
                patch_status(gr, ctx, |s| {
                    for name in remaining {
                        if !s.skipped_groups.contains(&name) {
                            s.skipped_groups.push(name);
                        }
                    }
                    s.phase = DispatchPhase::Dispatching;
                    s.message = "resumed, skipping remaining groups".to_string();
                    s.progress.is_paused = false;
                    s.progress.paused_reason = None;
                    s.last_consumed_signal_id = Some(signal_id);
                    s.awaiting_since = None;
                })
                .await?;
            } else {
                patch_status(gr, ctx, |s| {
                    s.phase = DispatchPhase::Dispatching;
                    s.message = "resumed".to_string();
                    s.progress.is_paused = false;
                    s.progress.paused_reason = None;
                    s.last_consumed_signal_id = Some(signal_id);
                    s.awaiting_since = None;
                })
                .await?;
            }
            Ok(Action::requeue(Duration::from_millis(100)))
        }
        SignalKind::Approve | SignalKind::Reject | SignalKind::Steer => {
            clear_pending_signal(gr, ctx).await?;
            let signal_id = signal.id.clone();
            patch_status(gr, ctx, |s| s.last_consumed_signal_id = Some(signal_id)).await?;
            Ok(Action::requeue(Duration::from_secs(5)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlift_core::model::{DeterministicExecution, Execution, Repository};

    fn sample_task(groups: Vec<RepoGroup>) -> Task {
        Task {
            id: "demo-task".to_string(),
            title: "Demo".to_string(),
            description: String::new(),
            mode: fleetlift_core::model::TaskMode::Transform,
            repositories: vec![],
            groups,
            transformation: None,
            targets: vec![],
            for_each: vec![],
            execution: Execution {
                agentic: None,
                deterministic: Some(DeterministicExecution {
                    image: "alpine".to_string(),
                    args: vec![],
                    env: HashMap::new(),
                    verifiers: vec![],
                }),
            },
            timeout: "30m".to_string(),
            require_approval: true,
            max_parallel: 2,
            max_steering_iterations: 5,
            pull_request: Default::default(),
            failure_policy: Default::default(),
            ticket_url: None,
            slack_channel: None,
            requester: None,
        }
    }

    fn sample_group(name: &str) -> RepoGroup {
        RepoGroup {
            name: name.to_string(),
            repositories: vec![Repository {
                url: format!("https://example.com/{name}.git"),
                branch: "main".to_string(),
                name: None,
                setup: vec![],
            }],
        }
    }

    #[test]
    fn child_name_lowercases_and_dashes_underscores() {
        assert_eq!(child_name("My_Task", "Group_One"), "my-task-group-one");
        assert_eq!(child_name("task", "group"), "task-group");
    }

    #[test]
    fn child_name_truncates_to_63_chars() {
        let long = "g".repeat(100);
        let name = child_name("task", &long);
        assert_eq!(name.len(), 63);
    }

    #[test]
    fn group_task_clears_other_families_and_keeps_one_groups_repos() {
        let task = sample_task(vec![sample_group("a"), sample_group("b")]);
        let single = group_task(&task, &task.groups[1]);

        assert!(single.groups.is_empty());
        assert_eq!(single.repositories.len(), 1);
        assert_eq!(single.repositories[0].url, "https://example.com/b.git");
        assert!(single.transformation.is_none());
        assert!(single.targets.is_empty());
    }

    #[test]
    fn rebuild_groups_in_order_preserves_declared_order_and_synthesizes_skipped() {
        let declared = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut completed = HashMap::new();
        completed.insert(
            "a".to_string(),
            GroupResult {
                group: "a".to_string(),
                status: TaskStatus::Completed,
                repositories: vec![],
            },
        );
        completed.insert(
            "c".to_string(),
            GroupResult {
                group: "c".to_string(),
                status: TaskStatus::Failed,
                repositories: vec![],
            },
        );
        let skipped = vec!["b".to_string()];

        let rebuilt = rebuild_groups_in_order(&declared, &completed, &skipped);

        assert_eq!(rebuilt.len(), 3);
        assert_eq!(rebuilt[0].group, "a");
        assert_eq!(rebuilt[1].group, "b");
        assert_eq!(rebuilt[1].status, TaskStatus::Cancelled);
        assert_eq!(rebuilt[2].group, "c");
    }

    #[test]
    fn rebuild_groups_in_order_drops_groups_neither_completed_nor_skipped() {
        let declared = vec!["a".to_string(), "b".to_string()];
        let completed = HashMap::new();
        let skipped: Vec<String> = vec![];

        let rebuilt = rebuild_groups_in_order(&declared, &completed, &skipped);

        assert!(rebuilt.is_empty());
    }
}
