use std::fs;

use anyhow::{anyhow, Context as _, Result};
use colored::Colorize;
use fleetlift_core::model::{Task, TaskStatus};
use fleetlift_workflow::signals::SignalKind;
use fleetlift_workflow::{TransformGroupRun, TransformRun};
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};

use crate::cli::Command;
use crate::{k8s, output, state};

/// Process exit codes: 0 ok, 1 general error, 3 not found, 4 failed, 5
/// rejected or timed out.
#[derive(Debug, Clone, Copy)]
pub enum Exit {
    Ok = 0,
    General = 1,
    NotFound = 3,
    Failed = 4,
    Rejected = 5,
}

pub async fn dispatch(command: Command) -> Result<Exit> {
    match command {
        Command::Run { task_file } => run(task_file).await,
        Command::List { status, limit } => list(status, limit).await,
        Command::Status { id } => status(id).await,
        Command::Result { id } => result(id).await,
        Command::Reports {
            id,
            output,
            target,
            frontmatter_only,
        } => reports(id, output, target, frontmatter_only).await,
        Command::Approve { id } => signal(id, SignalKind::Approve, None, None).await,
        Command::Reject { id } => signal(id, SignalKind::Reject, None, None).await,
        Command::Cancel { id } => signal(id, SignalKind::Cancel, None, None).await,
        Command::Steer { id, prompt } => signal(id, SignalKind::Steer, Some(prompt), None).await,
        Command::Continue { id, skip_remaining } => {
            signal(id, SignalKind::Continue, None, Some(skip_remaining)).await
        }
        Command::Diff { id, full, file } => diff(id, full, file).await,
        Command::Logs { id, verifier } => logs(id, verifier).await,
    }
}

/// `DispatchPhase` has no `Display` impl (unlike `TransformPhase`); render
/// it the same snake_case the wire format uses instead of Rust's `Debug`.
fn dispatch_phase_str(phase: fleetlift_workflow::phases::DispatchPhase) -> String {
    serde_json::to_value(phase)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn resolve_id(id: Option<String>) -> Result<String> {
    match id {
        Some(id) => Ok(id),
        None => state::load_last_workflow(),
    }
}

async fn run(task_file: std::path::PathBuf) -> Result<Exit> {
    let contents = fs::read_to_string(&task_file)
        .with_context(|| format!("reading task file {}", task_file.display()))?;
    let task: Task = serde_yaml::from_str(&contents).context("parsing task file")?;
    task.validate().map_err(|e| anyhow!(e))?;

    let client = Client::try_default().await.context("connecting to cluster")?;
    let ns = k8s::namespace();
    let name = k8s::resource_name(&task.id);

    if task.is_multi_group() {
        let api: Api<TransformGroupRun> = Api::namespaced(client, &ns);
        let resource = TransformGroupRun {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            spec: fleetlift_workflow::TransformGroupRunSpec {
                task,
                pending_signal: None,
            },
            status: None,
        };
        api.create(&PostParams::default(), &resource)
            .await
            .with_context(|| format!("creating TransformGroupRun '{name}'"))?;
    } else {
        let api: Api<TransformRun> = Api::namespaced(client, &ns);
        let resource = TransformRun {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                ..Default::default()
            },
            spec: fleetlift_workflow::TransformRunSpec {
                task,
                group_name: None,
                pending_signal: None,
                driver: Default::default(),
            },
            status: None,
        };
        api.create(&PostParams::default(), &resource)
            .await
            .with_context(|| format!("creating TransformRun '{name}'"))?;
    }

    state::save_last_workflow(&name)?;
    output::success(&format!("started workflow '{name}'"));
    Ok(Exit::Ok)
}

async fn list(status_filter: Option<String>, limit: Option<usize>) -> Result<Exit> {
    let client = Client::try_default().await.context("connecting to cluster")?;
    let ns = k8s::namespace();

    let runs: Api<TransformRun> = Api::namespaced(client.clone(), &ns);
    let groups: Api<TransformGroupRun> = Api::namespaced(client.clone(), &ns);

    let mut rows: Vec<(String, String, String)> = Vec::new();

    for run in runs.list(&ListParams::default()).await?.items {
        // Children spawned by a group dispatcher are not top-level workflows.
        if run.spec.group_name.is_some() {
            continue;
        }
        let phase = run
            .status
            .as_ref()
            .map(|s| s.phase.to_string())
            .unwrap_or_else(|| "pending".to_string());
        rows.push((run.name_any(), "run".to_string(), phase));
    }

    for group in groups.list(&ListParams::default()).await?.items {
        let phase = group
            .status
            .as_ref()
            .map(|s| dispatch_phase_str(s.phase))
            .unwrap_or_else(|| "pending".to_string());
        rows.push((group.name_any(), "group".to_string(), phase));
    }

    if let Some(filter) = &status_filter {
        rows.retain(|(_, _, phase)| phase == filter);
    }
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    output::header("Workflows");
    for (name, kind, phase) in &rows {
        println!("  {:<40} {:<8} {}", name.bold(), kind, phase);
    }
    if rows.is_empty() {
        output::info("no workflows found");
    }
    Ok(Exit::Ok)
}

async fn status(id: Option<String>) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let workflow = match k8s::resolve(&client, &id).await {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(Exit::NotFound);
        }
    };

    output::header(&format!("Status: {id}"));
    match workflow {
        k8s::Workflow::Single(run) => {
            let s = run.status.unwrap_or_default();
            output::field("phase", &s.phase.to_string());
            output::field("message", &s.message);
        }
        k8s::Workflow::Group(group) => {
            let s = group.status.unwrap_or_default();
            output::field("phase", &dispatch_phase_str(s.phase));
            output::field("message", &s.message);
            output::field(
                "progress",
                &format!(
                    "{}/{} groups complete, {} failed ({:.1}%)",
                    s.progress.completed_groups,
                    s.progress.total_groups,
                    s.progress.failed_groups,
                    s.progress.failure_percent
                ),
            );
        }
    }
    Ok(Exit::Ok)
}

async fn result(id: Option<String>) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let workflow = match k8s::resolve(&client, &id).await {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(Exit::NotFound);
        }
    };

    let task_result = match workflow {
        k8s::Workflow::Single(run) => run.status.and_then(|s| s.result),
        k8s::Workflow::Group(group) => group.status.and_then(|s| s.result),
    };

    let Some(result) = task_result else {
        output::warning("workflow has not reached a terminal state yet");
        return Ok(Exit::General);
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(match result.status {
        TaskStatus::Completed => Exit::Ok,
        TaskStatus::Failed => Exit::Failed,
        TaskStatus::Cancelled => Exit::Rejected,
    })
}

async fn reports(
    id: Option<String>,
    format: String,
    target: Option<String>,
    frontmatter_only: bool,
) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let workflow = match k8s::resolve(&client, &id).await {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(Exit::NotFound);
        }
    };

    let task_result = match workflow {
        k8s::Workflow::Single(run) => run.status.and_then(|s| s.result),
        k8s::Workflow::Group(group) => group.status.and_then(|s| s.result),
    };
    let Some(result) = task_result else {
        output::warning("no reports yet — workflow has not completed");
        return Ok(Exit::General);
    };

    let mut repos = result.repositories;
    for group in result.groups {
        repos.extend(group.repositories);
    }
    if let Some(target) = &target {
        repos.retain(|r| &r.repository == target);
    }

    if format == "json" {
        let reports: Vec<_> = repos
            .iter()
            .filter_map(|r| r.report.as_ref().map(|rep| (r.repository.clone(), rep)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(Exit::Ok);
    }

    for r in &repos {
        let Some(report) = &r.report else { continue };
        output::header(&r.repository);
        if frontmatter_only {
            if let Some(frontmatter) = &report.frontmatter {
                println!("{}", serde_json::to_string_pretty(frontmatter)?);
            }
        } else {
            println!("{}", report.body);
        }
        for err in &report.validation_errors {
            output::warning(&format!("{}: {}", err.instance_path, err.message));
        }
    }
    Ok(Exit::Ok)
}

async fn signal(
    id: Option<String>,
    kind: SignalKind,
    prompt: Option<String>,
    skip_remaining: Option<bool>,
) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let envelope = k8s::signal_envelope(kind, prompt, skip_remaining);
    match k8s::send_signal(&client, &id, envelope).await {
        Ok(()) => {
            output::success(&format!("delivered {kind:?} to '{id}'"));
            Ok(Exit::Ok)
        }
        Err(e) => {
            output::error(&e.to_string());
            Ok(Exit::NotFound)
        }
    }
}

async fn diff(id: Option<String>, full: bool, file: Option<String>) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let workflow = match k8s::resolve(&client, &id).await {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(Exit::NotFound);
        }
    };

    let k8s::Workflow::Single(run) = workflow else {
        output::warning("diff is only available on single-group runs");
        return Ok(Exit::General);
    };
    let Some(diff) = run.status.and_then(|s| s.diff) else {
        output::warning("no diff recorded yet");
        return Ok(Exit::General);
    };

    let shown = if full {
        diff
    } else {
        diff.lines().take(200).collect::<Vec<_>>().join("\n")
    };
    if let Some(path) = file {
        fs::write(&path, shown).with_context(|| format!("writing diff to {path}"))?;
        output::success(&format!("wrote diff to {path}"));
    } else {
        println!("{shown}");
    }
    Ok(Exit::Ok)
}

async fn logs(id: Option<String>, verifier: Option<usize>) -> Result<Exit> {
    let id = resolve_id(id).await?;
    let client = Client::try_default().await.context("connecting to cluster")?;
    let workflow = match k8s::resolve(&client, &id).await {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            return Ok(Exit::NotFound);
        }
    };

    let k8s::Workflow::Single(run) = workflow else {
        output::warning("logs are only available on single-group runs");
        return Ok(Exit::General);
    };
    match run.status.and_then(|s| s.verifier_output) {
        Some(combined) => match verifier {
            None => {
                println!("{combined}");
                Ok(Exit::Ok)
            }
            Some(n) => match fleetlift_activities::verify::verifier_sections(&combined).get(n) {
                Some(section) => {
                    println!("{section}");
                    Ok(Exit::Ok)
                }
                None => {
                    output::warning(&format!("no verifier at index {n}"));
                    Ok(Exit::General)
                }
            },
        },
        None => {
            output::warning("no verifier output recorded yet");
            Ok(Exit::General)
        }
    }
}
