//! Thin client over the `TransformRun`/`TransformGroupRun` CRDs. The
//! workflow service the CLI talks to is the Kubernetes API server itself —
//! it reads/patches the same resources the reconcilers in
//! `fleetlift-workflow` own.

use anyhow::{anyhow, Result};
use fleetlift_workflow::signals::{SignalEnvelope, SignalKind};
use fleetlift_workflow::{TransformGroupRun, TransformRun};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

pub fn namespace() -> String {
    std::env::var("FLEETLIFT_NAMESPACE").unwrap_or_else(|_| "fleetlift".to_string())
}

/// k8s object names must be lowercase DNS-1123 labels; task ids only
/// guarantee `[A-Za-z0-9_-]+`, so normalize before use.
pub fn resource_name(task_id: &str) -> String {
    let raw = task_id.to_lowercase().replace('_', "-");
    if raw.len() <= 63 {
        raw
    } else {
        raw.chars().take(63).collect()
    }
}

/// A workflow is either a single-group `TransformRun` or a multi-group
/// `TransformGroupRun`. The CLI doesn't track which kind a given id is, so
/// query commands try both.
pub enum Workflow {
    Single(Box<TransformRun>),
    Group(Box<TransformGroupRun>),
}

pub async fn resolve(client: &Client, id: &str) -> Result<Workflow> {
    let ns = namespace();
    let name = resource_name(id);

    let runs: Api<TransformRun> = Api::namespaced(client.clone(), &ns);
    if let Ok(Some(run)) = runs.get_opt(&name).await {
        return Ok(Workflow::Single(Box::new(run)));
    }

    let groups: Api<TransformGroupRun> = Api::namespaced(client.clone(), &ns);
    if let Ok(Some(group)) = groups.get_opt(&name).await {
        return Ok(Workflow::Group(Box::new(group)));
    }

    Err(anyhow!("no workflow named '{id}' found in namespace '{ns}'"))
}

/// Deliver `kind` to whichever CRD `id` resolves to, by merge-patching
/// `spec.pendingSignal`. The reconciler clears it once consumed
/// (`fleetlift_workflow::signals::is_fresh`).
pub async fn send_signal(client: &Client, id: &str, envelope: SignalEnvelope) -> Result<()> {
    let ns = namespace();
    let name = resource_name(id);

    let patch = serde_json::json!({ "spec": { "pendingSignal": envelope } });
    match resolve(client, id).await? {
        Workflow::Single(_) => {
            let api: Api<TransformRun> = Api::namespaced(client.clone(), &ns);
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
        Workflow::Group(_) => {
            let api: Api<TransformGroupRun> = Api::namespaced(client.clone(), &ns);
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
        }
    }
    Ok(())
}

pub fn signal_envelope(kind: SignalKind, prompt: Option<String>, skip_remaining: Option<bool>) -> SignalEnvelope {
    SignalEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        kind,
        prompt,
        skip_remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_lowercases_and_dashes_underscores() {
        assert_eq!(resource_name("My_Task_42"), "my-task-42");
    }

    #[test]
    fn resource_name_truncates_to_63_chars() {
        let long = "a".repeat(100);
        assert_eq!(resource_name(&long).len(), 63);
    }

    #[test]
    fn signal_envelope_mints_a_fresh_id_each_call() {
        let a = signal_envelope(SignalKind::Approve, None, None);
        let b = signal_envelope(SignalKind::Approve, None, None);
        assert_ne!(a.id, b.id);
    }
}
