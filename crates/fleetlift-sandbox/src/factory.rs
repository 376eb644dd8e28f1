//! Selects and constructs the configured [`SandboxProvider`] at worker
//! startup, mirroring the adapter factory's `create`/`supported_types`
//! shape so callers never need to name a concrete provider type.

use std::sync::Arc;

use fleetlift_core::config::SandboxProviderKind;
use fleetlift_core::FleetliftError;
use kube::Client;

use crate::docker::DockerProvider;
use crate::kubernetes::KubernetesPodProvider;
use crate::provider::SandboxProvider;

pub struct SandboxProviderFactory;

impl SandboxProviderFactory {
    /// Builds the provider selected by `kind`. Only the Kubernetes variant
    /// needs a live cluster connection, obtained from the in-cluster or
    /// kubeconfig-derived default.
    pub async fn create(
        kind: SandboxProviderKind,
        namespace: &str,
    ) -> Result<Arc<dyn SandboxProvider>, FleetliftError> {
        match kind {
            SandboxProviderKind::Docker => Ok(Arc::new(DockerProvider::new())),
            SandboxProviderKind::Kubernetes => {
                let client = Client::try_default()
                    .await
                    .map_err(|e| FleetliftError::Infrastructure(e.to_string()))?;
                Ok(Arc::new(KubernetesPodProvider::new(client, namespace)))
            }
        }
    }

    #[must_use]
    pub fn supported_kinds() -> &'static [SandboxProviderKind] {
        &[SandboxProviderKind::Docker, SandboxProviderKind::Kubernetes]
    }
}
