//! Remote-pod `SandboxProvider`, backed by `kube`'s `Api<Pod>` and the
//! attach/exec subresources, matching the Kubernetes usage already present
//! in the controller's Job/Pod management.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{AttachParams, DeleteParams, PostParams};
use kube::{Api, Client};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{info, instrument, warn};

use crate::provider::{
    ExecOutput, NetworkPolicy, ProvisionError, ProvisionOptions, SandboxError, SandboxPhase,
    SandboxProvider, SandboxRef, SandboxStatus,
};

pub struct KubernetesPodProvider {
    client: Client,
    namespace: String,
}

impl KubernetesPodProvider {
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn quantity(value: &str) -> Quantity {
    Quantity(value.to_string())
}

#[async_trait]
impl SandboxProvider for KubernetesPodProvider {
    #[instrument(skip(self, opts), fields(image = %opts.image, namespace = %self.namespace))]
    async fn provision(&self, opts: ProvisionOptions) -> Result<SandboxRef, SandboxError> {
        let name = format!("fleetlift-{}", opts.task_attempt_id);

        let env: Vec<k8s_openapi::api::core::v1::EnvVar> = opts
            .env
            .iter()
            .map(|(k, v)| k8s_openapi::api::core::v1::EnvVar {
                name: k.clone(),
                value: Some(v.clone()),
                ..Default::default()
            })
            .collect();

        let host_network = matches!(opts.network, NetworkPolicy::Host);

        let cpu_cores = f64::from(opts.cpu_quota) / 100_000.0;
        let resources = ResourceRequirements {
            limits: Some(
                [
                    ("memory".to_string(), quantity(&opts.memory_limit_bytes.to_string())),
                    ("cpu".to_string(), quantity(&format!("{cpu_cores}"))),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };

        let security_context = opts.hardened.then(|| {
            k8s_openapi::api::core::v1::SecurityContext {
                allow_privilege_escalation: Some(false),
                read_only_root_filesystem: Some(true),
                ..Default::default()
            }
        });

        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some([("app".to_string(), "fleetlift-sandbox".to_string())].into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                host_network: Some(host_network),
                containers: vec![Container {
                    name: "sandbox".to_string(),
                    image: Some(opts.image.clone()),
                    command: Some(vec!["sleep".to_string()]),
                    args: Some(vec!["infinity".to_string()]),
                    working_dir: Some(opts.working_dir.clone()),
                    env: Some(env),
                    resources: Some(resources),
                    security_context,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        let pods = self.pods();
        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| SandboxError::Provision(ProvisionError::CreationFailed(e.to_string())))?;

        info!(pod = %name, "sandbox pod provisioned");
        Ok(SandboxRef(name))
    }

    #[instrument(skip(self, env), fields(sandbox = %id))]
    async fn exec(
        &self,
        id: &SandboxRef,
        argv: &[String],
        env: &HashMap<String, String>,
        _user: Option<&str>,
        workdir: Option<&str>,
        timeout_secs: u64,
    ) -> Result<ExecOutput, SandboxError> {
        let mut command: Vec<String> = Vec::new();
        if let Some(w) = workdir {
            command.extend(["sh".to_string(), "-c".to_string()]);
            let env_prefix: String = env
                .iter()
                .map(|(k, v)| format!("{k}={v} "))
                .collect::<String>();
            command.push(format!("cd {w} && {env_prefix}{}", argv.join(" ")));
        } else {
            command.extend(argv.iter().cloned());
        }

        let ap = AttachParams::default().stdout(true).stderr(true);
        let pods = self.pods();

        let attached = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            pods.exec(&id.0, command, &ap),
        )
        .await
        .map_err(|_| SandboxError::Exec(format!("exec timed out after {timeout_secs}s")))?
        .map_err(|e| SandboxError::Exec(e.to_string()))?;

        let mut stdout_stream = attached.stdout().expect("stdout requested");
        let mut stdout = String::new();
        stdout_stream
            .read_to_string(&mut stdout)
            .await
            .map_err(|e| SandboxError::Exec(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    #[instrument(skip(self, reader), fields(sandbox = %id))]
    async fn copy_to(
        &self,
        id: &SandboxRef,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        dest_path: &str,
    ) -> Result<(), SandboxError> {
        let ap = AttachParams::default().stdin(true);
        let pods = self.pods();
        let mut attached = pods
            .exec(&id.0, vec!["tar".to_string(), "xf".to_string(), "-".to_string(), "-C".to_string(), dest_path.to_string()], &ap)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;

        let mut stdin = attached.stdin().expect("stdin requested");
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        stdin
            .write_all(&buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn copy_from(
        &self,
        id: &SandboxRef,
        src_path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SandboxError> {
        let ap = AttachParams::default().stdout(true);
        let pods = self.pods();
        let attached = pods
            .exec(
                &id.0,
                vec!["tar".to_string(), "cf".to_string(), "-".to_string(), src_path.to_string()],
                &ap,
            )
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;

        let mut stdout_stream = attached.stdout().expect("stdout requested");
        let mut buf = Vec::new();
        stdout_stream
            .read_to_end(&mut buf)
            .await
            .map_err(|e| SandboxError::Copy(e.to_string()))?;

        Ok(Box::new(std::io::Cursor::new(buf)))
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn status(&self, id: &SandboxRef) -> Result<SandboxStatus, SandboxError> {
        let pods = self.pods();
        match pods.get_opt(&id.0).await {
            Ok(Some(pod)) => {
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                let mapped = match phase.as_str() {
                    "Running" => SandboxPhase::Running,
                    "Pending" => SandboxPhase::Provisioning,
                    "Succeeded" | "Failed" => SandboxPhase::Stopped,
                    _ => SandboxPhase::Stopped,
                };
                Ok(SandboxStatus {
                    phase: mapped,
                    message: phase,
                })
            }
            Ok(None) => Ok(SandboxStatus {
                phase: SandboxPhase::Gone,
                message: "pod not found".to_string(),
            }),
            Err(e) => Err(SandboxError::Exec(e.to_string())),
        }
    }

    #[instrument(skip(self), fields(sandbox = %id))]
    async fn cleanup(&self, id: &SandboxRef) -> Result<(), SandboxError> {
        let pods = self.pods();
        match pods.delete(&id.0, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => {
                warn!(sandbox = %id, error = %e, "pod cleanup reported an error");
                Ok(())
            }
        }
    }
}
