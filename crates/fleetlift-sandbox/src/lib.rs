//! Sandbox provisioning: the `SandboxProvider` trait and its two backends
//! (local Docker container, remote Kubernetes pod), selected by
//! [`factory::SandboxProviderFactory`] at worker startup.

pub mod docker;
pub mod factory;
pub mod kubernetes;
pub mod provider;

pub use factory::SandboxProviderFactory;
pub use provider::{
    ExecOutput, NetworkPolicy, ProvisionError, ProvisionOptions, SandboxError, SandboxPhase,
    SandboxProvider, SandboxRef, SandboxStatus,
};
