//! Error taxonomy.
//!
//! Kinds, not type names: `Validation`/`Infrastructure`/`Application`/
//! `Timeout`/`Staleness`/`Partial`. Activities return `Result<T,
//! FleetliftError>`; the workflow layer decides retry policy from
//! [`FleetliftError::is_retriable`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetliftError {
    /// Task load, ref/URL/env checks. Rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    /// Provisioning, network, docker daemon, hosting-provider REST.
    /// Retried by the activity-retry policy.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Non-zero exit from a transformation or verifier. Non-retriable.
    #[error("application error (exit {exit_code}): {message}")]
    Application { exit_code: i32, message: String },

    /// Approval await or activity start-to-close timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Sidecar `status.updatedAt` older than the staleness threshold.
    #[error("agent stale: {0}")]
    Staleness(String),

    /// Missing `REPORT.md`, bad frontmatter. Captured per-repo, does not
    /// fail the workflow.
    #[error("partial failure: {0}")]
    Partial(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl FleetliftError {
    /// Whether the activity-retry policy should retry this error.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, FleetliftError::Infrastructure(_))
    }
}

impl From<kube::Error> for FleetliftError {
    fn from(err: kube::Error) -> Self {
        FleetliftError::Infrastructure(err.to_string())
    }
}

impl From<serde_yaml::Error> for FleetliftError {
    fn from(err: serde_yaml::Error) -> Self {
        FleetliftError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for FleetliftError {
    fn from(err: serde_json::Error) -> Self {
        FleetliftError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for FleetliftError {
    fn from(err: std::io::Error) -> Self {
        FleetliftError::Infrastructure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FleetliftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_retriable() {
        assert!(FleetliftError::Infrastructure("boom".into()).is_retriable());
    }

    #[test]
    fn application_errors_are_not_retriable() {
        assert!(!FleetliftError::Application {
            exit_code: 1,
            message: "boom".into()
        }
        .is_retriable());
    }
}
