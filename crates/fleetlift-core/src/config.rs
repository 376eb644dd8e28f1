//! Worker configuration.
//!
//! Loaded from a mounted `config.yaml` when present (the same
//! `from_mounted_file` + `validate()` + `Default` shape used elsewhere for
//! controller config in this tree), with environment variables layered on
//! top as overrides.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{FleetliftError, Result};

/// Which `SandboxProvider` backend a worker uses. Selected at worker
/// startup only — workflow code never sees this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxProviderKind {
    Docker,
    Kubernetes,
}

impl std::str::FromStr for SandboxProviderKind {
    type Err = FleetliftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(SandboxProviderKind::Docker),
            "kubernetes" | "k8s" => Ok(SandboxProviderKind::Kubernetes),
            other => Err(FleetliftError::Validation(format!(
                "unknown SANDBOX_PROVIDER '{other}', expected docker or kubernetes"
            ))),
        }
    }
}

/// Network mode applied to a provisioned sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NetworkMode {
    None,
    Bridge,
    Host,
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Bridge
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = FleetliftError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(NetworkMode::None),
            "bridge" => Ok(NetworkMode::Bridge),
            "host" => Ok(NetworkMode::Host),
            other => Err(FleetliftError::Validation(format!(
                "unknown SANDBOX_NETWORK_MODE '{other}'"
            ))),
        }
    }
}

/// Resolved worker configuration, merging `config.yaml` with env overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub sandbox_image: String,
    /// Bytes.
    pub sandbox_memory_limit: u64,
    /// 1/100000-CPU units, matching the sandbox provisioning contract.
    pub sandbox_cpu_quota: u32,
    /// `git clone --depth`; `0` means a full clone.
    pub sandbox_git_clone_depth: u32,
    pub sandbox_network_mode: NetworkMode,
    pub sandbox_provider: SandboxProviderKind,
    pub agent_stale_secs: u64,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sandbox_image: "ghcr.io/fleetlift/runtime:latest".to_string(),
            sandbox_memory_limit: 4 * 1024 * 1024 * 1024,
            sandbox_cpu_quota: 200_000,
            sandbox_git_clone_depth: 50,
            sandbox_network_mode: NetworkMode::Bridge,
            sandbox_provider: SandboxProviderKind::Docker,
            // >= 2x the 2-minute agent heartbeat timeout.
            agent_stale_secs: 300,
            env: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a mounted file, falling back to defaults if
    /// the file is absent or invalid.
    pub fn from_mounted_file_or_default(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<WorkerConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::error!(error = %e, path, "failed to parse mounted config, using defaults");
                    WorkerConfig::default()
                }
            },
            Err(_) => WorkerConfig::default(),
        }
    }

    /// Layer the supported environment variables on top of the current
    /// configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SANDBOX_IMAGE") {
            self.sandbox_image = v;
        }
        if let Ok(v) = std::env::var("SANDBOX_MEMORY_LIMIT") {
            match parse_memory(&v) {
                Ok(bytes) => self.sandbox_memory_limit = bytes,
                Err(e) => tracing::warn!(error = %e, value = %v, "ignoring invalid SANDBOX_MEMORY_LIMIT"),
            }
        }
        if let Ok(v) = std::env::var("SANDBOX_CPU_LIMIT") {
            match parse_cpu_quota(&v) {
                Ok(quota) => self.sandbox_cpu_quota = quota,
                Err(e) => tracing::warn!(error = %e, value = %v, "ignoring invalid SANDBOX_CPU_LIMIT"),
            }
        }
        if let Ok(v) = std::env::var("SANDBOX_GIT_CLONE_DEPTH") {
            if let Ok(depth) = v.parse() {
                self.sandbox_git_clone_depth = depth;
            }
        }
        if let Ok(v) = std::env::var("SANDBOX_NETWORK_MODE") {
            if let Ok(mode) = v.parse() {
                self.sandbox_network_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("SANDBOX_PROVIDER") {
            if let Ok(provider) = v.parse() {
                self.sandbox_provider = provider;
            }
        }
        if let Ok(v) = std::env::var("FLEETLIFT_AGENT_STALE_SECS") {
            if let Ok(secs) = v.parse() {
                self.agent_stale_secs = secs;
            }
        }
    }

    pub fn load() -> Self {
        let mut cfg = Self::from_mounted_file_or_default("/config/config.yaml");
        cfg.apply_env_overrides();
        cfg
    }
}

/// Parse `Gi/G/Mi/M/Ki/K` suffixed memory quantities into bytes.
pub fn parse_memory(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix("Gi") {
        (n, 1024u64.pow(3))
    } else if let Some(n) = trimmed.strip_suffix('G') {
        (n, 1_000_000_000)
    } else if let Some(n) = trimmed.strip_suffix("Mi") {
        (n, 1024u64.pow(2))
    } else if let Some(n) = trimmed.strip_suffix('M') {
        (n, 1_000_000)
    } else if let Some(n) = trimmed.strip_suffix("Ki") {
        (n, 1024)
    } else if let Some(n) = trimmed.strip_suffix('K') {
        (n, 1000)
    } else {
        (trimmed, 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| FleetliftError::Validation(format!("invalid memory quantity '{input}'")))
}

/// Parse `N` (cores) or `Nm` (millicores) into 1/100000-CPU quota units,
/// matching the sandbox provisioning CPU quota contract.
pub fn parse_cpu_quota(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    let cores: f64 = if let Some(n) = trimmed.strip_suffix('m') {
        n.trim()
            .parse::<f64>()
            .map_err(|_| FleetliftError::Validation(format!("invalid CPU quantity '{input}'")))?
            / 1000.0
    } else {
        trimmed
            .parse::<f64>()
            .map_err(|_| FleetliftError::Validation(format!("invalid CPU quantity '{input}'")))?
    };

    Ok((cores * 100_000.0).round() as u32)
}

/// Parse a task's `timeout` field (`"30m"`, `"90s"`, `"2h"`, or a bare
/// second count) into seconds.
pub fn parse_duration_secs(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let (digits, multiplier) = if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1)
    } else {
        (trimmed, 1)
    };

    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| FleetliftError::Validation(format!("invalid timeout '{input}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_memory_handles_all_suffixes() {
        assert_eq!(parse_memory("1Gi").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory("2G").unwrap(), 2_000_000_000);
        assert_eq!(parse_memory("1024K").unwrap(), 1_024_000);
    }

    #[test]
    fn parse_memory_rejects_garbage() {
        assert!(parse_memory("not-a-number").is_err());
    }

    #[test]
    fn parse_cpu_quota_handles_cores_and_millicores() {
        assert_eq!(parse_cpu_quota("2").unwrap(), 200_000);
        assert_eq!(parse_cpu_quota("500m").unwrap(), 50_000);
    }

    #[test]
    fn default_agent_stale_is_at_least_twice_heartbeat_timeout() {
        let cfg = WorkerConfig::default();
        assert!(cfg.agent_stale_secs >= 2 * 120);
    }

    #[test]
    fn parse_duration_secs_handles_all_suffixes() {
        assert_eq!(parse_duration_secs("30m").unwrap(), 1800);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7200);
        assert_eq!(parse_duration_secs("90s").unwrap(), 90);
        assert_eq!(parse_duration_secs("5").unwrap(), 5);
    }
}
