//! The control directory layout inside a sandbox.

/// Path, relative to the sandbox's working directory, of the dedicated
/// control directory the agent and workflow exchange files through.
pub const DEFAULT_CONTROL_DIR: &str = ".fleetlift";

/// Absolute path repositories are cloned under inside a sandbox, absent an
/// override (the sidecar's `FLEETLIFT_WORKSPACE`).
pub const DEFAULT_WORKSPACE: &str = "/workspace";

#[derive(Debug, Clone)]
pub struct ControlPaths {
    root: String,
}

impl ControlPaths {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn manifest(&self) -> String {
        format!("{}/manifest.json", self.root)
    }

    #[must_use]
    pub fn status(&self) -> String {
        format!("{}/status.json", self.root)
    }

    #[must_use]
    pub fn result(&self) -> String {
        format!("{}/result.json", self.root)
    }

    #[must_use]
    pub fn steering(&self) -> String {
        format!("{}/steering.json", self.root)
    }
}

impl Default for ControlPaths {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_nest_under_control_dir() {
        let paths = ControlPaths::default();
        assert_eq!(paths.manifest(), ".fleetlift/manifest.json");
        assert_eq!(paths.status(), ".fleetlift/status.json");
        assert_eq!(paths.result(), ".fleetlift/result.json");
        assert_eq!(paths.steering(), ".fleetlift/steering.json");
    }
}
