//! Persisted local state: only the last-workflow id lives on disk,
//! everything else is held by the external workflow service. One
//! plain-text file, `~/.fleetlift/last-workflow`, holding the id of the
//! most recently started run.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

fn state_dir() -> Result<PathBuf> {
    let home = dirs_home()?;
    Ok(home.join(".fleetlift"))
}

/// Minimal `$HOME` lookup; avoids pulling in the `dirs` crate for a single
/// environment-variable read.
fn dirs_home() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .context("HOME is not set")
}

fn state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("last-workflow"))
}

pub fn save_last_workflow(id: &str) -> Result<()> {
    let dir = state_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::write(state_file()?, id).context("writing last-workflow state")
}

pub fn load_last_workflow() -> Result<String> {
    let path = state_file()?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("no workflow recorded yet (expected {})", path.display()))?;
    Ok(contents.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // HOME is process-global, so tests touching it must not run concurrently.
    static HOME_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn save_then_load_round_trips() {
        let _guard = HOME_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", tmp.path());

        save_last_workflow("demo-task-42").unwrap();
        assert_eq!(load_last_workflow().unwrap(), "demo-task-42");
    }

    #[test]
    fn load_without_a_prior_run_fails() {
        let _guard = HOME_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", tmp.path());

        assert!(load_last_workflow().is_err());
    }
}
