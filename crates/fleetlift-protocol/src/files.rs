//! Atomic JSON writes and retry-on-parse-error reads.
//!
//! Grounded on the sidecar's `write_to_fifo` (serialize writes, tolerate a
//! reader that isn't ready yet) and its FIFO-readiness retry loop in
//! `main()` (`while !fifo_path.exists() { sleep(2s) }`), generalized from a
//! FIFO to ordinary files: writers go through a temp file and an atomic
//! rename, readers retry a bounded number of times on parse error.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fleetlift_sandbox::SandboxError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("{path} did not become readable after {attempts} attempts")]
    Exhausted { path: String, attempts: u32 },
    #[error("agent status at {path} is stale (last update older than {threshold_secs}s)")]
    Stale { path: String, threshold_secs: u64 },
}

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serializes `value` and writes it via a temp file + rename, so a reader
/// can never observe a partially written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ProtocolError> {
    let body = serde_json::to_vec_pretty(value)?;
    let n = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("tmp.{}.{n}", std::process::id()));

    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), bytes = body.len(), "wrote control file atomically");
    Ok(())
}

/// Reads and parses `path` as JSON, retrying on parse error (or on the file
/// not existing yet) up to `max_attempts` times with a fixed `interval`
/// between attempts.
pub async fn retry_read_json<T: DeserializeOwned>(
    path: &Path,
    max_attempts: u32,
    interval: Duration,
) -> Result<T, ProtocolError> {
    let mut last_err: Option<ProtocolError> = None;
    for attempt in 1..=max_attempts {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(path = %path.display(), attempt, "control file parse failed, retrying");
                    last_err = Some(ProtocolError::Parse(e));
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                last_err = Some(ProtocolError::Io(e));
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
        tokio::time::sleep(interval).await;
    }

    Err(last_err.unwrap_or(ProtocolError::Exhausted {
        path: path.display().to_string(),
        attempts: max_attempts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_json_atomic_never_leaves_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        write_json_atomic(&path, &Sample { value: 7 }).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("status.json")]);
    }

    #[tokio::test]
    async fn retry_read_json_succeeds_once_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        write_json_atomic(&path, &Sample { value: 1 }).unwrap();

        let read: Sample = retry_read_json(&path, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(read, Sample { value: 1 });
    }

    #[tokio::test]
    async fn retry_read_json_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let result: Result<Sample, _> = retry_read_json(&path, 2, Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
