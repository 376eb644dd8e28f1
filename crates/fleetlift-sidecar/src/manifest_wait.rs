//! Control-directory bootstrapping: create what's missing, tolerate what's
//! already there.

use std::path::Path;

pub fn ensure_control_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_control_dir_creates_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/.fleetlift");
        ensure_control_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn ensure_control_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".fleetlift");
        ensure_control_dir(&dir).unwrap();
        ensure_control_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
