//! Store abstraction for changegate's on-disk state.
//!
//! Everything changegate persists for a project lives under
//! `<project>/.changegate/`:
//!
//! - `config.toml`: gate configuration (optional)
//! - `data/plans.db`: plan records
//! - `checkpoints/<id>.json`: checkpoint metadata
//! - `backups/<hash-prefix>_<basename>`: content-addressed pre-images
//! - `audit.events.jsonl`: append-only audit log

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::GateError;

pub const STORE_DIR: &str = ".changegate";

/// Store handle representing a project's changegate workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Root of the project whose files are being edited.
    pub project_root: PathBuf,
    /// Absolute path to `<project>/.changegate`.
    pub root: PathBuf,
}

impl Store {
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            root: project_root.join(STORE_DIR),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Create the store directory tree if it does not exist yet.
    pub fn ensure(&self) -> Result<(), GateError> {
        for dir in [self.data_dir(), self.checkpoint_dir(), self.backup_dir()] {
            fs::create_dir_all(&dir).map_err(GateError::IoError)?;
        }
        Ok(())
    }
}

/// Walk up from `start_dir` looking for an existing `.changegate` directory.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(STORE_DIR).is_dir() {
            return Some(current_dir);
        }
        if !current_dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_layout_and_root_is_discoverable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::for_project(tmp.path());
        store.ensure().unwrap();
        assert!(store.data_dir().is_dir());
        assert!(store.checkpoint_dir().is_dir());
        assert!(store.backup_dir().is_dir());

        let nested = tmp.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).as_deref(), Some(tmp.path()));
    }
}
