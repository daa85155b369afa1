//! Version-control seam used by checkpoints.
//!
//! The gate never stashes the whole working tree: only the paths a checkpoint
//! covers are staged, snapshotted with `git stash create` and recorded with
//! `git stash store`, so the user's other edits stay untouched.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::error::GateError;

pub trait Vcs {
    fn is_repository(&self) -> bool;

    /// Snapshot `paths` into a stash entry and return the stash commit.
    fn stage_and_stash(&self, paths: &[String], message: &str) -> Result<String, GateError>;

    /// Restore `paths` from a stash commit and drop the stash entry.
    fn pop_stash(&self, stash_ref: &str, paths: &[String]) -> Result<String, GateError>;

    /// Porcelain status of the working tree.
    fn raw_status(&self) -> Result<String, GateError>;
}

pub fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, GateError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| GateError::VcsError(format!("git failed: {}", e)))?;

    if !output.status.success() {
        return Err(GateError::VcsError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `git` subprocess backend.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, GateError> {
        run_git(&self.repo_root, args)
    }

    /// `stash@{n}` entry whose commit is `sha`, if it is still listed.
    fn stash_entry_for(&self, sha: &str) -> Result<Option<String>, GateError> {
        let listing = self.git(&["stash", "list", "--format=%gd %H"])?;
        Ok(listing.lines().find_map(|line| {
            let (entry, commit) = line.split_once(' ')?;
            (commit.trim() == sha).then(|| entry.to_string())
        }))
    }
}

impl Vcs for GitCli {
    fn is_repository(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    fn stage_and_stash(&self, paths: &[String], message: &str) -> Result<String, GateError> {
        if paths.is_empty() {
            return Err(GateError::VcsError("no paths to stash".to_string()));
        }
        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.git(&add)?;

        let sha = self.git(&["stash", "create", message])?;
        if sha.is_empty() {
            return Err(GateError::VcsError(
                "nothing to stash for the selected paths".to_string(),
            ));
        }
        self.git(&["stash", "store", "-m", message, &sha])?;
        Ok(sha)
    }

    fn pop_stash(&self, stash_ref: &str, paths: &[String]) -> Result<String, GateError> {
        if !paths.is_empty() {
            let mut checkout: Vec<&str> = vec!["checkout", stash_ref, "--"];
            checkout.extend(paths.iter().map(String::as_str));
            self.git(&checkout)?;
        }
        if let Some(entry) = self.stash_entry_for(stash_ref)? {
            self.git(&["stash", "drop", &entry])?;
        }
        Ok(stash_ref.to_string())
    }

    fn raw_status(&self) -> Result<String, GateError> {
        self.git(&["status", "--porcelain"])
    }
}
