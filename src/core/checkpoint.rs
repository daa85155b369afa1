//! Checkpoints: pre-images of files captured before changes are applied.
//!
//! Two strategies, decided once per checkpoint:
//!
//! - `stash`: the covered paths are snapshotted into a git stash entry.
//! - `file_backup`: used when stashing is disabled, the project is not a
//!   repository, or the stash attempt fails.
//!
//! Either way every pre-image is also written as a content-addressed blob
//! (`<sha256-prefix>_<basename>`) so a stash rollback that fails can fall back
//! to per-file restore. Metadata lives in `checkpoints/<id>.json` without the
//! file contents.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::broker::DbBroker;
use crate::core::config::CheckpointSettings;
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::core::store::Store;
use crate::core::time;
use crate::core::trace;
use crate::core::vcs::Vcs;

const BLOB_HASH_PREFIX: usize = 16;

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Stash,
    FileBackup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub path: String,
    #[serde(default)]
    pub original_content: String,
    pub hash: String,
    pub exists: bool,
}

impl CheckpointFile {
    pub fn capture(path: &str, content: Option<&str>) -> Self {
        let original_content = content.unwrap_or_default().to_string();
        Self {
            path: path.to_string(),
            hash: content_hash(&original_content),
            original_content,
            exists: content.is_some(),
        }
    }

    pub fn blob_name(&self) -> String {
        let base = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let prefix = &self.hash[..BLOB_HASH_PREFIX.min(self.hash.len())];
        format!("{prefix}_{base}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackCheckpoint {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
    pub files: Vec<CheckpointFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stash_ref: Option<String>,
    /// Paths left out because their content is not UTF-8 text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl RollbackCheckpoint {
    /// Metadata record as persisted: identical minus file contents.
    pub fn without_content(&self) -> Self {
        let mut record = self.clone();
        for file in &mut record.files {
            file.original_content.clear();
        }
        record
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointOptions {
    pub plan_id: Option<String>,
    pub phase_id: Option<String>,
    pub description: Option<String>,
}

/// Which snapshot path a checkpoint took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStrategy {
    Stash { stash_ref: String },
    FileBackup { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub restored_files: Vec<String>,
    pub errors: Vec<String>,
}

pub struct CheckpointManager {
    project_root: PathBuf,
    checkpoint_dir: PathBuf,
    backup_dir: PathBuf,
    vcs: Box<dyn Vcs>,
    max_checkpoints: usize,
    prefer_stash: bool,
    ids: ulid::Generator,
    broker: Option<DbBroker>,
}

impl CheckpointManager {
    pub fn new(store: &Store, backup_dir: PathBuf, vcs: Box<dyn Vcs>, settings: &CheckpointSettings) -> Self {
        Self {
            project_root: store.project_root.clone(),
            checkpoint_dir: store.checkpoint_dir(),
            backup_dir,
            vcs,
            max_checkpoints: settings.max_checkpoints.max(1),
            prefer_stash: settings.prefer_stash,
            ids: ulid::Generator::new(),
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: DbBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn next_id(&mut self) -> String {
        match self.ids.generate() {
            Ok(id) => format!("cp_{id}"),
            Err(_) => time::new_prefixed_id("cp"),
        }
    }

    fn abs(&self, path: &str) -> PathBuf {
        self.project_root.join(path)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{id}.json"))
    }

    /// Capture the current content of `files` (relative to the project root).
    pub fn create_checkpoint(
        &mut self,
        files: &[String],
        opts: CheckpointOptions,
    ) -> Result<RollbackCheckpoint, GateError> {
        let mut seen = BTreeSet::new();
        let mut captured = Vec::new();
        let mut skipped = Vec::new();
        for raw in files {
            let path = normalize_plan_path(raw);
            if path.is_empty() || !seen.insert(path.clone()) {
                continue;
            }
            let abs = self.abs(&path);
            let content = if abs.is_file() {
                match String::from_utf8(fs::read(&abs)?) {
                    Ok(text) => Some(text),
                    Err(_) => {
                        skipped.push(path);
                        continue;
                    }
                }
            } else {
                None
            };
            captured.push(CheckpointFile::capture(&path, content.as_deref()));
        }

        let id = self.next_id();
        let existing: Vec<String> = captured
            .iter()
            .filter(|f| f.exists)
            .map(|f| f.path.clone())
            .collect();
        let strategy = self.choose_strategy(&existing, &format!("changegate checkpoint {id}"));
        trace::trace(&format!("checkpoint {id}: {strategy:?}"));

        let (kind, stash_ref) = match strategy {
            SnapshotStrategy::Stash { stash_ref } => (CheckpointKind::Stash, Some(stash_ref)),
            SnapshotStrategy::FileBackup { .. } => (CheckpointKind::FileBackup, None),
        };
        let checkpoint = RollbackCheckpoint {
            id,
            timestamp: time::now_iso(),
            kind,
            files: captured,
            plan_id: opts.plan_id,
            phase_id: opts.phase_id,
            description: opts.description,
            stash_ref,
            skipped,
        };
        self.persist(&checkpoint)?;
        if !checkpoint.skipped.is_empty() {
            self.note(
                "checkpoint.skip",
                &checkpoint.id,
                "warning",
                json!({ "reason": "not utf-8 text", "files": checkpoint.skipped }),
            );
        }
        self.note(
            "checkpoint.create",
            &checkpoint.id,
            "success",
            json!({ "type": checkpoint.kind, "files": checkpoint.paths() }),
        );
        if let Err(e) = self.cleanup() {
            self.note("checkpoint.cleanup", &checkpoint.id, "error", json!({ "error": e.to_string() }));
        }
        Ok(checkpoint)
    }

    fn choose_strategy(&self, existing: &[String], message: &str) -> SnapshotStrategy {
        if !self.prefer_stash {
            return SnapshotStrategy::FileBackup {
                reason: "stash disabled".to_string(),
            };
        }
        if existing.is_empty() {
            return SnapshotStrategy::FileBackup {
                reason: "no existing files to stash".to_string(),
            };
        }
        if !self.vcs.is_repository() {
            return SnapshotStrategy::FileBackup {
                reason: "not a repository".to_string(),
            };
        }
        if self.vcs.raw_status().is_ok_and(|status| status.is_empty()) {
            return SnapshotStrategy::FileBackup {
                reason: "working tree clean".to_string(),
            };
        }
        match self.vcs.stage_and_stash(existing, message) {
            Ok(stash_ref) => SnapshotStrategy::Stash { stash_ref },
            Err(e) => SnapshotStrategy::FileBackup {
                reason: e.to_string(),
            },
        }
    }

    fn persist(&self, checkpoint: &RollbackCheckpoint) -> Result<(), GateError> {
        fs::create_dir_all(&self.checkpoint_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        for file in checkpoint.files.iter().filter(|f| f.exists) {
            let blob = self.backup_dir.join(file.blob_name());
            if !blob.exists() {
                fs::write(&blob, &file.original_content)?;
            }
        }
        let record = serde_json::to_string_pretty(&checkpoint.without_content())?;
        fs::write(self.metadata_path(&checkpoint.id), record)?;
        Ok(())
    }

    fn read_record(&self, path: &Path) -> Result<RollbackCheckpoint, GateError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Metadata of every stored checkpoint, newest first. File contents are
    /// not loaded.
    pub fn list_checkpoints(&self) -> Result<Vec<RollbackCheckpoint>, GateError> {
        if !self.checkpoint_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                out.push(self.read_record(&path)?);
            }
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    /// Load a checkpoint and rehydrate every pre-image from its blob.
    pub fn load_checkpoint(&self, id: &str) -> Result<RollbackCheckpoint, GateError> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(GateError::NotFound(format!("checkpoint {id}")));
        }
        let mut checkpoint = self.read_record(&path)?;
        for file in checkpoint.files.iter_mut().filter(|f| f.exists) {
            let content = fs::read_to_string(self.backup_dir.join(file.blob_name()))?;
            if content_hash(&content) != file.hash {
                return Err(GateError::ValidationError(format!(
                    "backup of {} does not match recorded hash",
                    file.path
                )));
            }
            file.original_content = content;
        }
        Ok(checkpoint)
    }

    pub fn delete_checkpoint(&self, id: &str) -> Result<bool, GateError> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        self.collect_blobs()?;
        self.note("checkpoint.delete", id, "success", serde_json::Value::Null);
        Ok(true)
    }

    /// Evict the oldest checkpoints beyond `max_checkpoints`. Returns the
    /// evicted ids.
    pub fn cleanup(&self) -> Result<Vec<String>, GateError> {
        let all = self.list_checkpoints()?;
        let mut evicted = Vec::new();
        for checkpoint in all.iter().skip(self.max_checkpoints) {
            fs::remove_file(self.metadata_path(&checkpoint.id))?;
            evicted.push(checkpoint.id.clone());
        }
        if !evicted.is_empty() {
            self.collect_blobs()?;
            self.note("checkpoint.evict", "checkpoints", "success", json!({ "evicted": evicted }));
        }
        Ok(evicted)
    }

    /// Remove blobs no surviving checkpoint references.
    fn collect_blobs(&self) -> Result<(), GateError> {
        if !self.backup_dir.is_dir() {
            return Ok(());
        }
        let live: BTreeSet<String> = self
            .list_checkpoints()?
            .iter()
            .flat_map(|cp| cp.files.iter().filter(|f| f.exists).map(|f| f.blob_name()))
            .collect();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !live.contains(&name) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Restore every file to its captured state. Failures are collected per
    /// file; `success` is false if any file could not be restored.
    pub fn rollback(&self, checkpoint: &RollbackCheckpoint) -> RollbackOutcome {
        let outcome = match (&checkpoint.kind, &checkpoint.stash_ref) {
            (CheckpointKind::Stash, Some(stash_ref)) => {
                let existing: Vec<String> = checkpoint
                    .files
                    .iter()
                    .filter(|f| f.exists)
                    .map(|f| f.path.clone())
                    .collect();
                match self.vcs.pop_stash(stash_ref, &existing) {
                    Ok(_) => self.finish_stash_restore(checkpoint),
                    Err(e) => {
                        self.note(
                            "checkpoint.stash.restore",
                            &checkpoint.id,
                            "error",
                            json!({ "error": e.to_string() }),
                        );
                        self.restore_files(checkpoint)
                    }
                }
            }
            _ => self.restore_files(checkpoint),
        };
        let status = if outcome.success { "success" } else { "partial" };
        self.note(
            "checkpoint.rollback",
            &checkpoint.id,
            status,
            json!({ "restored": outcome.restored_files, "errors": outcome.errors }),
        );
        outcome
    }

    fn finish_stash_restore(&self, checkpoint: &RollbackCheckpoint) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();
        for file in &checkpoint.files {
            let result = if file.exists {
                self.verify(file)
            } else {
                self.remove_created(file)
            };
            match result {
                Ok(()) => outcome.restored_files.push(file.path.clone()),
                Err(e) => outcome.errors.push(format!("{}: {}", file.path, e)),
            }
        }
        outcome.success = outcome.errors.is_empty();
        outcome
    }

    fn restore_files(&self, checkpoint: &RollbackCheckpoint) -> RollbackOutcome {
        let mut outcome = RollbackOutcome::default();
        for file in &checkpoint.files {
            match self.restore_one(file) {
                Ok(()) => outcome.restored_files.push(file.path.clone()),
                Err(e) => outcome.errors.push(format!("{}: {}", file.path, e)),
            }
        }
        outcome.success = outcome.errors.is_empty();
        outcome
    }

    fn restore_one(&self, file: &CheckpointFile) -> Result<(), GateError> {
        if !file.exists {
            return self.remove_created(file);
        }
        let content = if content_hash(&file.original_content) == file.hash {
            file.original_content.clone()
        } else {
            fs::read_to_string(self.backup_dir.join(file.blob_name()))?
        };
        let target = self.abs(&file.path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        self.verify(file)
    }

    fn remove_created(&self, file: &CheckpointFile) -> Result<(), GateError> {
        let target = self.abs(&file.path);
        if target.exists() {
            fs::remove_file(&target)?;
        }
        Ok(())
    }

    fn verify(&self, file: &CheckpointFile) -> Result<(), GateError> {
        let restored = fs::read_to_string(self.abs(&file.path))?;
        if content_hash(&restored) != file.hash {
            return Err(GateError::ValidationError(
                "restored content does not match recorded hash".to_string(),
            ));
        }
        Ok(())
    }

    fn note(&self, op: &str, subject: &str, status: &str, detail: serde_json::Value) {
        trace::trace(&format!("{op} {subject} {status}"));
        if let Some(broker) = &self.broker {
            broker.note("checkpoint-manager", op, subject, status, detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_name_uses_hash_prefix_and_basename() {
        let file = CheckpointFile::capture("src/deep/app.ts", Some("let a = 1;"));
        let name = file.blob_name();
        assert!(name.ends_with("_app.ts"));
        assert_eq!(name.len(), 16 + "_app.ts".len());
        assert!(file.hash.starts_with(&name[..16]));
    }

    #[test]
    fn capture_of_missing_file_is_marked_absent() {
        let file = CheckpointFile::capture("new.ts", None);
        assert!(!file.exists);
        assert_eq!(file.hash, content_hash(""));
    }

    #[test]
    fn metadata_record_omits_content() {
        let cp = RollbackCheckpoint {
            id: "cp_1".to_string(),
            timestamp: time::now_iso(),
            kind: CheckpointKind::FileBackup,
            files: vec![CheckpointFile::capture("a.ts", Some("secret body"))],
            plan_id: None,
            phase_id: None,
            description: None,
            stash_ref: None,
            skipped: Vec::new(),
        };
        let json = serde_json::to_value(cp.without_content()).unwrap();
        assert_eq!(json["type"], "file_backup");
        assert_eq!(json["files"][0]["original_content"], "");
        assert_eq!(json["files"][0]["hash"], content_hash("secret body"));
    }
}
