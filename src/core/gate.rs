//! The review cycle: snapshot the files a change set touches, validate it
//! against the active plan, and hand back the verdict together with the
//! checkpoint that undoes it.

use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::broker::DbBroker;
use crate::core::change::{FileChange, ValidationPipelineResult, ValidatorContext};
use crate::core::checkpoint::{CheckpointManager, CheckpointOptions, RollbackCheckpoint, RollbackOutcome};
use crate::core::config::{GateConfig, load_config};
use crate::core::error::GateError;
use crate::core::pipeline::{Mode, Pipeline, ScopeCheck};
use crate::core::plan::{PlanManager, normalize_plan_path};
use crate::core::plan_store::SqlitePlanStore;
use crate::core::store::Store;
use crate::core::vcs::{GitCli, Vcs};

#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    /// Overrides the configured mode.
    pub mode: Option<Mode>,
    /// Current file contents as the caller sees them. Read from the
    /// snapshot (or disk) when absent.
    pub existing_files: Option<BTreeMap<String, String>>,
    pub description: Option<String>,
}

pub struct Gate {
    store: Store,
    config: GateConfig,
    broker: DbBroker,
    plans: PlanManager,
    checkpoints: CheckpointManager,
}

impl Gate {
    pub fn open(project_root: &Path) -> Result<Self, GateError> {
        Self::open_with_vcs(project_root, Box::new(GitCli::new(project_root)))
    }

    pub fn open_with_vcs(project_root: &Path, vcs: Box<dyn Vcs>) -> Result<Self, GateError> {
        let store = Store::for_project(project_root);
        store.ensure()?;
        let config = load_config(project_root)?;
        let broker = DbBroker::new(&store.root);
        let plans = PlanManager::open(Box::new(SqlitePlanStore::open(&store)?), Some(broker.clone()))?;
        let checkpoints = CheckpointManager::new(&store, config.backup_dir(&store), vcs, &config.checkpoint)
            .with_broker(broker.clone());
        Ok(Self {
            store,
            config,
            broker,
            plans,
            checkpoints,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn plans(&self) -> &PlanManager {
        &self.plans
    }

    pub fn plans_mut(&mut self) -> &mut PlanManager {
        &mut self.plans
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn checkpoints_mut(&mut self) -> &mut CheckpointManager {
        &mut self.checkpoints
    }

    /// Current content of update/delete targets, read from disk.
    fn read_existing(&self, changes: &[FileChange]) -> BTreeMap<String, String> {
        changes
            .iter()
            .filter_map(|c| {
                let content = fs::read_to_string(self.store.project_root.join(&c.path)).ok()?;
                Some((c.path.clone(), content))
            })
            .collect()
    }

    /// Snapshot, validate, audit. Never fails: a snapshot error is audited and
    /// the review proceeds without a checkpoint.
    pub fn review(&mut self, changes: Vec<FileChange>, opts: ReviewOptions) -> ValidationPipelineResult {
        let mode = match opts.mode {
            Some(mode) => mode,
            None => self.config.mode().unwrap_or(Mode::Strict),
        };
        let changes: Vec<FileChange> = changes
            .into_iter()
            .map(|mut c| {
                c.path = normalize_plan_path(&c.path);
                c
            })
            .collect();
        let view = self.plans.active_view();
        let paths: Vec<String> = changes.iter().map(|c| c.path.clone()).collect();

        let checkpoint = match self.checkpoints.create_checkpoint(
            &paths,
            CheckpointOptions {
                plan_id: view.as_ref().map(|v| v.plan_id.clone()),
                phase_id: view.as_ref().and_then(|v| v.phase_id.clone()),
                description: opts.description.clone().or_else(|| Some("pre-review snapshot".to_string())),
            },
        ) {
            Ok(cp) => Some(cp),
            Err(e) => {
                self.broker.note(
                    "gate",
                    "review.checkpoint",
                    mode.name(),
                    "error",
                    json!({ "error": e.to_string(), "files": paths }),
                );
                None
            }
        };

        let existing_files = match (opts.existing_files, &checkpoint) {
            (Some(files), _) => files
                .into_iter()
                .map(|(path, content)| (normalize_plan_path(&path), content))
                .collect(),
            (None, Some(cp)) => snapshot_contents(cp),
            (None, None) => self.read_existing(&changes),
        };

        let mut ctx = ValidatorContext::new(changes);
        ctx.existing_files = existing_files;
        ctx.project_path = self.store.project_root.clone();
        ctx.config = self.config.validator_config();
        if let Some(view) = view {
            ctx = ctx.with_plan(view);
        }

        let scope: &dyn ScopeCheck = &self.plans;
        let mut result = Pipeline::new(mode).run(&ctx, Some(scope));
        result.checkpoint = checkpoint.as_ref().map(RollbackCheckpoint::without_content);

        for error in self.plans.take_persist_errors() {
            self.broker
                .note("gate", "plan.persist", "review", "error", json!({ "error": error }));
        }
        self.broker.note(
            "gate",
            "pipeline.run",
            &result.mode,
            if result.passed { "passed" } else { "failed" },
            json!({
                "files": paths,
                "errors": result.errors,
                "warnings": result.warnings,
                "infos": result.infos,
                "halted_early": result.halted_early,
                "plan_id": ctx.plan_id,
                "checkpoint": result.checkpoint.as_ref().map(|cp| cp.id.clone()),
            }),
        );
        result
    }

    /// Restore the files captured by `checkpoint_id`.
    pub fn undo(&self, checkpoint_id: &str) -> Result<RollbackOutcome, GateError> {
        let checkpoint = self.checkpoints.load_checkpoint(checkpoint_id)?;
        Ok(self.checkpoints.rollback(&checkpoint))
    }
}

fn snapshot_contents(cp: &RollbackCheckpoint) -> BTreeMap<String, String> {
    cp.files
        .iter()
        .filter(|f| f.exists)
        .map(|f| (f.path.clone(), f.original_content.clone()))
        .collect()
}
