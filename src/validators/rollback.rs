//! Pre-image capture as a pipeline step. The validator itself never fails;
//! it hands back the checkpoint it would restore from.

use crate::core::change::{ChangeOperation, ValidatorContext};
use crate::core::checkpoint::{CheckpointFile, CheckpointKind, RollbackCheckpoint};
use crate::core::error::GateError;
use crate::core::time;
use crate::validators::{Stage, Validator, ValidatorArtifact, ValidatorOutput};

pub struct RollbackCheckpointValidator;

/// Pre-image of one changed path. Update and delete targets whose current
/// content is unknown are skipped.
fn pre_image(ctx: &ValidatorContext, path: &str, operation: ChangeOperation) -> Option<CheckpointFile> {
    if let Some(content) = ctx.existing(path) {
        return Some(CheckpointFile::capture(path, Some(content)));
    }
    let root = &ctx.project_path;
    if !root.as_os_str().is_empty()
        && let Ok(content) = std::fs::read_to_string(root.join(path))
    {
        return Some(CheckpointFile::capture(path, Some(&content)));
    }
    match operation {
        ChangeOperation::Create => Some(CheckpointFile::capture(path, None)),
        ChangeOperation::Update | ChangeOperation::Delete => None,
    }
}

impl Validator for RollbackCheckpointValidator {
    fn id(&self) -> &'static str {
        "rollback-checkpoint"
    }

    fn stage(&self) -> Stage {
        Stage::Compliance
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let files = ctx
            .changes
            .iter()
            .filter_map(|c| pre_image(ctx, &c.path, c.operation))
            .collect();
        let checkpoint = RollbackCheckpoint {
            id: time::new_prefixed_id("cp"),
            timestamp: time::now_iso(),
            kind: CheckpointKind::FileBackup,
            files,
            plan_id: ctx.plan_id.clone(),
            phase_id: ctx.phase_id.clone(),
            description: Some("pipeline pre-image".to_string()),
            stash_ref: None,
            skipped: Vec::new(),
        };
        Ok(ValidatorOutput::with_artifact(
            Vec::new(),
            ValidatorArtifact::Checkpoint(checkpoint),
        ))
    }
}
