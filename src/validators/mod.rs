//! Validators: stateless policy checks over a proposed change set.
//!
//! Every validator reports issues for exactly one concern and belongs to one
//! [`Stage`]. Validators never mutate the context; anything they derive is
//! returned as a [`ValidatorArtifact`] next to the issues.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Instant;

use crate::core::change::{ValidationIssue, ValidationResult, ValidatorContext};
use crate::core::checkpoint::RollbackCheckpoint;
use crate::core::error::GateError;

pub mod lang;

pub mod accessibility;
pub mod api_contract;
pub mod breaking_change;
pub mod change_size;
pub mod complexity;
pub mod cycles;
pub mod database;
pub mod deprecated;
pub mod hallucination;
pub mod imports;
pub mod performance;
pub mod plan_coverage;
pub mod rollback;
pub mod scope_guard;
pub mod security;
pub mod style;
pub mod syntax;
pub mod test_presence;
pub mod type_integrity;

pub use change_size::SizeReport;
pub use style::StyleFingerprint;

/// Pipeline position of a validator. Declaration order is run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scope,
    Quality,
    Integrity,
    Compliance,
    Specialist,
    Accuracy,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Scope,
        Stage::Quality,
        Stage::Integrity,
        Stage::Compliance,
        Stage::Specialist,
        Stage::Accuracy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Quality => "quality",
            Self::Integrity => "integrity",
            Self::Compliance => "compliance",
            Self::Specialist => "specialist",
            Self::Accuracy => "accuracy",
        }
    }

    /// Stages every focus mode runs in full.
    pub fn is_universal(&self) -> bool {
        matches!(
            self,
            Self::Scope | Self::Quality | Self::Integrity | Self::Compliance
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| GateError::ValidationError(format!("Unknown stage: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionViolation {
    pub file: String,
    pub function: String,
}

/// Typed per-validator payload returned alongside the issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorArtifact {
    ScopeViolations {
        files: Vec<String>,
        functions: Vec<FunctionViolation>,
    },
    SizeReport(SizeReport),
    StyleFingerprint {
        files: BTreeMap<String, StyleFingerprint>,
    },
    Checkpoint(RollbackCheckpoint),
    DependencyCycles {
        cycles: Vec<Vec<String>>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorOutput {
    pub issues: Vec<ValidationIssue>,
    pub artifact: Option<ValidatorArtifact>,
}

impl ValidatorOutput {
    pub fn with_artifact(issues: Vec<ValidationIssue>, artifact: ValidatorArtifact) -> Self {
        Self {
            issues,
            artifact: Some(artifact),
        }
    }
}

impl From<Vec<ValidationIssue>> for ValidatorOutput {
    fn from(issues: Vec<ValidationIssue>) -> Self {
        Self {
            issues,
            artifact: None,
        }
    }
}

pub trait Validator: Send + Sync {
    /// Stable kebab-case identifier used by modes and results.
    fn id(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError>;
}

/// Run one validator with timing. An `Err` or a panic becomes a single
/// `"Validator error: ..."` error issue attributed to the validator.
pub fn run_validator(validator: &dyn Validator, ctx: &ValidatorContext) -> ValidationResult {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| validator.validate(ctx)));
    let duration_ms = start.elapsed().as_millis() as u64;

    let failure = |message: String| {
        ValidationResult::from_issues(
            validator.id(),
            vec![ValidationIssue::error("", format!("Validator error: {message}"))
                .with_code("VALIDATOR_FAILURE")],
            duration_ms,
        )
    };

    match outcome {
        Ok(Ok(output)) => {
            let mut result =
                ValidationResult::from_issues(validator.id(), output.issues, duration_ms);
            result.artifact = output.artifact;
            result
        }
        Ok(Err(e)) => failure(e.to_string()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            failure(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange, Severity};

    struct Exploding;

    impl Validator for Exploding {
        fn id(&self) -> &'static str {
            "exploding"
        }

        fn stage(&self) -> Stage {
            Stage::Quality
        }

        fn validate(&self, _ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
            panic!("boom");
        }
    }

    struct Failing;

    impl Validator for Failing {
        fn id(&self) -> &'static str {
            "failing"
        }

        fn stage(&self) -> Stage {
            Stage::Quality
        }

        fn validate(&self, _ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
            Err(GateError::NotFound("fixture".to_string()))
        }
    }

    #[test]
    fn panics_and_errors_become_single_error_issue() {
        let ctx = ValidatorContext::new(vec![FileChange::new("a.ts", ChangeOperation::Create, "x")]);

        let result = run_validator(&Exploding, &ctx);
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, Severity::Error);
        assert_eq!(result.issues[0].message, "Validator error: boom");

        let result = run_validator(&Failing, &ctx);
        assert_eq!(result.validator, "failing");
        assert!(result.issues[0].message.starts_with("Validator error: Not found"));
    }

    #[test]
    fn stage_order_and_names() {
        assert!(Stage::Scope < Stage::Accuracy);
        assert_eq!("integrity".parse::<Stage>().unwrap(), Stage::Integrity);
        assert!("nope".parse::<Stage>().is_err());
        assert!(Stage::Compliance.is_universal());
        assert!(!Stage::Specialist.is_universal());
    }
}
