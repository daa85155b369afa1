//! Validation pipeline: mode selection, sequential execution, early exit and
//! aggregation.
//!
//! The pipeline entry point never fails. Validator errors and panics are
//! turned into issues by [`run_validator`], unknown validator ids into an
//! `info` issue, so the caller always gets a complete verdict.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::core::change::{
    Severity, ValidationIssue, ValidationPipelineResult, ValidationResult, ValidatorContext,
};
use crate::core::error::GateError;
use crate::core::registry;
use crate::core::trace;
use crate::validators::{Stage, run_validator};

/// Issue code prefixes that stop the run once a failed result carries them.
pub const EARLY_EXIT_PREFIXES: &[&str] = &["SEC_", "SECRET"];

/// Result name used for issues the pipeline itself raises.
pub const PIPELINE_RESULT: &str = "pipeline";

const FAST: &[&str] = &[
    "scope-guard",
    "syntax",
    "type-integrity",
    "import-resolution",
    "performance",
    "deprecated-api",
];
const FRONTEND_EXTRAS: &[&str] = &["frontend-accessibility", "deprecated-api"];
const BACKEND_EXTRAS: &[&str] = &["api-contract", "performance", "test-presence"];
const DATABASE_EXTRAS: &[&str] = &["database-safety", "test-presence"];
const SECURITY_EXTRAS: &[&str] = &["api-contract", "deprecated-api"];

/// What the pre-check needs from whoever owns the active plan.
pub trait ScopeCheck {
    fn active_plan_id(&self) -> Option<&str>;
    fn is_file_allowed(&self, path: &str) -> bool;

    /// False when the active plan no longer matches the checksum recorded at
    /// approval.
    fn lock_intact(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Strict,
    Fast,
    Frontend,
    Backend,
    Database,
    Security,
    Custom(Vec<String>),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Fast => "fast",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Database => "database",
            Self::Security => "security",
            Self::Custom(_) => "custom",
        }
    }

    /// Validator ids in run order. Custom ids keep the caller's order and may
    /// include ids the registry does not know.
    pub fn validator_ids(&self) -> Vec<String> {
        let focus = |extras: &[&str]| -> Vec<String> {
            registry::VALIDATORS
                .iter()
                .filter(|e| e.stage.is_universal() || extras.contains(&e.id))
                .map(|e| e.id.to_string())
                .collect()
        };
        match self {
            Self::Strict => registry::all_ids().into_iter().map(str::to_string).collect(),
            Self::Fast => FAST.iter().map(|s| s.to_string()).collect(),
            Self::Frontend => focus(FRONTEND_EXTRAS),
            Self::Backend => focus(BACKEND_EXTRAS),
            Self::Database => focus(DATABASE_EXTRAS),
            Self::Security => focus(SECURITY_EXTRAS),
            Self::Custom(ids) => {
                let mut out: Vec<String> = Vec::new();
                for id in ids {
                    if !out.contains(id) {
                        out.push(id.clone());
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(ids) => write!(f, "custom:{}", ids.join(",")),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Mode {
    type Err = GateError;

    /// Accepts the mode names plus `custom:<id>,<id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(list) = s.strip_prefix("custom:") {
            let ids = list
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Self::Custom(ids));
        }
        match s {
            "strict" => Ok(Self::Strict),
            "fast" => Ok(Self::Fast),
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "database" => Ok(Self::Database),
            "security" => Ok(Self::Security),
            "custom" => Ok(Self::Custom(Vec::new())),
            other => Err(GateError::ConfigError(format!("Unknown pipeline mode: {other}"))),
        }
    }
}

fn halts_run(result: &ValidationResult) -> bool {
    !result.passed
        && result.issues.iter().any(|issue| {
            issue.severity == Severity::Error
                && EARLY_EXIT_PREFIXES.iter().any(|p| issue.has_code_prefix(p))
        })
}

/// Files outside the active plan's lock, or a lock that no longer matches its
/// plan, as one synthetic scope-guard result.
fn scope_precheck(ctx: &ValidatorContext, scope: &dyn ScopeCheck) -> Option<ValidationResult> {
    let plan_id = scope.active_plan_id()?;
    let start = Instant::now();
    let mut issues: Vec<ValidationIssue> = Vec::new();
    if !scope.lock_intact() {
        issues.push(
            ValidationIssue::error("", format!("Plan {plan_id} was modified after approval"))
                .with_code("SCOPE_LOCK_TAMPERED")
                .with_suggestion("Cancel the plan and approve a fresh one"),
        );
    }
    issues.extend(
        ctx.changes
            .iter()
            .filter(|c| !scope.is_file_allowed(&c.path))
            .map(|c| {
                ValidationIssue::error(
                    &c.path,
                    format!("File is outside the scope of plan {plan_id}"),
                )
                .with_code("SCOPE_FILE_NOT_ALLOWED")
                .with_suggestion("Amend the plan or limit the change to its files")
            }),
    );
    if issues.is_empty() {
        return None;
    }
    Some(ValidationResult::from_issues(
        "scope-guard",
        issues,
        start.elapsed().as_millis() as u64,
    ))
}

pub struct Pipeline {
    mode: Mode,
}

impl Pipeline {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn run(&self, ctx: &ValidatorContext, scope: Option<&dyn ScopeCheck>) -> ValidationPipelineResult {
        let start = Instant::now();
        let mode = self.mode.name();

        if let Some(scope) = scope
            && let Some(rejected) = scope_precheck(ctx, scope)
        {
            trace::trace(&format!(
                "pipeline mode={mode} scope pre-check rejected {} file(s)",
                rejected.issues.len()
            ));
            return ValidationPipelineResult::aggregate(
                mode,
                vec![rejected],
                start.elapsed().as_millis() as u64,
                false,
            );
        }

        let mut results = Vec::new();
        let mut unknown = Vec::new();
        let mut halted_early = false;
        for id in self.mode.validator_ids() {
            let Some(validator) = registry::build(&id) else {
                unknown.push(id);
                continue;
            };
            let result = run_validator(validator.as_ref(), ctx);
            trace::trace(&format!(
                "pipeline mode={mode} validator={} passed={} issues={} duration_ms={}",
                result.validator,
                result.passed,
                result.issues.len(),
                result.duration_ms
            ));
            let stop = halts_run(&result);
            results.push(result);
            if stop {
                trace::trace(&format!("pipeline mode={mode} halted after {id}"));
                halted_early = true;
                break;
            }
        }

        if !unknown.is_empty() {
            results.insert(
                0,
                ValidationResult::from_issues(
                    PIPELINE_RESULT,
                    vec![ValidationIssue::info(
                        "",
                        format!("Unknown validator id(s) skipped: {}", unknown.join(", ")),
                    )
                    .with_code("PIPELINE_UNKNOWN_VALIDATOR")],
                    0,
                ),
            );
        }

        ValidationPipelineResult::aggregate(
            mode,
            results,
            start.elapsed().as_millis() as u64,
            halted_early,
        )
    }

    /// Every validator of one stage, without early exit or scope pre-check.
    pub fn run_stage(stage: Stage, ctx: &ValidatorContext) -> Vec<ValidationResult> {
        registry::ids_in_stage(stage)
            .filter_map(registry::build)
            .map(|validator| run_validator(validator.as_ref(), ctx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};

    struct Locked(Vec<&'static str>);

    impl ScopeCheck for Locked {
        fn active_plan_id(&self) -> Option<&str> {
            Some("plan_test")
        }

        fn is_file_allowed(&self, path: &str) -> bool {
            self.0.iter().any(|allowed| *allowed == path)
        }
    }

    #[test]
    fn mode_names_round_trip() {
        for name in ["strict", "fast", "frontend", "backend", "database", "security"] {
            let mode: Mode = name.parse().unwrap();
            assert_eq!(mode.to_string(), name);
        }
        assert_eq!(
            "custom: syntax, ,complexity".parse::<Mode>().unwrap(),
            Mode::Custom(vec!["syntax".to_string(), "complexity".to_string()])
        );
        assert!("turbo".parse::<Mode>().is_err());
    }

    #[test]
    fn focus_modes_add_extras_to_universal_stages() {
        let backend = Mode::Backend.validator_ids();
        assert!(backend.contains(&"scope-guard".to_string()));
        assert!(backend.contains(&"breaking-change".to_string()));
        assert!(backend.contains(&"api-contract".to_string()));
        assert!(!backend.contains(&"frontend-accessibility".to_string()));
        assert_eq!(backend.last().map(String::as_str), Some("test-presence"));
        assert_eq!(Mode::Fast.validator_ids().len(), 6);
        assert_eq!(Mode::Strict.validator_ids().len(), registry::VALIDATORS.len());
    }

    #[test]
    fn scope_precheck_short_circuits() {
        let ctx = ValidatorContext::new(vec![
            FileChange::new("src/a.ts", ChangeOperation::Update, "export const a = 1;\n"),
            FileChange::new("src/b.ts", ChangeOperation::Create, "export const b = 1;\n"),
        ]);
        let scope = Locked(vec!["src/a.ts"]);
        let result = Pipeline::new(Mode::Strict).run(&ctx, Some(&scope));
        assert!(!result.passed);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].validator, "scope-guard");
        assert_eq!(result.errors, 1);
        assert_eq!(result.results[0].issues[0].file, "src/b.ts");
    }

    struct Drifted;

    impl ScopeCheck for Drifted {
        fn active_plan_id(&self) -> Option<&str> {
            Some("plan_test")
        }

        fn is_file_allowed(&self, _path: &str) -> bool {
            true
        }

        fn lock_intact(&self) -> bool {
            false
        }
    }

    #[test]
    fn drifted_lock_rejects_even_allowed_files() {
        let ctx = ValidatorContext::new(vec![FileChange::new(
            "src/a.ts",
            ChangeOperation::Update,
            "export const a = 1;\n",
        )]);
        let result = Pipeline::new(Mode::Strict).run(&ctx, Some(&Drifted));
        assert!(!result.passed);
        assert_eq!(result.results.len(), 1);
        assert!(result.has_code("SCOPE_LOCK_TAMPERED"));
    }

    #[test]
    fn unknown_custom_ids_are_reported_not_fatal() {
        let ctx = ValidatorContext::new(vec![FileChange::new("a.json", ChangeOperation::Create, "{}")]);
        let mode = Mode::Custom(vec!["syntax".to_string(), "no-such".to_string()]);
        let result = Pipeline::new(mode).run(&ctx, None);
        assert!(result.passed);
        assert_eq!(result.results[0].validator, PIPELINE_RESULT);
        assert_eq!(result.infos, 1);
        assert!(result.ran("syntax"));
    }
}
