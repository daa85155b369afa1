//! Change-set and verdict types shared by validators, the pipeline and the
//! CLI. Field names serialize in snake_case; these are the JSON shapes the
//! editor host exchanges with the gate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::core::checkpoint::RollbackCheckpoint;
use crate::core::plan::PlanView;
use crate::validators::ValidatorArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

/// One proposed file edit. Immutable once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub operation: ChangeOperation,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl FileChange {
    pub fn new(path: &str, operation: ChangeOperation, content: &str) -> Self {
        Self {
            path: path.to_string(),
            operation,
            content: content.to_string(),
            explanation: None,
            diff: None,
        }
    }

    pub fn with_explanation(mut self, explanation: &str) -> Self {
        self.explanation = Some(explanation.to_string());
        self
    }

    pub fn with_diff(mut self, diff: &str) -> Self {
        self.diff = Some(diff.to_string());
        self
    }

    pub fn is_delete(&self) -> bool {
        self.operation == ChangeOperation::Delete
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Atomic unit of feedback. Has no identity beyond its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, file: &str, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            line: None,
            message: message.into(),
            severity,
            code: None,
            suggestion: None,
        }
    }

    pub fn error(file: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, file, message)
    }

    pub fn warning(file: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, file, message)
    }

    pub fn info(file: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, file, message)
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn has_code_prefix(&self, prefix: &str) -> bool {
        self.code.as_deref().is_some_and(|c| c.starts_with(prefix))
    }
}

/// Everything a validator may look at. Built fresh per pipeline run and
/// shared read-only across validators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorContext {
    pub changes: Vec<FileChange>,
    #[serde(default)]
    pub existing_files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default)]
    pub project_path: PathBuf,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Read-only snapshot of the active plan, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanView>,
}

impl ValidatorContext {
    pub fn new(changes: Vec<FileChange>) -> Self {
        Self {
            changes,
            ..Self::default()
        }
    }

    pub fn with_existing(mut self, path: &str, content: &str) -> Self {
        self.existing_files
            .insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn with_plan(mut self, plan: PlanView) -> Self {
        self.plan_id = Some(plan.plan_id.clone());
        self.phase_id = plan.phase_id.clone();
        self.plan = Some(plan);
        self
    }

    pub fn existing(&self, path: &str) -> Option<&str> {
        self.existing_files.get(path).map(String::as_str)
    }

    /// Changes that leave content behind (create/update).
    pub fn live_changes(&self) -> impl Iterator<Item = &FileChange> {
        self.changes.iter().filter(|c| !c.is_delete())
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }

    pub fn config_usize(&self, key: &str) -> Option<usize> {
        self.config
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_strings(&self, key: &str) -> Vec<String> {
        match self.config.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// One validator's verdict for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator: String,
    pub passed: bool,
    pub severity: Severity,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ValidatorArtifact>,
}

impl ValidationResult {
    /// `passed` is derived: true iff no issue has severity `error`.
    pub fn from_issues(validator: &str, issues: Vec<ValidationIssue>, duration_ms: u64) -> Self {
        let passed = !issues.iter().any(|i| i.severity == Severity::Error);
        let severity = issues
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::Info);
        Self {
            validator: validator.to_string(),
            passed,
            severity,
            issues,
            duration_ms,
            artifact: None,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPipelineResult {
    pub passed: bool,
    pub mode: String,
    pub results: Vec<ValidationResult>,
    pub total_issues: usize,
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
    pub duration_ms: u64,
    /// True when a security error stopped the run before every selected
    /// validator executed.
    #[serde(default)]
    pub halted_early: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<RollbackCheckpoint>,
}

impl ValidationPipelineResult {
    pub fn aggregate(
        mode: &str,
        results: Vec<ValidationResult>,
        duration_ms: u64,
        halted_early: bool,
    ) -> Self {
        let passed = results.iter().all(|r| r.passed);
        let errors = results.iter().map(|r| r.count(Severity::Error)).sum();
        let warnings = results.iter().map(|r| r.count(Severity::Warning)).sum();
        let infos = results.iter().map(|r| r.count(Severity::Info)).sum();
        let total_issues = results.iter().map(|r| r.issues.len()).sum();
        Self {
            passed,
            mode: mode.to_string(),
            results,
            total_issues,
            errors,
            warnings,
            infos,
            duration_ms,
            halted_early,
            checkpoint: None,
        }
    }

    pub fn result_for(&self, validator: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.validator == validator)
    }

    pub fn ran(&self, validator: &str) -> bool {
        self.result_for(validator).is_some()
    }

    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.results.iter().flat_map(|r| r.issues.iter())
    }

    /// Blocking issues: everything with severity `error`.
    pub fn must_fix(&self) -> Vec<&ValidationIssue> {
        self.issues()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }

    /// Advisory issues: `warning` and `info`.
    pub fn suggestions(&self) -> Vec<&ValidationIssue> {
        self.issues()
            .filter(|i| i.severity != Severity::Error)
            .collect()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues().any(|i| i.code.as_deref() == Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_passes_only_without_errors() {
        let ok = ValidationResult::from_issues(
            "syntax",
            vec![ValidationIssue::warning("a.ts", "w"), ValidationIssue::info("a.ts", "i")],
            1,
        );
        assert!(ok.passed);
        assert_eq!(ok.severity, Severity::Warning);

        let bad = ValidationResult::from_issues(
            "syntax",
            vec![ValidationIssue::error("a.ts", "e")],
            1,
        );
        assert!(!bad.passed);
        assert_eq!(bad.severity, Severity::Error);

        let empty = ValidationResult::from_issues("syntax", vec![], 0);
        assert!(empty.passed);
        assert_eq!(empty.severity, Severity::Info);
    }

    #[test]
    fn aggregate_counts_by_severity() {
        let results = vec![
            ValidationResult::from_issues(
                "a",
                vec![
                    ValidationIssue::error("x", "e"),
                    ValidationIssue::warning("x", "w"),
                ],
                0,
            ),
            ValidationResult::from_issues("b", vec![ValidationIssue::info("y", "i")], 0),
        ];
        let agg = ValidationPipelineResult::aggregate("strict", results, 3, false);
        assert!(!agg.passed);
        assert_eq!(agg.errors, 1);
        assert_eq!(agg.warnings, 1);
        assert_eq!(agg.infos, 1);
        assert_eq!(agg.total_issues, 3);
        assert_eq!(agg.must_fix().len(), 1);
        assert_eq!(agg.suggestions().len(), 2);
    }

    #[test]
    fn file_change_json_shape() {
        let raw = r#"{"path":"src/a.ts","operation":"update","content":"x","explanation":"why"}"#;
        let change: FileChange = serde_json::from_str(raw).unwrap();
        assert_eq!(change.operation, ChangeOperation::Update);
        assert_eq!(change.explanation.as_deref(), Some("why"));
        assert!(change.diff.is_none());
    }

    #[test]
    fn config_accessors() {
        let ctx = ValidatorContext::new(vec![])
            .with_config("expected_files", serde_json::json!(2))
            .with_config("allowed_files", serde_json::json!(["a", "b"]))
            .with_config("warning_threshold", serde_json::json!(0.25));
        assert_eq!(ctx.config_usize("expected_files"), Some(2));
        assert_eq!(ctx.config_strings("allowed_files"), vec!["a", "b"]);
        assert_eq!(ctx.config_f64("warning_threshold"), Some(0.25));
        assert_eq!(ctx.config_f64("missing"), None);
    }
}
