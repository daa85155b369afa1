//! Compares the size of a change set with what was expected.
//!
//! `ratio = (actual - expected) / expected`, computed for files and lines.
//! A ratio above `error_threshold` is an error, above `warning_threshold` a
//! warning. Expected file counts fall back to the active plan's file list.

use serde::{Deserialize, Serialize};

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::config::{DEFAULT_ERROR_THRESHOLD, DEFAULT_WARNING_THRESHOLD};
use crate::core::error::GateError;
use crate::validators::lang::changed_lines;
use crate::validators::{Stage, Validator, ValidatorArtifact, ValidatorOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeAlert {
    None,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeReport {
    pub actual_files: usize,
    pub actual_lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_files: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_lines: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_ratio: Option<f64>,
    pub max_overage_percent: f64,
    pub alert: SizeAlert,
}

pub struct ChangeSizeMonitor;

pub fn overage_ratio(actual: usize, expected: usize) -> Option<f64> {
    (expected > 0).then(|| (actual as f64 - expected as f64) / expected as f64)
}

fn lines_touched(ctx: &ValidatorContext) -> usize {
    ctx.changes
        .iter()
        .map(|change| {
            if let Some(diff) = &change.diff {
                return diff
                    .lines()
                    .filter(|l| {
                        (l.starts_with('+') && !l.starts_with("+++"))
                            || (l.starts_with('-') && !l.starts_with("---"))
                    })
                    .count();
            }
            let existing = ctx.existing(&change.path);
            if change.is_delete() {
                return existing.map(|c| c.lines().count()).unwrap_or(0);
            }
            match existing {
                Some(old) => {
                    let (added, removed) = changed_lines(old, &change.content);
                    added.len() + removed.len()
                }
                None => change.content.lines().count(),
            }
        })
        .sum()
}

impl Validator for ChangeSizeMonitor {
    fn id(&self) -> &'static str {
        "change-size-monitor"
    }

    fn stage(&self) -> Stage {
        Stage::Scope
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let warning_threshold = ctx
            .config_f64("warning_threshold")
            .unwrap_or(DEFAULT_WARNING_THRESHOLD);
        let error_threshold = ctx
            .config_f64("error_threshold")
            .unwrap_or(DEFAULT_ERROR_THRESHOLD);
        let expected_files = ctx.config_usize("expected_files").or_else(|| {
            ctx.plan
                .as_ref()
                .map(|p| p.affected_files.len())
                .filter(|n| *n > 0)
        });
        let expected_lines = ctx.config_usize("expected_lines");

        let actual_files = ctx.changes.len();
        let actual_lines = lines_touched(ctx);
        let file_ratio = expected_files.and_then(|e| overage_ratio(actual_files, e));
        let line_ratio = expected_lines.and_then(|e| overage_ratio(actual_lines, e));

        let mut issues = Vec::new();
        let mut alert = SizeAlert::None;
        let checks = [
            ("files", "SIZE_FILES_EXCEEDED", file_ratio, actual_files, expected_files),
            ("lines", "SIZE_LINES_EXCEEDED", line_ratio, actual_lines, expected_lines),
        ];
        for (what, code, ratio, actual, expected) in checks {
            let (Some(ratio), Some(expected)) = (ratio, expected) else {
                continue;
            };
            let message = format!(
                "Change touches {actual} {what}, expected {expected} ({:.0}% over)",
                ratio * 100.0
            );
            if ratio > error_threshold {
                alert = SizeAlert::Critical;
                issues.push(
                    ValidationIssue::error("", message)
                        .with_code(code)
                        .with_suggestion("Split the change or update the plan estimate"),
                );
            } else if ratio > warning_threshold {
                if alert == SizeAlert::None {
                    alert = SizeAlert::Warning;
                }
                issues.push(ValidationIssue::warning("", message).with_code(code));
            }
        }

        let max_overage_percent = [file_ratio, line_ratio]
            .into_iter()
            .flatten()
            .fold(0.0_f64, |acc, r| acc.max(r * 100.0));

        let report = SizeReport {
            actual_files,
            actual_lines,
            expected_files,
            expected_lines,
            file_ratio,
            line_ratio,
            max_overage_percent,
            alert,
        };
        Ok(ValidatorOutput::with_artifact(
            issues,
            ValidatorArtifact::SizeReport(report),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};
    use serde_json::json;

    fn files(n: usize) -> Vec<FileChange> {
        (0..n)
            .map(|i| FileChange::new(&format!("src/f{i}.ts"), ChangeOperation::Create, "a\nb\n"))
            .collect()
    }

    fn report(out: &ValidatorOutput) -> &SizeReport {
        match &out.artifact {
            Some(ValidatorArtifact::SizeReport(r)) => r,
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn within_thresholds_is_quiet() {
        let ctx = ValidatorContext::new(files(3)).with_config("expected_files", json!(2));
        let out = ChangeSizeMonitor.validate(&ctx).unwrap();
        assert!(out.issues.is_empty());
        assert_eq!(report(&out).alert, SizeAlert::None);
        assert_eq!(report(&out).file_ratio, Some(0.5));
    }

    #[test]
    fn warning_band() {
        let ctx = ValidatorContext::new(files(4))
            .with_config("expected_files", json!(3))
            .with_config("warning_threshold", json!(0.2));
        let out = ChangeSizeMonitor.validate(&ctx).unwrap();
        assert_eq!(out.issues.len(), 1);
        assert_eq!(report(&out).alert, SizeAlert::Warning);
    }

    #[test]
    fn line_budget_counts_created_lines() {
        let ctx = ValidatorContext::new(files(2)).with_config("expected_lines", json!(1));
        let out = ChangeSizeMonitor.validate(&ctx).unwrap();
        assert_eq!(report(&out).actual_lines, 4);
        assert_eq!(report(&out).line_ratio, Some(3.0));
        assert_eq!(report(&out).alert, SizeAlert::Critical);
        assert_eq!(out.issues[0].code.as_deref(), Some("SIZE_LINES_EXCEEDED"));
    }

    #[test]
    fn no_expectation_means_no_ratio() {
        let out = ChangeSizeMonitor.validate(&ValidatorContext::new(files(9))).unwrap();
        assert!(out.issues.is_empty());
        assert_eq!(report(&out).max_overage_percent, 0.0);
    }
}
