//! Flags changes that look unmotivated: no explanation, an explanation that
//! shares almost nothing with the plan, or placeholder bodies.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::{Stage, Validator, ValidatorOutput};

/// Fewer shared significant words than this means the change drifted.
pub const MIN_OVERLAP: usize = 2;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(todo:?\s*implement|not\s+implemented|\bplaceholder\b)").unwrap()
});
static PLACEHOLDER_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bplaceholder\s*[=:]"#).unwrap());

pub struct HallucinationDetector;

/// Lowercased words longer than three characters.
pub fn significant_words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
        .collect()
}

fn plan_text(ctx: &ValidatorContext) -> Option<String> {
    if let Some(plan) = &ctx.plan {
        return Some(plan.scope_text());
    }
    ctx.config_str("plan_description").map(str::to_string)
}

impl Validator for HallucinationDetector {
    fn id(&self) -> &'static str {
        "hallucination-detector"
    }

    fn stage(&self) -> Stage {
        Stage::Scope
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let plan_words = plan_text(ctx)
            .map(|t| significant_words(&t))
            .filter(|w| !w.is_empty());
        let mut issues = Vec::new();

        for change in &ctx.changes {
            match change.explanation.as_deref().map(str::trim) {
                None | Some("") => issues.push(
                    ValidationIssue::warning(&change.path, "Change has no explanation")
                        .with_code("HALLUCINATION_NO_EXPLANATION")
                        .with_suggestion("Describe why this change is needed"),
                ),
                Some(explanation) => {
                    if let Some(plan_words) = &plan_words {
                        let words = significant_words(explanation);
                        let overlap = plan_words.intersection(&words).count();
                        if overlap < MIN_OVERLAP {
                            let relevance = overlap as f64 / plan_words.len() as f64;
                            issues.push(
                                ValidationIssue::warning(
                                    &change.path,
                                    format!(
                                        "Change exceeds plan scope (relevance {:.0}%)",
                                        relevance * 100.0
                                    ),
                                )
                                .with_code("HALLUCINATION_OUT_OF_SCOPE")
                                .with_suggestion("Tie the explanation to a task in the current plan"),
                            );
                        }
                    }
                }
            }

            if change.is_delete() {
                continue;
            }
            for (idx, line) in change.content.lines().enumerate() {
                if PLACEHOLDER.is_match(line) && !PLACEHOLDER_ATTRIBUTE.is_match(line) {
                    issues.push(
                        ValidationIssue::warning(&change.path, "Placeholder left in generated code")
                            .at_line(idx + 1)
                            .with_code("HALLUCINATION_PLACEHOLDER")
                            .with_suggestion("Provide the real implementation"),
                    );
                }
            }
        }

        Ok(issues.into())
    }
}
