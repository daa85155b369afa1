use std::path::Path;

use crate::core::change::{ChangeOperation, ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

/// File stem with test affixes removed: `login.test.ts`, `test_login.py` and
/// `login_test.go` all give `login`.
pub fn subject_stem(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or_default();
    let stem = stem.strip_prefix("test_").unwrap_or(stem);
    let stem = stem.strip_suffix("_test").unwrap_or(stem);
    stem.strip_suffix("_spec").unwrap_or(stem).to_string()
}

fn is_source(path: &str) -> bool {
    matches!(
        Language::detect(path),
        Language::Rust | Language::Python | Language::Script | Language::CLike
    ) && !lang::is_test_path(path)
        && !path.ends_with(".d.ts")
}

pub struct TestPresence;

impl Validator for TestPresence {
    fn id(&self) -> &'static str {
        "test-presence"
    }

    fn stage(&self) -> Stage {
        Stage::Accuracy
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let tested: Vec<String> = ctx
            .live_changes()
            .filter(|c| lang::is_test_path(&c.path))
            .map(|c| subject_stem(&c.path))
            .collect();

        let mut issues = Vec::new();
        for change in ctx.live_changes().filter(|c| is_source(&c.path)) {
            let before = match change.operation {
                ChangeOperation::Update => ctx
                    .existing(&change.path)
                    .map(|old| lang::exported_symbols(&change.path, old))
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            let added: Vec<String> = lang::exported_symbols(&change.path, &change.content)
                .into_iter()
                .filter(|s| before.binary_search(s).is_err())
                .collect();
            if added.is_empty() {
                continue;
            }
            let inline_tests = Language::detect(&change.path) == Language::Rust
                && change.content.contains("#[cfg(test)]");
            if inline_tests || tested.contains(&subject_stem(&change.path)) {
                continue;
            }
            issues.push(
                ValidationIssue::info(
                    &change.path,
                    format!("New exports without tests: {}", added.join(", ")),
                )
                .with_code("ACCURACY_MISSING_TESTS")
                .with_suggestion("Add or update a test covering the new code"),
            );
        }
        Ok(issues.into())
    }
}
