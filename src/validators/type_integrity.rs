//! Type-safety escape hatches in TypeScript and Rust.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

static EXPLICIT_ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?::\s*any\b|\bas\s+any\b|<any>|\bany\[\])").unwrap());
static SUPPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ts-(?:ignore|nocheck)\b").unwrap());
static NON_NULL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w\)\]]!\.[A-Za-z_$]").unwrap());
static UNTYPED_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*export\s+(?:default\s+)?(?:async\s+)?function\s+[A-Za-z_$][\w$]*\s*(?:<[^>]*>)?\s*\([^)]*\)\s*\{").unwrap()
});
static UNWRAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.unwrap\(\)").unwrap());

pub struct TypeIntegrity;

fn check_typescript(path: &str, content: &str, issues: &mut Vec<ValidationIssue>) {
    for (idx, raw) in content.lines().enumerate() {
        if SUPPRESSION.is_match(raw) {
            issues.push(
                ValidationIssue::warning(path, "Type checking suppressed")
                    .at_line(idx + 1)
                    .with_code("TYPE_SUPPRESSED_CHECK")
                    .with_suggestion("Fix the underlying type error instead"),
            );
        }
    }
    if !lang::is_typescript(path) {
        return;
    }
    let masked = lang::mask(content, Language::Script);
    for (idx, line) in masked.lines().enumerate() {
        if EXPLICIT_ANY.is_match(line) {
            issues.push(
                ValidationIssue::warning(path, "Explicit `any` type")
                    .at_line(idx + 1)
                    .with_code("TYPE_EXPLICIT_ANY")
                    .with_suggestion("Use a concrete type or `unknown`"),
            );
        }
        if NON_NULL.is_match(line) {
            issues.push(
                ValidationIssue::info(path, "Non-null assertion")
                    .at_line(idx + 1)
                    .with_code("TYPE_NON_NULL_ASSERTION"),
            );
        }
        if UNTYPED_EXPORT.is_match(line) {
            issues.push(
                ValidationIssue::info(path, "Exported function has no return type")
                    .at_line(idx + 1)
                    .with_code("TYPE_MISSING_RETURN_TYPE"),
            );
        }
    }
}

fn check_rust(path: &str, content: &str, issues: &mut Vec<ValidationIssue>) {
    if lang::is_test_path(path) {
        return;
    }
    let masked = lang::mask(content, Language::Rust);
    for (idx, line) in masked.lines().enumerate() {
        if line.contains("#[cfg(test)]") {
            break;
        }
        if UNWRAP.is_match(line) {
            issues.push(
                ValidationIssue::info(path, "`unwrap()` outside tests")
                    .at_line(idx + 1)
                    .with_code("TYPE_UNWRAP")
                    .with_suggestion("Propagate the error with `?`"),
            );
        }
    }
}

impl Validator for TypeIntegrity {
    fn id(&self) -> &'static str {
        "type-integrity"
    }

    fn stage(&self) -> Stage {
        Stage::Integrity
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            match Language::detect(&change.path) {
                Language::Script => check_typescript(&change.path, &change.content, &mut issues),
                Language::Rust => check_rust(&change.path, &change.content, &mut issues),
                _ => {}
            }
        }
        Ok(issues.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};

    fn codes(path: &str, content: &str) -> Vec<String> {
        let ctx = ValidatorContext::new(vec![FileChange::new(path, ChangeOperation::Create, content)]);
        TypeIntegrity
            .validate(&ctx)
            .unwrap()
            .issues
            .into_iter()
            .filter_map(|i| i.code)
            .collect()
    }

    #[test]
    fn typescript_escape_hatches() {
        let src = "// @ts-ignore\nconst a: any = load();\nconst n = user!.name;\nexport function f(x: number) {\n  return x;\n}\nconst s = \"as any\";\n";
        assert_eq!(
            codes("src/a.ts", src),
            vec![
                "TYPE_SUPPRESSED_CHECK",
                "TYPE_EXPLICIT_ANY",
                "TYPE_NON_NULL_ASSERTION",
                "TYPE_MISSING_RETURN_TYPE"
            ]
        );
        assert!(codes("src/a.ts", "export function f(x: number): number {\n  return x !== 1 ? 1 : 2;\n}\n").is_empty());
    }

    #[test]
    fn rust_unwrap_outside_tests() {
        let src = "fn f() { let x = g().unwrap(); }\n#[cfg(test)]\nmod tests { fn t() { h().unwrap(); } }\n";
        assert_eq!(codes("src/lib.rs", src), vec!["TYPE_UNWRAP"]);
        assert!(codes("tests/it.rs", src).is_empty());
    }
}
