//! Public surface removals: exports dropped by an update and deleted files
//! that other modules still import.

use crate::core::change::{ChangeOperation, ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::validators::imports::{relative_imports, FileUniverse};
use crate::validators::lang;
use crate::validators::{Stage, Validator, ValidatorOutput};

pub struct BreakingChange;

impl BreakingChange {
    fn removed_exports(ctx: &ValidatorContext, issues: &mut Vec<ValidationIssue>) {
        for change in ctx.changes.iter().filter(|c| c.operation == ChangeOperation::Update) {
            let Some(old) = ctx.existing(&change.path) else {
                continue;
            };
            let kept = lang::exported_symbols(&change.path, &change.content);
            for symbol in lang::exported_symbols(&change.path, old) {
                if kept.binary_search(&symbol).is_err() {
                    issues.push(
                        ValidationIssue::warning(
                            &change.path,
                            format!("Exported symbol '{symbol}' was removed"),
                        )
                        .with_code("BREAKING_EXPORT_REMOVED")
                        .with_suggestion("Keep a re-export or update every caller"),
                    );
                }
            }
        }
    }

    /// Importers outside the change set that still point at a deleted file.
    fn orphaned_importers(ctx: &ValidatorContext, issues: &mut Vec<ValidationIssue>) {
        let universe = FileUniverse::new(ctx);
        if universe.deleted.is_empty() {
            return;
        }
        for deleted in &universe.deleted {
            let mut importers: Vec<String> = Vec::new();
            for (path, content) in &ctx.existing_files {
                let importer = normalize_plan_path(path);
                if universe.deleted.contains(&importer) {
                    continue;
                }
                // Changed importers are judged on their new content.
                let source = ctx
                    .changes
                    .iter()
                    .find(|c| normalize_plan_path(&c.path) == importer)
                    .map(|c| c.content.as_str())
                    .unwrap_or(content.as_str());
                let hits = relative_imports(&importer, source)
                    .iter()
                    .any(|i| universe.resolves_to_deleted(&importer, &i.specifier).as_deref() == Some(deleted.as_str()));
                if hits {
                    importers.push(importer);
                }
            }
            if importers.is_empty() {
                continue;
            }
            issues.push(
                ValidationIssue::warning(
                    deleted,
                    format!("Deleted file is still imported by {}", importers.join(", ")),
                )
                .with_code("BREAKING_FILE_DELETED"),
            );
        }
    }
}

impl Validator for BreakingChange {
    fn id(&self) -> &'static str {
        "breaking-change"
    }

    fn stage(&self) -> Stage {
        Stage::Compliance
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        Self::removed_exports(ctx, &mut issues);
        Self::orphaned_importers(ctx, &mut issues);
        Ok(issues.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::FileChange;

    #[test]
    fn dropped_export_is_flagged() {
        let ctx = ValidatorContext::new(vec![FileChange::new(
            "src/math.ts",
            ChangeOperation::Update,
            "export function add(a: number, b: number): number {\n  return a + b;\n}\n",
        )])
        .with_existing(
            "src/math.ts",
            "export function add(a: number, b: number): number {\n  return a + b;\n}\nexport const PI = 3.14;\n",
        );
        let issues = BreakingChange.validate(&ctx).unwrap().issues;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code.as_deref(), Some("BREAKING_EXPORT_REMOVED"));
        assert!(issues[0].message.contains("PI"));
    }

    #[test]
    fn deleting_an_imported_file_names_its_importers() {
        let ctx = ValidatorContext::new(vec![FileChange::new("src/util.ts", ChangeOperation::Delete, "")])
            .with_existing("src/util.ts", "export const u = 1;\n")
            .with_existing("src/app.ts", "import { u } from './util';\n")
            .with_existing("src/other.ts", "export const o = 2;\n");
        let issues = BreakingChange.validate(&ctx).unwrap().issues;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code.as_deref(), Some("BREAKING_FILE_DELETED"));
        assert_eq!(issues[0].message, "Deleted file is still imported by src/app.ts");
    }

    #[test]
    fn importer_rewritten_in_same_change_is_not_orphaned() {
        let ctx = ValidatorContext::new(vec![
            FileChange::new("src/util.ts", ChangeOperation::Delete, ""),
            FileChange::new("src/app.ts", ChangeOperation::Update, "export const a = 1;\n"),
        ])
        .with_existing("src/util.ts", "export const u = 1;\n")
        .with_existing("src/app.ts", "import { u } from './util';\n");
        assert!(BreakingChange.validate(&ctx).unwrap().issues.is_empty());
    }
}
