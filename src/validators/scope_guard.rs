//! Scope guard: changes must stay inside the approved file and function
//! allow-list.
//!
//! The allow-list comes from the context config (`allowed_files`,
//! `allowed_functions`) when present, otherwise from the active plan's lock.
//! Without either there is nothing to enforce.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::core::change::{ChangeOperation, FileChange, ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::validators::lang::{changed_lines, declared_function, glob_match};
use crate::validators::{FunctionViolation, Stage, Validator, ValidatorArtifact, ValidatorOutput};

pub struct ScopeGuard;

#[derive(Debug, Default)]
struct AllowList {
    files: Vec<String>,
    functions: BTreeMap<String, BTreeSet<String>>,
}

impl AllowList {
    fn from_context(ctx: &ValidatorContext) -> Option<Self> {
        if ctx.config.contains_key("allowed_files") {
            let files = ctx
                .config_strings("allowed_files")
                .iter()
                .map(|f| normalize_plan_path(f))
                .collect();
            let mut functions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            if let Some(Value::Object(map)) = ctx.config.get("allowed_functions") {
                for (path, names) in map {
                    let names = names
                        .as_array()
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    functions.insert(normalize_plan_path(path), names);
                }
            }
            return Some(Self { files, functions });
        }
        let lock = ctx.plan.as_ref()?.lock.as_ref()?;
        Some(Self {
            files: lock.allowed_files.iter().cloned().collect(),
            functions: lock.allowed_functions.clone(),
        })
    }

    fn allows(&self, path: &str) -> bool {
        self.files.iter().any(|entry| {
            entry == path
                || (entry.ends_with('*') && path.starts_with(entry.trim_end_matches('*')))
                || glob_match(entry, path)
        })
    }
}

/// Functions touched by an update: declarations on added/removed diff lines
/// and the enclosing function named in hunk headers, or, without a diff, the
/// functions enclosing lines that differ from the existing content.
pub fn changed_functions(change: &FileChange, existing: Option<&str>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    if let Some(diff) = &change.diff {
        for line in diff.lines() {
            if let Some(rest) = line.strip_prefix("@@") {
                if let Some((_, context)) = rest.split_once("@@")
                    && let Some(name) = declared_function(context.trim())
                {
                    out.insert(name);
                }
            } else if line.starts_with("+++") || line.starts_with("---") {
                continue;
            } else if let Some(body) = line.strip_prefix('+').or_else(|| line.strip_prefix('-'))
                && let Some(name) = declared_function(body)
            {
                out.insert(name);
            }
        }
        return out;
    }

    let Some(old) = existing else {
        return out;
    };
    let (added, removed) = changed_lines(old, &change.content);
    collect_enclosing(&change.content, &added, &mut out);
    collect_enclosing(old, &removed, &mut out);
    out
}

fn collect_enclosing(content: &str, lines: &[usize], out: &mut BTreeSet<String>) {
    if lines.is_empty() {
        return;
    }
    let mut current: Option<String> = None;
    let wanted: BTreeSet<usize> = lines.iter().copied().collect();
    for (idx, line) in content.lines().enumerate() {
        if let Some(name) = declared_function(line) {
            current = Some(name);
        }
        if wanted.contains(&(idx + 1))
            && let Some(name) = &current
        {
            out.insert(name.clone());
        }
    }
}

impl Validator for ScopeGuard {
    fn id(&self) -> &'static str {
        "scope-guard"
    }

    fn stage(&self) -> Stage {
        Stage::Scope
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let Some(allow) = AllowList::from_context(ctx) else {
            return Ok(ValidatorOutput::default());
        };

        let mut issues = Vec::new();
        let mut bad_files = Vec::new();
        let mut bad_functions = Vec::new();

        for change in &ctx.changes {
            let path = normalize_plan_path(&change.path);
            if !allow.allows(&path) {
                if change.operation == ChangeOperation::Create {
                    issues.push(
                        ValidationIssue::warning(
                            &change.path,
                            format!("New file {} is not part of the approved scope", path),
                        )
                        .with_code("SCOPE_NEW_FILE")
                        .with_suggestion("Add the file to the plan before creating it"),
                    );
                } else {
                    issues.push(
                        ValidationIssue::error(
                            &change.path,
                            format!("File {} is outside the approved scope", path),
                        )
                        .with_code("SCOPE_FILE_NOT_ALLOWED")
                        .with_suggestion("Revert this change or amend the plan"),
                    );
                    bad_files.push(path);
                }
                continue;
            }

            if change.operation != ChangeOperation::Update {
                continue;
            }
            let Some(allowed) = allow.functions.get(&path) else {
                continue;
            };
            for name in changed_functions(change, ctx.existing(&change.path)) {
                if !allowed.contains(&name) {
                    issues.push(
                        ValidationIssue::error(
                            &change.path,
                            format!("Function {name} is not in the approved scope for {path}"),
                        )
                        .with_code("SCOPE_FUNCTION_NOT_ALLOWED"),
                    );
                    bad_functions.push(FunctionViolation {
                        file: path.clone(),
                        function: name,
                    });
                }
            }
        }

        Ok(ValidatorOutput::with_artifact(
            issues,
            ValidatorArtifact::ScopeViolations {
                files: bad_files,
                functions: bad_functions,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::Severity;
    use serde_json::json;

    #[test]
    fn diff_hunks_and_declarations_are_collected() {
        let change = FileChange::new("src/a.ts", ChangeOperation::Update, "").with_diff(
            "--- a/src/a.ts\n+++ b/src/a.ts\n@@ -1,3 +1,4 @@ function keep() {\n+  return 2;\n+function added() {\n",
        );
        let names = changed_functions(&change, None);
        assert!(names.contains("keep"));
        assert!(names.contains("added"));
    }

    #[test]
    fn enclosing_function_without_diff() {
        let old = "function a() {\n  return 1;\n}\nfunction b() {\n  return 2;\n}\n";
        let new = "function a() {\n  return 1;\n}\nfunction b() {\n  return 3;\n}\n";
        let change = FileChange::new("src/a.ts", ChangeOperation::Update, new);
        let names = changed_functions(&change, Some(old));
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[test]
    fn wildcard_entries_cover_new_files() {
        let ctx = ValidatorContext::new(vec![FileChange::new(
            "src/components/Button.tsx",
            ChangeOperation::Create,
            "",
        )])
        .with_config("allowed_files", json!(["src/components/*"]));
        let out = ScopeGuard.validate(&ctx).unwrap();
        assert!(out.issues.is_empty());

        let ctx = ValidatorContext::new(vec![FileChange::new("lib/x.ts", ChangeOperation::Create, "")])
            .with_config("allowed_files", json!(["src/components/*"]));
        let out = ScopeGuard.validate(&ctx).unwrap();
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].severity, Severity::Warning);
    }
}
