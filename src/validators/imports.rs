//! Relative import extraction and resolution for script modules, plus the
//! import-resolution validator.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::core::plan::normalize_plan_path;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

pub const RESOLVE_EXTENSIONS: &[&str] = &[
    "", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json", ".d.ts",
];

static IMPORT_SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)(?:\bimport\s+(?:[^'";]*?\s+from\s+)?|\bexport\s+[^'";]*?\s+from\s+|\brequire\s*\(\s*|\bimport\s*\(\s*)["'](\.{1,2}/[^"']*)["']"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    pub line: usize,
}

/// Relative (`./`, `../`) imports of a script file. Matches inside comments
/// are ignored.
pub fn relative_imports(path: &str, content: &str) -> Vec<ImportRef> {
    if Language::detect(path) != Language::Script {
        return Vec::new();
    }
    let masked = lang::mask(content, Language::Script);
    IMPORT_SPECIFIER
        .captures_iter(content)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let keyword_live = masked
                .text
                .get(whole.start()..whole.start() + 1)
                .is_some_and(|s| s != " ");
            keyword_live.then(|| ImportRef {
                specifier: cap[1].to_string(),
                line: lang::line_number(content, whole.start()),
            })
        })
        .collect()
}

/// Join `specifier` onto the importer's directory, folding `.` and `..`.
pub fn join_specifier(importer: &str, specifier: &str) -> String {
    let base = Path::new(importer)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Candidate files an import may refer to, in resolution order.
pub fn candidates(importer: &str, specifier: &str) -> Vec<String> {
    let joined = join_specifier(importer, specifier);
    let mut out: Vec<String> = RESOLVE_EXTENSIONS
        .iter()
        .map(|ext| format!("{joined}{ext}"))
        .collect();
    out.extend(
        RESOLVE_EXTENSIONS
            .iter()
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!("{joined}/index{ext}")),
    );
    out
}

/// What the project looks like after the change set is applied.
pub struct FileUniverse<'a> {
    ctx: &'a ValidatorContext,
    present: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl<'a> FileUniverse<'a> {
    pub fn new(ctx: &'a ValidatorContext) -> Self {
        let deleted: BTreeSet<String> = ctx
            .changes
            .iter()
            .filter(|c| c.is_delete())
            .map(|c| normalize_plan_path(&c.path))
            .collect();
        let mut present: BTreeSet<String> = ctx
            .existing_files
            .keys()
            .map(|p| normalize_plan_path(p))
            .collect();
        present.extend(ctx.live_changes().map(|c| normalize_plan_path(&c.path)));
        present.retain(|p| !deleted.contains(p));
        Self {
            ctx,
            present,
            deleted,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        if self.deleted.contains(path) {
            return false;
        }
        if self.present.contains(path) {
            return true;
        }
        let root = &self.ctx.project_path;
        !root.as_os_str().is_empty() && root.join(path).is_file()
    }

    /// First existing candidate for an import.
    pub fn resolve(&self, importer: &str, specifier: &str) -> Option<String> {
        candidates(importer, specifier)
            .into_iter()
            .find(|c| self.exists(c))
    }

    /// Deleted file an import pointed at, if any.
    pub fn resolves_to_deleted(&self, importer: &str, specifier: &str) -> Option<String> {
        candidates(importer, specifier)
            .into_iter()
            .find(|c| self.deleted.contains(c))
    }
}

pub struct ImportResolution;

impl Validator for ImportResolution {
    fn id(&self) -> &'static str {
        "import-resolution"
    }

    fn stage(&self) -> Stage {
        Stage::Integrity
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let universe = FileUniverse::new(ctx);
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            let importer = normalize_plan_path(&change.path);
            for import in relative_imports(&importer, &change.content) {
                if universe.resolve(&importer, &import.specifier).is_some() {
                    continue;
                }
                let issue = match universe.resolves_to_deleted(&importer, &import.specifier) {
                    Some(target) => ValidationIssue::error(
                        &change.path,
                        format!("Import '{}' points at {target}, which this change deletes", import.specifier),
                    )
                    .with_code("IMPORT_DELETED_TARGET"),
                    None => ValidationIssue::error(
                        &change.path,
                        format!("Cannot resolve import '{}'", import.specifier),
                    )
                    .with_code("IMPORT_UNRESOLVED")
                    .with_suggestion("Create the module or fix the import path"),
                };
                issues.push(issue.at_line(import.line));
            }
        }
        Ok(issues.into())
    }
}
