//! Style consistency: a changed file should keep the indentation, quote and
//! semicolon conventions of what it replaces (or of its sibling files when it
//! is new).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::change::{ChangeOperation, ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorArtifact, ValidatorOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "width")]
pub enum Indent {
    Tabs,
    Spaces(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quotes {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semicolons {
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleFingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indent: Option<Indent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quotes: Option<Quotes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semicolons: Option<Semicolons>,
}

static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'[^'\n]*'").unwrap());
static DOUBLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"\n]*""#).unwrap());

/// Minimum evidence before a convention counts as established.
const MIN_SAMPLES: usize = 3;

fn dominant<T>(a: (usize, T), b: (usize, T)) -> Option<T> {
    let total = a.0 + b.0;
    if total < MIN_SAMPLES {
        return None;
    }
    if a.0 * 4 >= total * 3 {
        Some(a.1)
    } else if b.0 * 4 >= total * 3 {
        Some(b.1)
    } else {
        None
    }
}

pub fn fingerprint(path: &str, content: &str) -> StyleFingerprint {
    let lang = Language::detect(path);
    let mut tabs = 0;
    let mut spaced = 0;
    let mut widths: BTreeMap<usize, usize> = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        if line.starts_with('\t') {
            tabs += 1;
        } else if line.starts_with(' ') {
            spaced += 1;
            let width = line.len() - line.trim_start_matches(' ').len();
            for unit in [2, 4] {
                if width % unit == 0 {
                    *widths.entry(unit).or_default() += 1;
                }
            }
        }
    }
    let unit = if widths.get(&4).copied().unwrap_or(0) == spaced && spaced > 0 {
        4
    } else {
        2
    };
    let indent = dominant((tabs, Indent::Tabs), (spaced, Indent::Spaces(unit)));

    let (quotes, semicolons) = if lang == Language::Script {
        let masked = lang::mask(content, lang);
        let single = SINGLE_QUOTED.find_iter(&masked.text).count();
        let double = DOUBLE_QUOTED.find_iter(&masked.text).count();
        let quotes = dominant((single, Quotes::Single), (double, Quotes::Double));

        let mut with = 0;
        let mut without = 0;
        for line in masked.lines() {
            let t = line.trim_end();
            if t.is_empty() || t.ends_with('{') || t.ends_with('}') || t.ends_with(',') || t.ends_with('(') {
                continue;
            }
            if t.ends_with(';') {
                with += 1;
            } else if t.ends_with(')') || t.ends_with('\'') || t.ends_with('"') || t.chars().last().is_some_and(|c| c.is_alphanumeric()) {
                without += 1;
            }
        }
        (
            quotes,
            dominant((with, Semicolons::Always), (without, Semicolons::Never)),
        )
    } else {
        (None, None)
    };

    StyleFingerprint {
        indent,
        quotes,
        semicolons,
    }
}

fn reference_for(ctx: &ValidatorContext, path: &str, operation: ChangeOperation) -> Option<StyleFingerprint> {
    if operation == ChangeOperation::Update
        && let Some(old) = ctx.existing(path)
    {
        return Some(fingerprint(path, old));
    }
    let ext = lang::extension(path);
    let sibling = ctx
        .existing_files
        .iter()
        .find(|(p, _)| p.as_str() != path && lang::extension(p) == ext)?;
    Some(fingerprint(sibling.0, sibling.1))
}

pub struct StyleConsistency;

impl Validator for StyleConsistency {
    fn id(&self) -> &'static str {
        "style-consistency"
    }

    fn stage(&self) -> Stage {
        Stage::Quality
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        let mut references = BTreeMap::new();
        for change in ctx.live_changes() {
            if !lang::is_code_file(&change.path) {
                continue;
            }
            let Some(reference) = reference_for(ctx, &change.path, change.operation) else {
                continue;
            };
            let proposed = fingerprint(&change.path, &change.content);

            if let (Some(want), Some(got)) = (reference.indent, proposed.indent)
                && want != got
            {
                issues.push(
                    ValidationIssue::warning(
                        &change.path,
                        format!("Indentation {got:?} differs from the file's {want:?}"),
                    )
                    .with_code("STYLE_INDENT_MISMATCH"),
                );
            }
            if let (Some(want), Some(got)) = (reference.quotes, proposed.quotes)
                && want != got
            {
                issues.push(
                    ValidationIssue::info(&change.path, format!("Uses {got:?} quotes, file uses {want:?}"))
                        .with_code("STYLE_QUOTE_MISMATCH"),
                );
            }
            if let (Some(want), Some(got)) = (reference.semicolons, proposed.semicolons)
                && want != got
            {
                issues.push(
                    ValidationIssue::info(
                        &change.path,
                        format!("Semicolon usage {got:?} differs from the file's {want:?}"),
                    )
                    .with_code("STYLE_SEMICOLON_MISMATCH"),
                );
            }
            references.insert(change.path.clone(), reference);
        }
        Ok(ValidatorOutput::with_artifact(
            issues,
            ValidatorArtifact::StyleFingerprint { files: references },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::FileChange;

    const TWO_SPACE_SINGLE: &str =
        "function a() {\n  const x = 'a';\n  const y = 'b';\n  return x + y;\n}\nconst z = 'c';\n";
    const TABS_DOUBLE: &str =
        "function a() {\n\tconst x = \"a\"\n\tconst y = \"b\"\n\treturn x + y\n}\nconst z = \"c\"\n";

    #[test]
    fn fingerprints_script_conventions() {
        let fp = fingerprint("a.ts", TWO_SPACE_SINGLE);
        assert_eq!(fp.indent, Some(Indent::Spaces(2)));
        assert_eq!(fp.quotes, Some(Quotes::Single));
        assert_eq!(fp.semicolons, Some(Semicolons::Always));

        let fp = fingerprint("a.ts", TABS_DOUBLE);
        assert_eq!(fp.indent, Some(Indent::Tabs));
        assert_eq!(fp.quotes, Some(Quotes::Double));
        assert_eq!(fp.semicolons, Some(Semicolons::Never));
    }

    #[test]
    fn deviation_from_existing_file_is_reported() {
        let ctx = ValidatorContext::new(vec![FileChange::new("src/a.ts", ChangeOperation::Update, TABS_DOUBLE)])
            .with_existing("src/a.ts", TWO_SPACE_SINGLE);
        let out = StyleConsistency.validate(&ctx).unwrap();
        let codes: Vec<_> = out.issues.iter().filter_map(|i| i.code.as_deref()).collect();
        assert_eq!(
            codes,
            vec!["STYLE_INDENT_MISMATCH", "STYLE_QUOTE_MISMATCH", "STYLE_SEMICOLON_MISMATCH"]
        );
    }

    #[test]
    fn matching_style_is_quiet() {
        let ctx = ValidatorContext::new(vec![FileChange::new("src/a.ts", ChangeOperation::Update, TWO_SPACE_SINGLE)])
            .with_existing("src/a.ts", TWO_SPACE_SINGLE);
        assert!(StyleConsistency.validate(&ctx).unwrap().issues.is_empty());
    }
}
