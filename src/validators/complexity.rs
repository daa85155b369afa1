use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

pub const MAX_NESTING_DEPTH: usize = 4;
pub const MAX_FUNCTION_LINES: usize = 80;

pub struct ComplexityValidator;

/// Deepest block nesting and the line where it was first reached.
fn max_depth(lang: Language, masked: &str) -> (usize, usize) {
    let mut best = (0, 0);
    if lang.uses_braces() {
        let mut depth = 0usize;
        for (idx, line) in masked.lines().enumerate() {
            for c in line.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        if depth > best.0 {
                            best = (depth, idx + 1);
                        }
                    }
                    '}' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }
    } else if lang == Language::Python {
        for (idx, line) in masked.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let width = line.len() - line.trim_start().len();
            let depth = width / 4;
            if depth > best.0 {
                best = (depth, idx + 1);
            }
        }
    }
    best
}

/// `(name, declaration line, body length in lines)` for brace languages.
fn function_spans(masked: &str) -> Vec<(String, usize, usize)> {
    let lines: Vec<&str> = masked.lines().collect();
    let mut spans = Vec::new();
    for (start, line) in lines.iter().enumerate() {
        let Some(name) = lang::declared_function(line) else {
            continue;
        };
        let mut depth = 0i64;
        let mut opened = false;
        for (offset, body) in lines[start..].iter().enumerate() {
            for c in body.chars() {
                match c {
                    '{' => {
                        depth += 1;
                        opened = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if opened && depth <= 0 {
                spans.push((name.clone(), start + 1, offset + 1));
                break;
            }
            if !opened && offset > 2 {
                break;
            }
        }
    }
    spans
}

impl Validator for ComplexityValidator {
    fn id(&self) -> &'static str {
        "complexity"
    }

    fn stage(&self) -> Stage {
        Stage::Quality
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let max_nesting = ctx
            .config_usize("max_nesting_depth")
            .unwrap_or(MAX_NESTING_DEPTH);
        let max_lines = ctx
            .config_usize("max_function_lines")
            .unwrap_or(MAX_FUNCTION_LINES);
        let mut issues = Vec::new();

        for change in ctx.live_changes() {
            let lang = Language::detect(&change.path);
            if !lang.uses_braces() && lang != Language::Python {
                continue;
            }
            let masked = lang::mask(&change.content, lang);
            let (depth, line) = max_depth(lang, &masked.text);
            if depth > max_nesting {
                issues.push(
                    ValidationIssue::warning(
                        &change.path,
                        format!("Nesting depth {depth} exceeds {max_nesting}"),
                    )
                    .at_line(line)
                    .with_code("COMPLEXITY_DEEP_NESTING")
                    .with_suggestion("Extract helpers or return early"),
                );
            }
            if lang.uses_braces() {
                for (name, line, length) in function_spans(&masked.text) {
                    if length > max_lines {
                        issues.push(
                            ValidationIssue::info(
                                &change.path,
                                format!("Function {name} is {length} lines long"),
                            )
                            .at_line(line)
                            .with_code("COMPLEXITY_LONG_FUNCTION"),
                        );
                    }
                }
            }
        }
        Ok(issues.into())
    }
}
