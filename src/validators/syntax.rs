//! Lightweight syntax checks: JSON parses, brackets balance outside strings
//! and comments, plus a few line-level smells.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

pub struct SyntaxValidator;

static CONDITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:if|while)\s*\((.*)\)").unwrap());
static EMPTY_FOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfor\s*\(").unwrap());

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Bracket balance over masked text. Stops at the first mismatch since the
/// rest of the file cannot be paired reliably.
pub fn check_brackets(path: &str, masked: &str) -> Vec<ValidationIssue> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    for c in masked.chars() {
        match c {
            '\n' => line += 1,
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closer_for(open) == c => {}
                Some((open, open_line)) => {
                    return vec![ValidationIssue::error(
                        path,
                        format!("Unmatched '{c}': expected '{}' to close '{open}' from line {open_line}", closer_for(open)),
                    )
                    .at_line(line)
                    .with_code("SYNTAX_UNMATCHED_BRACKET")];
                }
                None => {
                    return vec![ValidationIssue::error(path, format!("Unmatched '{c}'"))
                        .at_line(line)
                        .with_code("SYNTAX_UNMATCHED_BRACKET")];
                }
            },
            _ => {}
        }
    }
    stack
        .into_iter()
        .map(|(open, open_line)| {
            ValidationIssue::error(path, format!("Unclosed '{open}'"))
                .at_line(open_line)
                .with_code("SYNTAX_UNCLOSED_BRACKET")
                .with_suggestion(format!("Add the missing '{}'", closer_for(open)))
        })
        .collect()
}

/// A lone `=` inside an `if`/`while` test.
fn has_assignment(condition: &str) -> bool {
    let bytes = condition.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        if *b != b'=' {
            return false;
        }
        let prev = if i > 0 { bytes[i - 1] } else { b' ' };
        let next = bytes.get(i + 1).copied().unwrap_or(b' ');
        !b"=!<>+-*/%&|^".contains(&prev) && next != b'=' && next != b'>'
    })
}

fn check_lines(path: &str, lang: Language, masked: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let statement_language = matches!(lang, Language::Script | Language::CLike | Language::Rust);
    for (idx, line) in masked.lines().enumerate() {
        if !statement_language {
            continue;
        }
        if line.contains(";;") && !EMPTY_FOR.is_match(line) {
            issues.push(
                ValidationIssue::warning(path, "Double semicolon")
                    .at_line(idx + 1)
                    .with_code("SYNTAX_DOUBLE_SEMICOLON"),
            );
        }
        if lang != Language::Rust
            && let Some(cap) = CONDITION.captures(line)
            && has_assignment(&cap[1])
        {
            issues.push(
                ValidationIssue::warning(path, "Assignment inside a condition")
                    .at_line(idx + 1)
                    .with_code("SYNTAX_ASSIGNMENT_IN_CONDITION")
                    .with_suggestion("Use === / == for comparison"),
            );
        }
    }
    issues
}

impl Validator for SyntaxValidator {
    fn id(&self) -> &'static str {
        "syntax"
    }

    fn stage(&self) -> Stage {
        Stage::Quality
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            let lang = Language::detect(&change.path);
            if lang == Language::Json {
                if let Err(e) = serde_json::from_str::<serde_json::Value>(&change.content) {
                    issues.push(
                        ValidationIssue::error(&change.path, format!("Invalid JSON: {e}"))
                            .at_line(e.line().max(1))
                            .with_code("SYNTAX_INVALID_JSON"),
                    );
                }
                continue;
            }
            if !lang.is_bracketed() {
                continue;
            }
            let masked = lang::mask(&change.content, lang);
            for line in &masked.unclosed_strings {
                issues.push(
                    ValidationIssue::warning(&change.path, "Possibly unclosed string literal")
                        .at_line(*line)
                        .with_code("SYNTAX_UNCLOSED_STRING"),
                );
            }
            issues.extend(check_brackets(&change.path, &masked.text));
            issues.extend(check_lines(&change.path, lang, &masked.text));
        }
        Ok(issues.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange, Severity};

    fn run(path: &str, content: &str) -> Vec<ValidationIssue> {
        let ctx = ValidatorContext::new(vec![FileChange::new(path, ChangeOperation::Update, content)]);
        SyntaxValidator.validate(&ctx).unwrap().issues
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().filter_map(|i| i.code.as_deref()).collect()
    }

    #[test]
    fn unterminated_brace_is_an_error() {
        let issues = run("src/a.ts", "function f() {");
        assert_eq!(codes(&issues), vec!["SYNTAX_UNCLOSED_BRACKET"]);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].line, Some(1));
    }

    #[test]
    fn mismatched_closer() {
        let issues = run("src/a.ts", "const a = [1, 2);\n");
        assert_eq!(codes(&issues), vec!["SYNTAX_UNMATCHED_BRACKET"]);
    }

    #[test]
    fn brackets_in_strings_and_comments_are_ignored() {
        assert!(run("src/a.ts", "const s = \"{[(\"; // )]}\n/* { */\nconst t = `${a}}`;\n").is_empty());
        assert!(run("src/lib.rs", "fn f<'a>(s: &'a str) -> char {\n    '}'\n}\n").is_empty());
        assert!(run("app.py", "def f():\n    return '(' # )\n").is_empty());
    }

    #[test]
    fn invalid_json() {
        let issues = run("package.json", "{\n  \"name\": \"x\",\n}\n");
        assert_eq!(codes(&issues), vec!["SYNTAX_INVALID_JSON"]);
        assert!(run("package.json", "{\"name\": \"x\"}").is_empty());
    }

    #[test]
    fn blank_json_does_not_parse() {
        for content in ["", "  \n\t\n"] {
            let issues = run("tsconfig.json", content);
            assert_eq!(codes(&issues), vec!["SYNTAX_INVALID_JSON"]);
            assert_eq!(issues[0].severity, Severity::Error);
        }
    }

    #[test]
    fn line_smells() {
        let issues = run("src/a.js", "let a = 1;;\nif (a = 2) { go(); }\nif (a == 2 && b >= 3) {}\nfor (;;) {}\n");
        assert_eq!(
            codes(&issues),
            vec!["SYNTAX_DOUBLE_SEMICOLON", "SYNTAX_ASSIGNMENT_IN_CONDITION"]
        );
        assert_eq!(issues[1].line, Some(2));
    }

    #[test]
    fn unclosed_string_warning() {
        let issues = run("src/a.js", "const s = 'oops;\n");
        assert_eq!(codes(&issues), vec!["SYNTAX_UNCLOSED_STRING"]);
        assert_eq!(issues[0].severity, Severity::Warning);
    }
}
