use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

pub const NESTED_LOOP_LIMIT: usize = 3;

static SYNC_IO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(readFileSync|writeFileSync|appendFileSync|existsSync|readdirSync|statSync|mkdirSync|rmSync|execSync|spawnSync)\s*\(").unwrap()
});
static LOOP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:for|while|loop|do)\b").unwrap());
static FOR_AWAIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfor\s+await\b").unwrap());
static DEEP_CLONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"JSON\.parse\s*\(\s*JSON\.stringify\s*\(").unwrap());

#[derive(Debug, PartialEq)]
enum Finding {
    AwaitInLoop(usize),
    NestedLoops(usize),
}

fn is_word_at(text: &str, idx: usize, word: &str) -> bool {
    let ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';
    let bytes = text.as_bytes();
    text[idx..].starts_with(word)
        && (idx == 0 || !ident(bytes[idx - 1]))
        && bytes.get(idx + word.len()).is_none_or(|b| !ident(*b))
}

/// Walks `{}` blocks of masked source, classifying each block by the header
/// text before its opening brace.
fn loop_findings(masked: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut blocks: Vec<bool> = Vec::new();
    let mut header_start = 0usize;
    let mut parens = 0usize;
    let mut line = 1usize;
    let mut awaited_line = 0usize;

    for (idx, c) in masked.char_indices() {
        match c {
            '\n' => line += 1,
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            ';' if parens == 0 => header_start = idx + 1,
            '{' => {
                let header = &masked[header_start..idx];
                let is_loop = LOOP_HEADER.is_match(header) && !FOR_AWAIT.is_match(header);
                blocks.push(is_loop);
                if is_loop && blocks.iter().filter(|b| **b).count() == NESTED_LOOP_LIMIT {
                    findings.push(Finding::NestedLoops(line));
                }
                header_start = idx + 1;
            }
            '}' => {
                blocks.pop();
                header_start = idx + 1;
            }
            'a' if line != awaited_line
                && blocks.iter().any(|b| *b)
                && is_word_at(masked, idx, "await") =>
            {
                findings.push(Finding::AwaitInLoop(line));
                awaited_line = line;
            }
            _ => {}
        }
    }
    findings
}

pub struct PerformanceValidator;

impl Validator for PerformanceValidator {
    fn id(&self) -> &'static str {
        "performance"
    }

    fn stage(&self) -> Stage {
        Stage::Specialist
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            let language = Language::detect(&change.path);
            if !language.uses_braces() {
                continue;
            }
            let masked = lang::mask(&change.content, language);
            let script = language == Language::Script;

            if script && !lang::is_test_path(&change.path) {
                for (idx, line) in masked.lines().enumerate() {
                    if let Some(cap) = SYNC_IO.captures(line) {
                        issues.push(
                            ValidationIssue::warning(&change.path, format!("Blocking call {}()", &cap[1]))
                                .at_line(idx + 1)
                                .with_code("PERF_SYNC_IO")
                                .with_suggestion("Use the promise-based API"),
                        );
                    }
                }
            }
            for finding in loop_findings(&masked.text) {
                match finding {
                    Finding::AwaitInLoop(line) if script => issues.push(
                        ValidationIssue::info(&change.path, "`await` inside a loop runs sequentially")
                            .at_line(line)
                            .with_code("PERF_AWAIT_IN_LOOP")
                            .with_suggestion("Collect the promises and use Promise.all"),
                    ),
                    Finding::AwaitInLoop(_) => {}
                    Finding::NestedLoops(line) => issues.push(
                        ValidationIssue::warning(
                            &change.path,
                            format!("Loops nested {NESTED_LOOP_LIMIT} deep"),
                        )
                        .at_line(line)
                        .with_code("PERF_NESTED_LOOPS")
                        .with_suggestion("Index the inner data or restructure the iteration"),
                    ),
                }
            }
            if script {
                for (idx, line) in masked.lines().enumerate() {
                    if DEEP_CLONE.is_match(line) {
                        issues.push(
                            ValidationIssue::info(&change.path, "JSON round-trip used as deep clone")
                                .at_line(idx + 1)
                                .with_code("PERF_DEEP_CLONE")
                                .with_suggestion("Use structuredClone"),
                        );
                    }
                }
            }
        }
        Ok(issues.into())
    }
}
