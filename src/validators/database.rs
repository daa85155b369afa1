//! SQL safety for migration files and SQL embedded in string literals.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

static DESTRUCTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:DROP\s+(?:TABLE|DATABASE|SCHEMA)|TRUNCATE(?:\s+TABLE)?)\b").unwrap());
static DELETE_FROM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bDELETE\s+FROM\b").unwrap());
static UPDATE_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUPDATE\s+[\w.`\x22\[\]]+\s+SET\b").unwrap());
static WHERE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static DROP_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bALTER\s+TABLE\s+\S+\s+DROP\s+(?:COLUMN\s+)?\w+").unwrap());
static SELECT_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bSELECT\s+\*").unwrap());
static SQL_LEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:SELECT|INSERT|UPDATE|DELETE|DROP|TRUNCATE|ALTER|CREATE|WITH)\b").unwrap()
});
static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)`([^`]*)`|"((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'"#).unwrap()
});

/// One SQL statement: byte offset into the file and its text.
struct Statement<'a> {
    offset: usize,
    text: &'a str,
}

/// `--` comments blanked in place; strings and block comments were already
/// masked.
fn blank_line_comments(masked: &str) -> String {
    masked
        .split_inclusive('\n')
        .map(|line| match line.find("--") {
            Some(at) => {
                let tail = &line[at..];
                let newline = if tail.ends_with('\n') { "\n" } else { "" };
                format!("{}{}{newline}", &line[..at], " ".repeat(tail.len() - newline.len()))
            }
            None => line.to_string(),
        })
        .collect()
}

fn split_statements(text: &str) -> Vec<Statement<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if c == ';' {
            out.push(Statement {
                offset: start,
                text: &text[start..idx],
            });
            start = idx + 1;
        }
    }
    if start < text.len() {
        out.push(Statement {
            offset: start,
            text: &text[start..],
        });
    }
    out
}

/// Statements of a `.sql` file, or string literals of code that start with an
/// upper-case SQL keyword.
fn statements(path: &str, content: &str) -> Vec<(usize, String)> {
    if Language::detect(path) == Language::Sql {
        let sql_text = blank_line_comments(&lang::mask(content, Language::Sql).text);
        return split_statements(&sql_text)
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| (s.offset, s.text.to_string()))
            .collect();
    }
    STRING_LITERAL
        .captures_iter(content)
        .filter_map(|cap| {
            let body = cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3))?;
            SQL_LEADER.is_match(body.as_str()).then_some(body)
        })
        .flat_map(|body| {
            split_statements(body.as_str())
                .into_iter()
                .map(move |s| (body.start() + s.offset, s.text.to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn check_statement(path: &str, content: &str, offset: usize, text: &str, issues: &mut Vec<ValidationIssue>) {
    let line_of = |m: regex::Match<'_>| lang::line_number(content, offset + m.start());
    let bounded = WHERE.is_match(text);

    if let Some(m) = DESTRUCTIVE.find(text) {
        issues.push(
            ValidationIssue::error(path, format!("Destructive DDL: {}", m.as_str().to_uppercase()))
                .at_line(line_of(m))
                .with_code("DB_DESTRUCTIVE_DDL")
                .with_suggestion("Use a reversible migration or archive the data first"),
        );
    }
    for re in [&*DELETE_FROM, &*UPDATE_SET] {
        if let Some(m) = re.find(text)
            && !bounded
        {
            issues.push(
                ValidationIssue::error(path, "Write statement without a WHERE clause")
                    .at_line(line_of(m))
                    .with_code("DB_UNBOUNDED_WRITE")
                    .with_suggestion("Add a WHERE clause that limits the affected rows"),
            );
        }
    }
    if let Some(m) = DROP_COLUMN.find(text) {
        issues.push(
            ValidationIssue::warning(path, "Column drop loses data")
                .at_line(line_of(m))
                .with_code("DB_DROP_COLUMN"),
        );
    }
    if let Some(m) = SELECT_STAR.find(text) {
        issues.push(
            ValidationIssue::info(path, "SELECT * couples code to the table layout")
                .at_line(line_of(m))
                .with_code("DB_SELECT_STAR")
                .with_suggestion("List the needed columns"),
        );
    }
}

pub struct DatabaseSafety;

impl Validator for DatabaseSafety {
    fn id(&self) -> &'static str {
        "database-safety"
    }

    fn stage(&self) -> Stage {
        Stage::Specialist
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            if !lang::is_code_file(&change.path) {
                continue;
            }
            for (offset, text) in statements(&change.path, &change.content) {
                check_statement(&change.path, &change.content, offset, &text, &mut issues);
            }
        }
        Ok(issues.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};

    fn codes(path: &str, content: &str) -> Vec<(String, Option<usize>)> {
        let ctx = ValidatorContext::new(vec![FileChange::new(path, ChangeOperation::Create, content)]);
        DatabaseSafety
            .validate(&ctx)
            .unwrap()
            .issues
            .into_iter()
            .map(|i| (i.code.unwrap_or_default(), i.line))
            .collect()
    }

    #[test]
    fn migration_file_rules() {
        let sql = "-- DROP TABLE in a comment is fine\nDROP TABLE users;\nDELETE FROM sessions;\nDELETE FROM tokens WHERE expired = 1;\nUPDATE accounts SET active = 0;\nALTER TABLE orders DROP COLUMN note;\nSELECT * FROM orders WHERE id = 1;\n";
        assert_eq!(
            codes("db/migrations/002.sql", sql),
            vec![
                ("DB_DESTRUCTIVE_DDL".to_string(), Some(2)),
                ("DB_UNBOUNDED_WRITE".to_string(), Some(3)),
                ("DB_UNBOUNDED_WRITE".to_string(), Some(5)),
                ("DB_DROP_COLUMN".to_string(), Some(6)),
                ("DB_SELECT_STAR".to_string(), Some(7)),
            ]
        );
    }

    #[test]
    fn embedded_sql_in_code() {
        let src = "const purge = \"DELETE FROM audit\";\nconst ok = 'UPDATE users SET name = ? WHERE id = ?';\nconst text = 'delete from the list';\n";
        assert_eq!(
            codes("src/repo.ts", src),
            vec![("DB_UNBOUNDED_WRITE".to_string(), Some(1))]
        );
    }
}
