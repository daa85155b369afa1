//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps verdict output bounded and readable while preserving signal.

use colored::Colorize;

use crate::core::change::{Severity, ValidationIssue, ValidationPipelineResult};
use crate::core::checkpoint::RollbackCheckpoint;
use crate::core::plan::Plan;

const MESSAGE_CHARS: usize = 160;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

fn location(issue: &ValidationIssue) -> String {
    match (issue.file.is_empty(), issue.line) {
        (true, _) => "-".to_string(),
        (false, Some(line)) => format!("{}:{}", issue.file, line),
        (false, None) => issue.file.clone(),
    }
}

/// One issue as a single uncolored line.
pub fn issue_line(issue: &ValidationIssue) -> String {
    let code = issue.code.as_deref().unwrap_or("-");
    let mut line = format!(
        "{} [{}] {} {}",
        issue.severity,
        code,
        location(issue),
        compact_line(&issue.message, MESSAGE_CHARS)
    );
    if let Some(suggestion) = &issue.suggestion {
        line.push_str(&format!(" (hint: {})", compact_line(suggestion, MESSAGE_CHARS)));
    }
    line
}

fn painted(issue: &ValidationIssue) -> String {
    let line = issue_line(issue);
    match issue.severity {
        Severity::Error => line.bright_red().to_string(),
        Severity::Warning => line.yellow().to_string(),
        Severity::Info => line.dimmed().to_string(),
    }
}

/// Human-readable verdict: header, must-fix list, then suggestions.
pub fn render_report(result: &ValidationPipelineResult) -> String {
    let mut out = String::new();
    let verdict = if result.passed {
        "PASS".bright_green().bold()
    } else {
        "FAIL".bright_red().bold()
    };
    out.push_str(&format!(
        "{} mode={} validators={} errors={} warnings={} infos={} duration_ms={}\n",
        verdict,
        result.mode,
        result.results.len(),
        result.errors,
        result.warnings,
        result.infos,
        result.duration_ms
    ));
    if result.halted_early {
        out.push_str(&format!("{}\n", "halted early on a security error".bright_red()));
    }

    let must_fix = result.must_fix();
    if !must_fix.is_empty() {
        out.push_str(&format!("\n{}\n", "Must fix:".bold()));
        for issue in must_fix {
            out.push_str(&format!("  {}\n", painted(issue)));
        }
    }
    let suggestions = result.suggestions();
    if !suggestions.is_empty() {
        out.push_str(&format!("\n{}\n", "Suggestions:".bold()));
        for issue in suggestions {
            out.push_str(&format!("  {}\n", painted(issue)));
        }
    }
    if let Some(cp) = &result.checkpoint {
        out.push_str(&format!("\ncheckpoint: {} ({} file(s))\n", cp.id.bright_cyan(), cp.files.len()));
    }
    out
}

pub fn render_plan(plan: &Plan) -> String {
    let mut out = format!(
        "{} {} [{}] complexity={}\n",
        plan.id.bright_cyan(),
        plan.title.bold(),
        plan.status,
        plan.complexity.as_str()
    );
    for phase in &plan.phases {
        let marker = if phase.index == plan.current_phase_index { ">" } else { " " };
        out.push_str(&format!(
            "{} {}. {} ({:?}) files: {}\n",
            marker,
            phase.index + 1,
            phase.title,
            phase.status,
            preview_messages(&phase.affected_files.iter().cloned().collect::<Vec<_>>(), 4, 60)
        ));
        if let Some(error) = &phase.error {
            out.push_str(&format!("    error: {}\n", compact_line(error, MESSAGE_CHARS).bright_red()));
        }
    }
    out
}

pub fn render_checkpoint(cp: &RollbackCheckpoint) -> String {
    format!(
        "{} {} {:?} files: {}",
        cp.id.bright_cyan(),
        cp.timestamp,
        cp.kind,
        preview_messages(&cp.paths(), 3, 60)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::ValidationResult;

    #[test]
    fn compact_line_bounds_and_collapses() {
        assert_eq!(compact_line("a\n  b\tc", 10), "a b c");
        assert_eq!(compact_line("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn preview_counts_hidden_items() {
        let items = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&items, 2, 10), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 10), "");
    }

    #[test]
    fn report_separates_must_fix_from_suggestions() {
        colored::control::set_override(false);
        let result = ValidationPipelineResult::aggregate(
            "strict",
            vec![ValidationResult::from_issues(
                "syntax",
                vec![
                    ValidationIssue::error("src/a.ts", "Unclosed '{'")
                        .at_line(1)
                        .with_code("SYNTAX_UNCLOSED_BRACKET"),
                    ValidationIssue::info("src/a.ts", "Long function"),
                ],
                2,
            )],
            2,
            false,
        );
        let report = render_report(&result);
        let must_fix = report.find("Must fix:").unwrap();
        let suggestions = report.find("Suggestions:").unwrap();
        assert!(report.starts_with("FAIL mode=strict"));
        assert!(must_fix < suggestions);
        assert!(report.contains("error [SYNTAX_UNCLOSED_BRACKET] src/a.ts:1 Unclosed '{'"));
        assert!(report.contains("info [-] src/a.ts Long function"));
    }
}
