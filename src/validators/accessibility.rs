//! Markup accessibility checks for JSX and HTML-like templates.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

static ALT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)alt(?:\s*=|\s|$)").unwrap());
static ON_CLICK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(?:^|\s)onclick\s*=").unwrap());
static ROLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)role\s*=").unwrap());
static INLINE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:^|\s)style\s*=\s*(?:\{\s*\{|")"#).unwrap());

/// An opening tag: element name, raw attribute text and its byte offset.
#[derive(Debug, PartialEq)]
pub struct Tag<'a> {
    pub name: &'a str,
    pub attrs: &'a str,
    pub offset: usize,
}

/// Opening tags of `content`. Attribute values may hold `>` inside quotes or
/// `{}` expressions.
pub fn opening_tags(content: &str) -> Vec<Tag<'_>> {
    let bytes = content.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'<' || !bytes.get(i + 1).is_some_and(|b| b.is_ascii_alphabetic()) {
            i += 1;
            continue;
        }
        let name_start = i + 1;
        let mut j = name_start;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || matches!(bytes[j], b'-' | b'.' | b':')) {
            j += 1;
        }
        let name_end = j;
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        let mut end = None;
        while j < bytes.len() {
            let b = bytes[j];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'"' | b'\'' | b'`' => quote = Some(b),
                    b'{' => depth += 1,
                    b'}' => depth = depth.saturating_sub(1),
                    b'>' if depth == 0 => {
                        end = Some(j);
                        break;
                    }
                    b'<' if depth == 0 => break,
                    _ => {}
                },
            }
            j += 1;
        }
        let Some(end) = end else {
            i = name_end;
            continue;
        };
        let attrs = content[name_end..end].trim_end_matches('/');
        tags.push(Tag {
            name: &content[name_start..name_end],
            attrs,
            offset: i,
        });
        i = end + 1;
    }
    tags
}

fn is_markup_file(path: &str) -> bool {
    Language::detect(path) == Language::Markup || lang::is_jsx(path) || lang::extension(path) == "js"
}

pub struct FrontendAccessibility;

impl Validator for FrontendAccessibility {
    fn id(&self) -> &'static str {
        "frontend-accessibility"
    }

    fn stage(&self) -> Stage {
        Stage::Specialist
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes().filter(|c| is_markup_file(&c.path)) {
            let content = change.content.as_str();
            for tag in opening_tags(content) {
                let line = lang::line_number(content, tag.offset);
                let spreads = tag.attrs.contains("{...");
                if tag.name.eq_ignore_ascii_case("img") && !ALT.is_match(tag.attrs) && !spreads {
                    issues.push(
                        ValidationIssue::warning(&change.path, "<img> without alt text")
                            .at_line(line)
                            .with_code("A11Y_IMG_ALT")
                            .with_suggestion("Add alt=\"\" for decorative images or a description"),
                    );
                }
                if matches!(tag.name, "div" | "span")
                    && ON_CLICK.is_match(tag.attrs)
                    && !ROLE.is_match(tag.attrs)
                {
                    issues.push(
                        ValidationIssue::warning(
                            &change.path,
                            format!("Clickable <{}> is not reachable by keyboard", tag.name),
                        )
                        .at_line(line)
                        .with_code("A11Y_CLICKABLE_NON_INTERACTIVE")
                        .with_suggestion("Use a <button>, or add role and keyboard handlers"),
                    );
                }
                if INLINE_STYLE.is_match(tag.attrs) {
                    issues.push(
                        ValidationIssue::info(&change.path, "Inline style")
                            .at_line(line)
                            .with_code("FRONTEND_INLINE_STYLE"),
                    );
                }
            }
        }
        Ok(issues.into())
    }
}
