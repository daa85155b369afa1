//! HTTP route handler hygiene for Express-style routers.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

static ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:app|router|server|api|route)\.(get|post|put|patch|delete|all)\s*\(\s*['"`]([^'"`]+)['"`]"#).unwrap()
});
static ERROR_HANDLING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\btry\b|\.catch\s*\(|\bnext\s*\(|\basyncHandler\b|\bcatchAsync\b").unwrap());
static CATCH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bcatch\b").unwrap());
static BARE_RESPONSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bres\.(?:json|send)\s*\(").unwrap());
static STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.status\s*\(|\bsendStatus\s*\(").unwrap());

#[derive(Debug, PartialEq)]
pub struct RouteHandler {
    pub method: String,
    pub path: String,
    pub line: usize,
    /// Handler arguments as written, from the opening `(` to its match.
    pub body: String,
}

/// Offset of the parenthesis closing the one at `open`, on masked text.
fn closing_paren(masked: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, c) in masked[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn route_handlers(path: &str, content: &str) -> Vec<RouteHandler> {
    if Language::detect(path) != Language::Script {
        return Vec::new();
    }
    let masked = lang::mask(content, Language::Script);
    ROUTE
        .captures_iter(content)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            // Routes inside comments are blanked in the masked text.
            if masked.text.get(whole.start()..whole.start() + 1) == Some(" ") {
                return None;
            }
            let open = whole.start() + content[whole.start()..].find('(')?;
            let close = closing_paren(&masked.text, open).unwrap_or(content.len());
            Some(RouteHandler {
                method: cap[1].to_ascii_uppercase(),
                path: cap[2].to_string(),
                line: lang::line_number(content, whole.start()),
                body: masked.text[open..close].to_string(),
            })
        })
        .collect()
}

pub struct ApiContract;

impl Validator for ApiContract {
    fn id(&self) -> &'static str {
        "api-contract"
    }

    fn stage(&self) -> Stage {
        Stage::Specialist
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        let mut seen: BTreeMap<(String, String), String> = BTreeMap::new();
        for change in ctx.live_changes() {
            for route in route_handlers(&change.path, &change.content) {
                let label = format!("{} {}", route.method, route.path);
                if !ERROR_HANDLING.is_match(&route.body) {
                    issues.push(
                        ValidationIssue::warning(&change.path, format!("Handler for {label} has no error handling"))
                            .at_line(route.line)
                            .with_code("API_UNHANDLED_ERRORS")
                            .with_suggestion("Wrap the body in try/catch or forward errors with next(err)"),
                    );
                }
                if let Some(m) = CATCH.find(&route.body) {
                    let error_path = &route.body[m.start()..];
                    if BARE_RESPONSE.is_match(error_path) && !STATUS.is_match(error_path) {
                        issues.push(
                            ValidationIssue::info(
                                &change.path,
                                format!("Error response of {label} has no explicit status"),
                            )
                            .at_line(route.line)
                            .with_code("API_MISSING_STATUS")
                            .with_suggestion("Call res.status(...) before sending the error"),
                        );
                    }
                }
                let key = (route.method.clone(), route.path.clone());
                if let Some(first) = seen.get(&key) {
                    issues.push(
                        ValidationIssue::warning(
                            &change.path,
                            format!("Route {label} is already defined in {first}"),
                        )
                        .at_line(route.line)
                        .with_code("API_DUPLICATE_ROUTE"),
                    );
                } else {
                    seen.insert(key, change.path.clone());
                }
            }
        }
        Ok(issues.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::change::{ChangeOperation, FileChange};

    const ROUTES: &str = r#"router.get('/users', async (req, res) => {
  const users = await db.all();
  res.json(users);
});

router.post('/users', async (req, res) => {
  try {
    res.status(201).json(await db.insert(req.body));
  } catch (err) {
    res.json({ error: err.message });
  }
});

// router.get('/users', legacy);
router.get('/users', (req, res, next) => next());
"#;

    #[test]
    fn extracts_routes_outside_comments() {
        let routes = route_handlers("src/routes.ts", ROUTES);
        let found: Vec<_> = routes.iter().map(|r| (r.method.as_str(), r.path.as_str(), r.line)).collect();
        assert_eq!(
            found,
            vec![("GET", "/users", 1), ("POST", "/users", 6), ("GET", "/users", 15)]
        );
    }

    #[test]
    fn reports_missing_handling_status_and_duplicates() {
        let ctx = ValidatorContext::new(vec![FileChange::new("src/routes.ts", ChangeOperation::Create, ROUTES)]);
        let issues = ApiContract.validate(&ctx).unwrap().issues;
        let found: Vec<_> = issues
            .iter()
            .map(|i| (i.code.as_deref().unwrap_or(""), i.line.unwrap_or(0)))
            .collect();
        assert_eq!(
            found,
            vec![
                ("API_UNHANDLED_ERRORS", 1),
                ("API_MISSING_STATUS", 6),
                ("API_DUPLICATE_ROUTE", 15),
            ]
        );
    }
}
