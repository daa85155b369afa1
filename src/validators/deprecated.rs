//! Known-deprecated platform and framework APIs.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::change::{ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::lang::{self, Language};
use crate::validators::{Stage, Validator, ValidatorOutput};

struct DeprecatedApi {
    language: Language,
    api: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

fn api(language: Language, api: &'static str, pattern: &str, replacement: &'static str) -> DeprecatedApi {
    DeprecatedApi {
        language,
        api,
        pattern: Regex::new(pattern).unwrap(),
        replacement,
    }
}

static DEPRECATED: LazyLock<Vec<DeprecatedApi>> = LazyLock::new(|| {
    vec![
        api(Language::Script, "new Buffer()", r"\bnew\s+Buffer\s*\(", "Buffer.from() or Buffer.alloc()"),
        api(
            Language::Script,
            "componentWillMount",
            r"\bcomponentWill(?:Mount|ReceiveProps|Update)\b",
            "componentDidMount, getDerivedStateFromProps or hooks",
        ),
        api(Language::Script, "String.prototype.substr", r"\.substr\s*\(", ".slice() or .substring()"),
        api(Language::Script, "escape()/unescape()", r"(?:^|[^.\w$])(?:un)?escape\s*\(", "encodeURIComponent / decodeURIComponent"),
        api(Language::Script, "document.write", r"\bdocument\.write(?:ln)?\s*\(", "DOM APIs such as appendChild"),
        api(Language::Script, "ReactDOM.render", r"\bReactDOM\.render\s*\(", "createRoot(container).render()"),
        api(Language::Script, "findDOMNode", r"\bfindDOMNode\s*\(", "refs"),
        api(Language::Script, "url.parse", r"\burl\.parse\s*\(", "new URL()"),
        api(Language::Script, "fs.exists", r"\bfs\.exists\s*\(", "fs.access or fs.existsSync"),
        api(Language::Python, "datetime.utcnow", r"\bdatetime\.utcnow\s*\(", "datetime.now(timezone.utc)"),
        api(Language::Python, "asyncio.get_event_loop", r"\basyncio\.get_event_loop\s*\(", "asyncio.run or get_running_loop"),
        api(Language::Rust, "std::mem::uninitialized", r"\bmem::uninitialized\b", "MaybeUninit"),
    ]
});

pub struct DeprecatedApiValidator;

impl Validator for DeprecatedApiValidator {
    fn id(&self) -> &'static str {
        "deprecated-api"
    }

    fn stage(&self) -> Stage {
        Stage::Accuracy
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        let mut issues = Vec::new();
        for change in ctx.live_changes() {
            let language = Language::detect(&change.path);
            let rules: Vec<&DeprecatedApi> = DEPRECATED.iter().filter(|d| d.language == language).collect();
            if rules.is_empty() {
                continue;
            }
            let masked = lang::mask(&change.content, language);
            for (idx, line) in masked.lines().enumerate() {
                for rule in &rules {
                    if rule.pattern.is_match(line) {
                        issues.push(
                            ValidationIssue::warning(&change.path, format!("Deprecated API: {}", rule.api))
                                .at_line(idx + 1)
                                .with_code("ACCURACY_DEPRECATED_API")
                                .with_suggestion(format!("Use {}", rule.replacement)),
                        );
                    }
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

    fn apis(path: &str, content: &str) -> Vec<String> {
        let ctx = ValidatorContext::new(vec![FileChange::new(path, ChangeOperation::Create, content)]);
        DeprecatedApiValidator
            .validate(&ctx)
            .unwrap()
            .issues
            .into_iter()
            .map(|i| i.message)
            .collect()
    }

    #[test]
    fn flags_known_script_apis() {
        let src = "const b = new Buffer(10);\nconst s = name.substr(1);\nconst e = escape(q);\nconst h = _.escape(q);\ndocument.write('x');\n// new Buffer(1) in a comment\n";
        assert_eq!(
            apis("src/legacy.js", src),
            vec![
                "Deprecated API: new Buffer()",
                "Deprecated API: String.prototype.substr",
                "Deprecated API: escape()/unescape()",
                "Deprecated API: document.write",
            ]
        );
    }

    #[test]
    fn rules_are_language_specific() {
        assert_eq!(apis("job.py", "now = datetime.utcnow()\n").len(), 1);
        assert!(apis("job.rb", "x.substr(1)\n").is_empty());
    }
}
