//! Security scanner.
//!
//! Pattern table in the style of a secret scanner: each rule belongs to a
//! category whose tier decides the severity (critical/high ⇒ error,
//! medium ⇒ warning, low ⇒ info). Every code starts with `SEC_`, which is what
//! the pipeline's early exit keys on.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::core::change::{Severity, ValidationIssue, ValidatorContext};
use crate::core::error::GateError;
use crate::validators::{Stage, Validator, ValidatorOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Low,
    Medium,
    High,
    Critical,
}

impl Tier {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Critical | Self::High => Severity::Error,
            Self::Medium => Severity::Warning,
            Self::Low => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    HardcodedSecret,
    SqlInjection,
    Xss,
    PathTraversal,
    WeakRandom,
    CodeExecution,
    SensitiveLog,
}

impl Category {
    pub fn tier(&self) -> Tier {
        match self {
            Self::HardcodedSecret | Self::CodeExecution => Tier::Critical,
            Self::SqlInjection | Self::Xss | Self::PathTraversal => Tier::High,
            Self::WeakRandom => Tier::Medium,
            Self::SensitiveLog => Tier::Low,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::HardcodedSecret => "SEC_HARDCODED_SECRET",
            Self::SqlInjection => "SEC_SQL_INJECTION",
            Self::Xss => "SEC_XSS",
            Self::PathTraversal => "SEC_PATH_TRAVERSAL",
            Self::WeakRandom => "SEC_WEAK_RANDOM",
            Self::CodeExecution => "SEC_CODE_EXECUTION",
            Self::SensitiveLog => "SEC_SENSITIVE_LOG",
        }
    }

    fn suggestion(&self) -> &'static str {
        match self {
            Self::HardcodedSecret => "Load the value from the environment or a secret store",
            Self::SqlInjection => "Use parameterized queries",
            Self::Xss => "Render text with textContent or a sanitizer",
            Self::PathTraversal => "Normalize the path and check it stays inside the base directory",
            Self::WeakRandom => "Use a cryptographically secure random source",
            Self::CodeExecution => "Avoid evaluating strings as code",
            Self::SensitiveLog => "Do not log credentials",
        }
    }
}

struct Rule {
    category: Category,
    pattern: Regex,
    message: &'static str,
    /// Rules that only make sense on live code skip comment lines.
    skip_comments: bool,
    /// Credential assignments that read from the environment are not
    /// literals. Provider-shaped keys match regardless.
    env_exempt: bool,
}

impl Rule {
    fn env_exempt(mut self) -> Self {
        self.env_exempt = true;
        self
    }
}

fn rule(category: Category, pattern: &str, message: &'static str, skip_comments: bool) -> Rule {
    Rule {
        category,
        pattern: Regex::new(pattern).unwrap(),
        message,
        skip_comments,
        env_exempt: false,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use Category::*;
    vec![
        // Provider keys
        rule(HardcodedSecret, r"\b(?:sk|pk|rk)[-_](?:live|test)[-_][A-Za-z0-9]{16,}", "Hardcoded API key", false),
        rule(HardcodedSecret, r"\bsk-[A-Za-z0-9_\-]{20,}", "Hardcoded API key", false),
        rule(HardcodedSecret, r"\b(?:A3T[A-Z0-9]|AKIA|AGPA|AIDA|AROA|AIPA|ANPA|ANVA|ASIA)[0-9A-Z]{16}\b", "Hardcoded AWS access key", false),
        rule(HardcodedSecret, r"\b(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9_]{36,255}", "Hardcoded GitHub token", false),
        rule(HardcodedSecret, r"\bxox[baprs]-[A-Za-z0-9\-]{10,}", "Hardcoded Slack token", false),
        rule(HardcodedSecret, r"\bAIza[0-9A-Za-z_\-]{35}", "Hardcoded Google API key", false),
        rule(HardcodedSecret, r"-----BEGIN (?:RSA |DSA |EC |OPENSSH )?PRIVATE KEY-----", "Private key material", false),
        // Long hex/base64 literal bound to a secret-sounding name
        rule(HardcodedSecret, r#"(?i)(?:secret|token|key|passw(?:or)?d|credential|auth)\w*["']?\s*[:=]\s*["'][A-Za-z0-9+/=_\-]{32,}["']"#, "Secret-shaped literal", false).env_exempt(),
        // password= / apiKey= literals
        rule(HardcodedSecret, r#"(?i)\b(?:password|passwd|pwd|api[_\-]?key|client[_\-]?secret|secret)\b["']?\s*[:=]\s*["'][^"'\s]{4,}["']"#, "Hardcoded credential", false).env_exempt(),
        rule(SqlInjection, r"(?i)`[^`]*\b(?:select|insert\s+into|update|delete\s+from)\b[^`]*\$\{", "SQL built from interpolated values", true),
        rule(SqlInjection, r#"(?i)["'](?:select|insert\s+into|update|delete\s+from)\b[^"']*["']\s*\+\s*[A-Za-z_]"#, "SQL built by string concatenation", true),
        rule(SqlInjection, r#"(?i)\bf["'](?:select|insert\s+into|update|delete\s+from)\b[^"']*\{"#, "SQL built from an f-string", true),
        rule(Xss, r"\.(?:innerHTML|outerHTML)\s*\+?=", "Unsafe HTML sink", true),
        rule(Xss, r"dangerouslySetInnerHTML", "Unsafe HTML sink", true),
        rule(Xss, r"\b(?:document\.write|insertAdjacentHTML)\s*\(", "Unsafe HTML sink", true),
        rule(PathTraversal, r"(?i)\b(?:path\.join|path\.resolve|readFile\w*|createReadStream|sendFile|open)\s*\([^)]*\b(?:req|request)\.(?:params|query|body)", "Path built from request input", true),
        rule(CodeExecution, r"\beval\s*\(", "Dynamic code execution", true),
        rule(CodeExecution, r"\bnew\s+Function\s*\(", "Dynamic code execution", true),
        rule(CodeExecution, r#"\bset(?:Timeout|Interval)\s*\(\s*["'`]"#, "String passed to a timer", true),
        rule(CodeExecution, r"\bexec\s*\(\s*[A-Za-z_f]", "Dynamic code execution", true),
        rule(CodeExecution, r"subprocess\.[a-z_]+\([^)]*shell\s*=\s*True", "Shell command execution", true),
        rule(SensitiveLog, r"(?i)\b(?:console\.(?:log|info|debug|warn)|print|println!|logger\.\w+|log\.\w+)\s*\(.*\b(?:password|secret|token|api_?key)\b", "Credential written to logs", true),
    ]
});

static WEAK_RANDOM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Math\.random\s*\(").unwrap());
static SECURITY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(token|secret|passw|key|salt|nonce|session|otp|csrf|auth|uuid)").unwrap()
});
static ENV_ACCESSOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"process\.env|import\.meta\.env|os\.environ|os\.getenv|env::var|std::env|getenv\s*\(|System\.getenv|ENV\[").unwrap()
});

fn is_comment_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with('#') && !t.starts_with("#[") || t.starts_with("/*") || t.starts_with('*') || t.starts_with("--")
}

pub struct SecurityScanner;

/// Scan one file's content. Each category reports at most once per line.
pub fn scan(path: &str, content: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        let comment = is_comment_line(line);
        let mut reported: BTreeSet<&'static str> = BTreeSet::new();
        for rule in RULES.iter() {
            if (rule.skip_comments && comment) || reported.contains(rule.category.code()) {
                continue;
            }
            if !rule.pattern.is_match(line) {
                continue;
            }
            if rule.env_exempt && ENV_ACCESSOR.is_match(line) {
                continue;
            }
            reported.insert(rule.category.code());
            issues.push(finding(path, idx + 1, rule.category, rule.message));
        }

        if !comment && WEAK_RANDOM.is_match(line) {
            let previous = if idx > 0 { lines[idx - 1] } else { "" };
            if SECURITY_NAME.is_match(line) || SECURITY_NAME.is_match(previous) {
                issues.push(finding(
                    path,
                    idx + 1,
                    Category::WeakRandom,
                    "Math.random() used for a security-sensitive value",
                ));
            }
        }
    }
    issues
}

fn finding(path: &str, line: usize, category: Category, message: &str) -> ValidationIssue {
    ValidationIssue::new(category.tier().severity(), path, message)
        .at_line(line)
        .with_code(category.code())
        .with_suggestion(category.suggestion())
}

impl Validator for SecurityScanner {
    fn id(&self) -> &'static str {
        "security-scanner"
    }

    fn stage(&self) -> Stage {
        Stage::Quality
    }

    fn validate(&self, ctx: &ValidatorContext) -> Result<ValidatorOutput, GateError> {
        Ok(ctx
            .live_changes()
            .flat_map(|change| scan(&change.path, &change.content))
            .collect::<Vec<_>>()
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(path: &str, content: &str) -> Vec<(String, Severity)> {
        scan(path, content)
            .into_iter()
            .map(|i| (i.code.unwrap_or_default(), i.severity))
            .collect()
    }

    #[test]
    fn provider_key_literal_is_critical() {
        let content = format!("const k = \"sk-live-{}\";", "a".repeat(30));
        assert_eq!(
            codes("x.ts", &content),
            vec![("SEC_HARDCODED_SECRET".to_string(), Severity::Error)]
        );
    }

    #[test]
    fn env_backed_credentials_are_allowed() {
        assert!(codes("cfg.ts", "const password = process.env.DB_PASSWORD || \"\";").is_empty());
        assert_eq!(
            codes("cfg.ts", "const password = \"hunter22\";")[0].0,
            "SEC_HARDCODED_SECRET"
        );
    }

    #[test]
    fn env_fallback_does_not_hide_provider_keys() {
        let content = format!("const k = process.env.STRIPE_KEY || \"sk_live_{}\";", "b".repeat(24));
        assert_eq!(
            codes("pay.ts", &content),
            vec![("SEC_HARDCODED_SECRET".to_string(), Severity::Error)]
        );
    }

    #[test]
    fn tiers_map_to_severity() {
        let content = "\
const q = `SELECT * FROM users WHERE id = ${id}`;
el.innerHTML = html;
const token = Math.random().toString(36);
console.log(\"token\", token);
eval(code);
";
        let found = codes("a.js", content);
        assert!(found.contains(&("SEC_SQL_INJECTION".to_string(), Severity::Error)));
        assert!(found.contains(&("SEC_XSS".to_string(), Severity::Error)));
        assert!(found.contains(&("SEC_WEAK_RANDOM".to_string(), Severity::Warning)));
        assert!(found.contains(&("SEC_SENSITIVE_LOG".to_string(), Severity::Info)));
        assert!(found.contains(&("SEC_CODE_EXECUTION".to_string(), Severity::Error)));
    }

    #[test]
    fn comments_do_not_trigger_code_rules() {
        assert!(codes("a.js", "// never call eval(input)\n").is_empty());
        assert!(codes("a.js", "const id = Math.random();\n").is_empty());
    }
}
