//! Source-text helpers shared by the validators: language detection, a
//! comment/string masking scanner, declaration and export extraction, and the
//! path glob used by allow-lists.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    /// JavaScript and TypeScript, with or without JSX.
    Script,
    /// Other C-family languages: `//` and `/* */` comments, `'` and `"` strings.
    CLike,
    Css,
    Json,
    Sql,
    Markup,
    Shell,
    Other,
}

impl Language {
    pub fn detect(path: &str) -> Self {
        match extension(path).as_str() {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => Self::Script,
            "java" | "c" | "h" | "cc" | "cpp" | "hpp" | "cs" | "go" | "kt" | "swift" | "scala"
            | "php" | "dart" => Self::CLike,
            "css" | "scss" | "less" => Self::Css,
            "json" => Self::Json,
            "sql" => Self::Sql,
            "html" | "htm" | "vue" | "svelte" => Self::Markup,
            "sh" | "bash" | "zsh" => Self::Shell,
            _ => Self::Other,
        }
    }

    /// Languages whose brackets must balance.
    pub fn is_bracketed(&self) -> bool {
        matches!(
            self,
            Self::Rust | Self::Python | Self::Script | Self::CLike | Self::Css
        )
    }

    /// Languages whose blocks are delimited by `{}`.
    pub fn uses_braces(&self) -> bool {
        matches!(self, Self::Rust | Self::Script | Self::CLike)
    }
}

pub fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn is_typescript(path: &str) -> bool {
    matches!(extension(path).as_str(), "ts" | "tsx" | "mts" | "cts")
}

pub fn is_jsx(path: &str) -> bool {
    matches!(extension(path).as_str(), "jsx" | "tsx")
}

pub fn is_code_file(path: &str) -> bool {
    !matches!(Language::detect(path), Language::Other | Language::Json)
}

pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase().replace('\\', "/");
    let base = lower.rsplit('/').next().unwrap_or(&lower);
    lower.starts_with("tests/")
        || lower.starts_with("test/")
        || lower.contains("/tests/")
        || lower.contains("/test/")
        || lower.contains("__tests__/")
        || base.contains(".test.")
        || base.contains(".spec.")
        || base.starts_with("test_")
        || base.ends_with("_test.rs")
        || base.ends_with("_test.go")
        || base.ends_with("_test.py")
}

/// 1-based line of a byte offset.
pub fn line_number(content: &str, offset: usize) -> usize {
    let end = offset.min(content.len());
    content.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Glob over `/`-separated paths: `*` stays within a segment's prefix/suffix,
/// `**` spans directories, a trailing `*` is a prefix wildcard.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let suffix = suffix.trim_start_matches('/');
        return text.starts_with(prefix)
            && (suffix.is_empty() || text.ends_with(suffix) || glob_match(suffix, text));
    }
    if let Some((prefix, suffix)) = pattern.split_once('*') {
        return text.len() >= prefix.len() + suffix.len()
            && text.starts_with(prefix)
            && text.ends_with(suffix);
    }
    pattern == text
}

/// Source with comments and string literal bodies blanked out byte-for-byte,
/// so offsets and line numbers still line up with the original.
#[derive(Debug, Clone)]
pub struct Masked {
    pub text: String,
    /// Lines where a single-line string literal ran into the end of the line.
    pub unclosed_strings: Vec<usize>,
}

impl Masked {
    pub fn lines(&self) -> std::str::Lines<'_> {
        self.text.lines()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Code,
    LineComment,
    BlockComment(usize),
    Str { quote: char, multiline: bool },
    TripleStr(char),
    RawStr(usize),
}

pub fn mask(content: &str, lang: Language) -> Masked {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut out = String::with_capacity(content.len());
    let mut unclosed_strings = Vec::new();
    let mut state = State::Code;
    let mut line = 1usize;
    let mut i = 0usize;

    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let blank = |out: &mut String, c: char| {
        if c == '\n' {
            out.push('\n');
        } else {
            for _ in 0..c.len_utf8() {
                out.push(' ');
            }
        }
    };

    while i < chars.len() {
        let c = chars[i].1;
        let next = at(i + 1);
        match state {
            State::Code => {
                let slash_comments = matches!(lang, Language::Rust | Language::Script | Language::CLike);
                let hash_comments = matches!(lang, Language::Python | Language::Shell);
                if slash_comments && c == '/' && next == Some('/') {
                    state = State::LineComment;
                    blank(&mut out, c);
                } else if lang != Language::Python && lang != Language::Shell && c == '/' && next == Some('*') {
                    state = State::BlockComment(1);
                    out.push_str("  ");
                    i += 2;
                    continue;
                } else if hash_comments && c == '#' {
                    state = State::LineComment;
                    blank(&mut out, c);
                } else if lang == Language::Python
                    && (c == '"' || c == '\'')
                    && next == Some(c)
                    && at(i + 2) == Some(c)
                {
                    state = State::TripleStr(c);
                    out.push(c);
                    out.push_str("  ");
                    i += 3;
                    continue;
                } else if lang == Language::Rust && c == 'r' && starts_raw_string(&chars, i) {
                    let hashes = count_while(&chars, i + 1, '#');
                    state = State::RawStr(hashes);
                    out.push(c);
                    for _ in 0..hashes {
                        out.push(' ');
                    }
                    out.push('"');
                    i += 2 + hashes;
                    continue;
                } else if lang == Language::Rust && c == '\'' {
                    match rust_char_literal_len(&chars, i) {
                        Some(len) => {
                            out.push('\'');
                            for k in 1..len - 1 {
                                blank(&mut out, chars[i + k].1);
                            }
                            out.push('\'');
                            i += len;
                            continue;
                        }
                        None => out.push(c),
                    }
                } else if c == '"' || (c == '\'' && lang != Language::Rust) {
                    state = State::Str {
                        quote: c,
                        multiline: lang == Language::Rust,
                    };
                    out.push(c);
                } else if c == '`' && lang == Language::Script {
                    state = State::Str {
                        quote: c,
                        multiline: true,
                    };
                    out.push(c);
                } else {
                    out.push(c);
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
                blank(&mut out, c);
            }
            State::BlockComment(depth) => {
                if c == '*' && next == Some('/') {
                    out.push_str("  ");
                    i += 2;
                    state = if depth > 1 {
                        State::BlockComment(depth - 1)
                    } else {
                        State::Code
                    };
                    continue;
                }
                if lang == Language::Rust && c == '/' && next == Some('*') {
                    out.push_str("  ");
                    i += 2;
                    state = State::BlockComment(depth + 1);
                    continue;
                }
                blank(&mut out, c);
            }
            State::Str { quote, multiline } => {
                if c == '\\' {
                    blank(&mut out, c);
                    if let Some(n) = next {
                        if n == '\n' {
                            line += 1;
                        }
                        blank(&mut out, n);
                    }
                    i += 2;
                    continue;
                }
                if c == quote {
                    state = State::Code;
                    out.push(c);
                } else if c == '\n' && !multiline {
                    unclosed_strings.push(line);
                    state = State::Code;
                    out.push('\n');
                } else {
                    blank(&mut out, c);
                }
            }
            State::TripleStr(q) => {
                if c == q && next == Some(q) && at(i + 2) == Some(q) {
                    out.push_str("  ");
                    out.push(q);
                    i += 3;
                    state = State::Code;
                    continue;
                }
                blank(&mut out, c);
            }
            State::RawStr(hashes) => {
                if c == '"' && count_while(&chars, i + 1, '#') >= hashes {
                    out.push('"');
                    for _ in 0..hashes {
                        out.push(' ');
                    }
                    i += 1 + hashes;
                    state = State::Code;
                    continue;
                }
                blank(&mut out, c);
            }
        }
        if c == '\n' {
            line += 1;
        }
        i += 1;
    }

    if let State::Str { multiline: false, .. } = state {
        unclosed_strings.push(line);
    }

    Masked {
        text: out,
        unclosed_strings,
    }
}

fn count_while(chars: &[(usize, char)], from: usize, want: char) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .take_while(|(_, c)| *c == want)
        .count()
}

fn starts_raw_string(chars: &[(usize, char)], i: usize) -> bool {
    let prev_is_ident = i > 0 && {
        let p = chars[i - 1].1;
        p.is_alphanumeric() || p == '_'
    };
    if prev_is_ident {
        return false;
    }
    let hashes = count_while(chars, i + 1, '#');
    chars.get(i + 1 + hashes).map(|(_, c)| *c) == Some('"')
}

/// Length in chars of a Rust char literal starting at `i`, or `None` for a
/// lifetime.
fn rust_char_literal_len(chars: &[(usize, char)], i: usize) -> Option<usize> {
    let at = |k: usize| chars.get(k).map(|(_, c)| *c);
    match at(i + 1)? {
        '\\' => {
            let mut k = i + 2;
            while k < chars.len() && k < i + 12 {
                if at(k) == Some('\'') {
                    return Some(k - i + 1);
                }
                k += 1;
            }
            None
        }
        '\n' => None,
        _ if at(i + 2) == Some('\'') => Some(3),
        _ => None,
    }
}

static DECLARATIONS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)").unwrap(),
        Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+([A-Za-z_]\w*)").unwrap(),
        Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap(),
        Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::\s*[^=]+)?=>").unwrap(),
        Regex::new(r"^\s*(?:(?:public|private|protected|static|async|override|readonly|get|set)\s+)*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::\s*[^{;]+)?\{\s*$").unwrap(),
    ]
});

const NOT_FUNCTIONS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "else", "do", "with", "match",
];

/// Name of the function declared on `line`, if any.
pub fn declared_function(line: &str) -> Option<String> {
    DECLARATIONS.iter().find_map(|re| {
        let name = re.captures(line)?.get(1)?.as_str();
        (!NOT_FUNCTIONS.contains(&name)).then(|| name.to_string())
    })
}

static SCRIPT_EXPORTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:async\s+)?(?:function\s*\*?|class|const|let|var|interface|type|enum|abstract\s+class)\s+([A-Za-z_$][\w$]*)").unwrap()
});
static SCRIPT_EXPORT_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*export\s*\{([^}]*)\}").unwrap());
static RUST_EXPORTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*pub\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|union)\s+([A-Za-z_]\w*)").unwrap()
});
static PYTHON_EXPORTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:async\s+)?(?:def|class)\s+([A-Za-z]\w*)").unwrap());

/// Public symbols a file exposes to other modules.
pub fn exported_symbols(path: &str, content: &str) -> Vec<String> {
    let lang = Language::detect(path);
    let masked = mask(content, lang);
    let text = masked.text.as_str();
    let mut out: Vec<String> = Vec::new();
    match lang {
        Language::Script => {
            out.extend(SCRIPT_EXPORTS.captures_iter(text).map(|c| c[1].to_string()));
            for cap in SCRIPT_EXPORT_LIST.captures_iter(text) {
                for item in cap[1].split(',') {
                    let name = item.split_whitespace().last().unwrap_or("");
                    if !name.is_empty() {
                        out.push(name.to_string());
                    }
                }
            }
        }
        Language::Rust => out.extend(RUST_EXPORTS.captures_iter(text).map(|c| c[1].to_string())),
        Language::Python => out.extend(PYTHON_EXPORTS.captures_iter(text).map(|c| c[1].to_string())),
        _ => {}
    }
    out.sort();
    out.dedup();
    out
}

/// Lines of `new` that do not appear in `old` (1-based line numbers into
/// `new`), plus lines of `old` missing from `new`.
pub fn changed_lines(old: &str, new: &str) -> (Vec<usize>, Vec<usize>) {
    use std::collections::HashMap;
    let mut budget: HashMap<&str, usize> = HashMap::new();
    for l in old.lines() {
        *budget.entry(l).or_default() += 1;
    }
    let mut added = Vec::new();
    for (idx, l) in new.lines().enumerate() {
        match budget.get_mut(l) {
            Some(n) if *n > 0 => *n -= 1,
            _ => added.push(idx + 1),
        }
    }
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for l in new.lines() {
        *remaining.entry(l).or_default() += 1;
    }
    let mut removed = Vec::new();
    for (idx, l) in old.lines().enumerate() {
        match remaining.get_mut(l) {
            Some(n) if *n > 0 => *n -= 1,
            _ => removed.push(idx + 1),
        }
    }
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*", "src/a.ts"));
        assert!(glob_match("src/*", "src/a.ts"));
        assert!(glob_match("src/**", "src/deep/a.ts"));
        assert!(glob_match("**/*.ts", "src/deep/a.ts"));
        assert!(glob_match("*.rs", "main.rs"));
        assert!(!glob_match("src/*.ts", "lib/a.ts"));
        assert!(glob_match("src/a.ts", "src/a.ts"));
    }

    #[test]
    fn mask_blanks_strings_and_comments_preserving_offsets() {
        let src = "let a = \"{\"; // }\nlet b = 1;";
        let m = mask(src, Language::Script);
        assert_eq!(m.text.len(), src.len());
        assert!(!m.text.contains('{'));
        assert!(!m.text.contains('}'));
        assert!(m.text.contains("let b = 1;"));
        assert!(m.unclosed_strings.is_empty());
    }

    #[test]
    fn mask_reports_unclosed_single_line_string() {
        let m = mask("const s = 'oops;\nconst t = 1;\n", Language::Script);
        assert_eq!(m.unclosed_strings, vec![1]);
    }

    #[test]
    fn mask_rust_lifetimes_and_chars() {
        let src = "fn f<'a>(x: &'a str) -> char { '{' }";
        let m = mask(src, Language::Rust);
        assert_eq!(m.text.matches('{').count(), 1);
        assert_eq!(m.text.matches('}').count(), 1);
        let raw = "let s = r#\"}\"#;";
        assert!(!mask(raw, Language::Rust).text.contains('}'));
    }

    #[test]
    fn mask_python_comments_and_triple_quotes() {
        let src = "def f():\n    \"\"\"doc (\"\"\"\n    # )\n    return 1\n";
        let m = mask(src, Language::Python);
        assert!(!m.text.contains('#'));
        assert_eq!(m.text.matches('(').count(), 1);
        assert_eq!(m.text.matches(')').count(), 1);
    }

    #[test]
    fn declarations_across_languages() {
        assert_eq!(declared_function("export async function loadUser(id) {").as_deref(), Some("loadUser"));
        assert_eq!(declared_function("pub(crate) fn parse(input: &str) -> u8 {").as_deref(), Some("parse"));
        assert_eq!(declared_function("    def handle(self):").as_deref(), Some("handle"));
        assert_eq!(declared_function("const save = async (x) => {").as_deref(), Some("save"));
        assert_eq!(declared_function("  render() {").as_deref(), Some("render"));
        assert_eq!(declared_function("  if (x) {"), None);
        assert_eq!(declared_function("let x = 5;"), None);
    }

    #[test]
    fn exports_by_language() {
        let ts = "export function a() {}\nexport const b = 1;\nfunction hidden() {}\nexport { c, d as e };\n";
        assert_eq!(exported_symbols("m.ts", ts), vec!["a", "b", "c", "e"]);
        let rs = "pub fn run() {}\nfn private() {}\npub struct Gate;\n";
        assert_eq!(exported_symbols("lib.rs", rs), vec!["Gate", "run"]);
        let py = "def api():\n    pass\ndef _internal():\n    pass\n";
        assert_eq!(exported_symbols("m.py", py), vec!["api"]);
    }

    #[test]
    fn changed_lines_counts_both_sides() {
        let (added, removed) = changed_lines("a\nb\nc\n", "a\nx\nc\ny\n");
        assert_eq!(added, vec![2, 4]);
        assert_eq!(removed, vec![2]);
    }

    #[test]
    fn test_paths() {
        assert!(is_test_path("src/__tests__/a.ts"));
        assert!(is_test_path("src/a.test.ts"));
        assert!(is_test_path("tests/plan.rs"));
        assert!(is_test_path("pkg/test_api.py"));
        assert!(!is_test_path("src/attest.ts"));
    }
}
