// Language detection and per-language construct patterns

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Languages the structural analyzer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
}

impl Language {
    /// Detect from the file extension; None for anything the analyzer cannot structure
    pub fn from_path(file_path: &str) -> Option<Self> {
        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "py" | "pyi" => Some(Language::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Rust => "Rust",
        }
    }

    /// Blocks delimited by braces rather than indentation
    pub fn uses_braces(&self) -> bool {
        !matches!(self, Language::Python)
    }

    /// Info strings accepted on a fenced code block for this language
    pub fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python", "py", "python3"],
            Language::JavaScript => &["javascript", "js", "jsx"],
            Language::TypeScript => &["typescript", "ts", "tsx"],
            Language::Rust => &["rust", "rs"],
        }
    }

    /// Tokens whose presence makes an unfenced response plausibly code
    pub fn code_keywords(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &[
                "def ", "class ", "import ", "from ", "return", "self", "if ", "elif ", "else:",
                "for ", "while ", "try:", "except", "with ", "raise ", "pass", "lambda",
            ],
            Language::JavaScript | Language::TypeScript => &[
                "function", "const ", "let ", "var ", "return", "import ", "export ", "class ",
                "=>", "if (", "for (", "await ", "async ", "try {", "catch", "interface ",
            ],
            Language::Rust => &[
                "fn ", "let ", "pub ", "use ", "impl ", "struct ", "enum ", "match ", "return",
                "Ok(", "Err(", "Some(", "None", "self", "mod ", "->", "=>", "::",
            ],
        }
    }

    /// Line prefixes that attach to the construct directly below them
    pub(crate) fn is_attachable(&self, trimmed: &str) -> bool {
        match self {
            Language::Python => trimmed.starts_with('@') || trimmed.starts_with('#'),
            Language::JavaScript | Language::TypeScript => {
                trimmed.starts_with('@')
                    || trimmed.starts_with("//")
                    || trimmed.starts_with("/*")
                    || trimmed.starts_with('*')
            }
            Language::Rust => {
                trimmed.starts_with("#[")
                    || trimmed.starts_with("//")
                    || trimmed.starts_with("/*")
                    || trimmed.starts_with('*')
            }
        }
    }

    pub(crate) fn patterns(&self) -> &'static LanguagePatterns {
        match self {
            Language::Python => python_patterns(),
            Language::JavaScript | Language::TypeScript => script_patterns(),
            Language::Rust => rust_patterns(),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compiled header patterns. Every pattern captures the construct name in group 1.
pub(crate) struct LanguagePatterns {
    pub imports: Vec<Regex>,
    pub functions: Vec<Regex>,
    pub classes: Vec<Regex>,
    pub variables: Vec<Regex>,
    /// `impl` blocks are named after their full header
    pub impl_block: Option<Regex>,
}

static PYTHON_PATTERNS: OnceLock<LanguagePatterns> = OnceLock::new();
static SCRIPT_PATTERNS: OnceLock<LanguagePatterns> = OnceLock::new();
static RUST_PATTERNS: OnceLock<LanguagePatterns> = OnceLock::new();

fn python_patterns() -> &'static LanguagePatterns {
    PYTHON_PATTERNS.get_or_init(|| LanguagePatterns {
        imports: vec![
            Regex::new(r"^import\s+([\w.]+)").unwrap(),
            Regex::new(r"^from\s+([\w.]+)\s+import\b").unwrap(),
        ],
        functions: vec![Regex::new(r"^(?:async\s+)?def\s+(\w+)").unwrap()],
        classes: vec![Regex::new(r"^class\s+(\w+)").unwrap()],
        variables: vec![Regex::new(r"^([A-Za-z_]\w*)\s*(?::[^=]+)?=[^=]").unwrap()],
        impl_block: None,
    })
}

fn script_patterns() -> &'static LanguagePatterns {
    SCRIPT_PATTERNS.get_or_init(|| LanguagePatterns {
        imports: vec![
            Regex::new(r#"^import\b\s*(?:type\s+)?([^;]*)"#).unwrap(),
            Regex::new(r"^export\s+(?:\*|\{[^}]*\})\s+from\s+(\S+)").unwrap(),
            Regex::new(r"^(?:const|let|var)\s+([\w{}\s,]+?)\s*=\s*require\(").unwrap(),
        ],
        functions: vec![
            Regex::new(r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)")
                .unwrap(),
            Regex::new(
                r"^(?:export\s+)?(?:const|let|var)\s+(\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::\s*[^=]+)?=>",
            )
            .unwrap(),
        ],
        classes: vec![Regex::new(
            r"^(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:class|interface|enum)\s+(\w+)",
        )
        .unwrap()],
        variables: vec![
            Regex::new(r"^(?:export\s+)?(?:declare\s+)?(?:const|let|var)\s+(\w+)").unwrap(),
            Regex::new(r"^(?:export\s+)?type\s+(\w+)").unwrap(),
        ],
        impl_block: None,
    })
}

fn rust_patterns() -> &'static LanguagePatterns {
    RUST_PATTERNS.get_or_init(|| LanguagePatterns {
        imports: vec![
            Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?use\s+([\w:]+)").unwrap(),
            Regex::new(r"^extern\s+crate\s+(\w+)").unwrap(),
        ],
        functions: vec![
            Regex::new(
                r#"^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(\w+)"#,
            )
            .unwrap(),
            Regex::new(r"^macro_rules!\s*(\w+)").unwrap(),
        ],
        classes: vec![Regex::new(
            r"^(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|trait|union|mod)\s+(\w+)",
        )
        .unwrap()],
        variables: vec![
            Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?(\w+)").unwrap(),
            Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?type\s+(\w+)").unwrap(),
        ],
        impl_block: Some(
            Regex::new(r"^(?:unsafe\s+)?impl(?:\s*<.*?>)?\s+([^{]+?)\s*(?:where\b[^{]*)?(?:\{.*)?$")
                .unwrap(),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("src/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("web/index.TSX"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("lib/util.mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("src/main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn test_rust_impl_header_name() {
        let re = Language::Rust.patterns().impl_block.as_ref().unwrap();
        let caps = re.captures("impl<T: Into<String>> Display for Wrapper<T> {").unwrap();
        assert_eq!(&caps[1], "Display for Wrapper<T>");
    }

    #[test]
    fn test_script_arrow_function_is_function() {
        let patterns = Language::TypeScript.patterns();
        let line = "export const handler = async (req: Request) => {";
        let name = patterns
            .functions
            .iter()
            .find_map(|re| re.captures(line).map(|c| c[1].to_string()));
        assert_eq!(name.as_deref(), Some("handler"));
    }

    #[test]
    fn test_attachable_prefixes() {
        assert!(Language::Python.is_attachable("@app.route('/')"));
        assert!(Language::Rust.is_attachable("#[derive(Debug)]"));
        assert!(!Language::Rust.is_attachable("#![allow(dead_code)]"));
        assert!(Language::TypeScript.is_attachable("/** Docs */"));
    }
}
