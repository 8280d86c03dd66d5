//! Language detection and structure extraction
//!
//! Language is decided by extension against a closed lookup table.
//! Imports, functions, and classes are extracted with best-effort regexes
//! per language; the output is bounded and deterministic for a given
//! input, which is all downstream consumers rely on.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Upper bound on extracted matches per category.
const MAX_MATCHES: usize = 50;

/// Recognized source languages (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    Go,
    Python,
    JavaScript,
    TypeScript,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Shell,
    Sql,
    Html,
    Css,
    Markdown,
    Json,
    Yaml,
    Toml,
    Text,
}

impl Language {
    /// Closed extension lookup table. Unknown extensions return `None`;
    /// the file is then outside the allowlist.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let lang = match ext.to_ascii_lowercase().as_str() {
            "rs" => Self::Rust,
            "go" => Self::Go,
            "py" => Self::Python,
            "js" | "mjs" | "cjs" | "jsx" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cpp" | "cc" | "cxx" | "hpp" => Self::Cpp,
            "cs" => Self::CSharp,
            "rb" => Self::Ruby,
            "php" => Self::Php,
            "sh" | "bash" => Self::Shell,
            "sql" => Self::Sql,
            "html" | "htm" => Self::Html,
            "css" | "scss" => Self::Css,
            "md" | "markdown" => Self::Markdown,
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            "toml" => Self::Toml,
            "txt" => Self::Text,
            _ => return None,
        };
        Some(lang)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::CSharp => "csharp",
            Self::Ruby => "ruby",
            Self::Php => "php",
            Self::Shell => "shell",
            Self::Sql => "sql",
            Self::Html => "html",
            Self::Css => "css",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Text => "text",
        }
    }

    /// Source languages rank above markup/data in prompt assembly.
    pub fn is_source(&self) -> bool {
        !matches!(
            self,
            Self::Markdown | Self::Json | Self::Yaml | Self::Toml | Self::Html | Self::Css
                | Self::Text
        )
    }

    /// Line-comment prefix used for the non-comment line ratio.
    fn comment_prefix(&self) -> &'static str {
        match self {
            Self::Python | Self::Ruby | Self::Shell | Self::Yaml | Self::Toml => "#",
            Self::Sql => "--",
            Self::Html | Self::Markdown => "<!--",
            _ => "//",
        }
    }
}

/// Complexity bucket derived from line density
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityBucket {
    Low,
    Medium,
    High,
}

impl ComplexityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Structure extracted from one file
#[derive(Debug, Clone, Serialize)]
pub struct StructureSummary {
    pub line_count: usize,
    pub imports: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub complexity_bucket: ComplexityBucket,
}

struct LangPatterns {
    imports: Regex,
    functions: Regex,
    classes: Regex,
}

fn patterns_for(language: Language) -> &'static LangPatterns {
    static RUST: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r"(?m)^\s*use\s+([\w:]+)"),
        functions: re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+(\w+)"),
        classes: re(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)"),
    });
    static GO: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r#"(?m)^\s*(?:import\s+)?"([\w./-]+)""#),
        functions: re(r"(?m)^\s*func\s+(?:\([^)]*\)\s*)?(\w+)"),
        classes: re(r"(?m)^\s*type\s+(\w+)\s+(?:struct|interface)"),
    });
    static PYTHON: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))"),
        functions: re(r"(?m)^\s*(?:async\s+)?def\s+(\w+)"),
        classes: re(r"(?m)^\s*class\s+(\w+)"),
    });
    static JS: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r#"(?m)(?:import\s+.*?from\s+['"]([^'"]+)['"]|require\(['"]([^'"]+)['"]\))"#),
        functions: re(
            r"(?m)^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)|^\s*(?:const|let)\s+(\w+)\s*=\s*(?:async\s*)?\(",
        ),
        classes: re(r"(?m)^\s*(?:export\s+)?class\s+(\w+)"),
    });
    static JAVA_LIKE: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r"(?m)^\s*(?:import|using)\s+([\w.]+)"),
        functions: re(
            r"(?m)^\s*(?:public|private|protected|static|\s)*[\w<>\[\]]+\s+(\w+)\s*\([^;]*\)\s*\{",
        ),
        classes: re(r"(?m)^\s*(?:public\s+|abstract\s+|final\s+)*(?:class|interface|enum)\s+(\w+)"),
    });
    static C_LIKE: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r#"(?m)^\s*#include\s+[<"]([\w./]+)[>"]"#),
        functions: re(r"(?m)^\w[\w\s\*]*?(\w+)\s*\([^;]*\)\s*\{"),
        classes: re(r"(?m)^\s*(?:typedef\s+)?(?:struct|class|enum)\s+(\w+)"),
    });
    static RUBY: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r#"(?m)^\s*require(?:_relative)?\s+['"]([^'"]+)['"]"#),
        functions: re(r"(?m)^\s*def\s+(\w+)"),
        classes: re(r"(?m)^\s*(?:class|module)\s+(\w+)"),
    });
    static FALLBACK: LazyLock<LangPatterns> = LazyLock::new(|| LangPatterns {
        imports: re(r"(?m)^\s*(?:import|include|use)\s+(\S+)"),
        functions: re(r"(?m)^\s*(?:function|def|fn|func)\s+(\w+)"),
        classes: re(r"(?m)^\s*(?:class|struct)\s+(\w+)"),
    });

    match language {
        Language::Rust => &RUST,
        Language::Go => &GO,
        Language::Python => &PYTHON,
        Language::JavaScript | Language::TypeScript => &JS,
        Language::Java | Language::CSharp => &JAVA_LIKE,
        Language::C | Language::Cpp | Language::Php => &C_LIKE,
        Language::Ruby => &RUBY,
        _ => &FALLBACK,
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("structure pattern must compile")
}

/// Extract structure from file content. Deterministic given the same input.
pub fn extract(content: &str, language: Language) -> StructureSummary {
    let patterns = patterns_for(language);

    let collect = |regex: &Regex| -> Vec<String> {
        let mut out = Vec::new();
        for caps in regex.captures_iter(content) {
            // First non-empty capture group wins (alternations leave gaps).
            if let Some(m) = (1..caps.len()).find_map(|i| caps.get(i)) {
                let text = m.as_str().trim().to_string();
                if !text.is_empty() && !out.contains(&text) {
                    out.push(text);
                }
            }
            if out.len() >= MAX_MATCHES {
                break;
            }
        }
        out
    };

    let line_count = content.lines().count();
    let comment = language.comment_prefix();
    let effective = content
        .lines()
        .filter(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with(comment)
        })
        .count();

    let ratio = if line_count == 0 {
        0.0
    } else {
        effective as f64 / line_count as f64
    };
    let complexity_bucket = bucketize(ratio);

    StructureSummary {
        line_count,
        imports: collect(&patterns.imports),
        functions: collect(&patterns.functions),
        classes: collect(&patterns.classes),
        complexity_bucket,
    }
}

/// Bucketize from the non-blank, non-comment line ratio alone.
fn bucketize(ratio: f64) -> ComplexityBucket {
    if ratio < 0.4 {
        ComplexityBucket::Low
    } else if ratio < 0.75 {
        ComplexityBucket::Medium
    } else {
        ComplexityBucket::High
    }
}
