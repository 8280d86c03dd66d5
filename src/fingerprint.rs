//! Request fingerprinting
//!
//! Reduces a request to a stable, canonical summary (domain, question
//! type, keywords, complexity, length bucket) and a hash that keys both
//! the response cache and the empirical routing table.
//!
//! Fingerprinting is pure: the same request text always produces the same
//! fingerprint, and prompts that differ only in whitespace reduce to the
//! same domain and question type.

use crate::request::{RouterRequest, estimate_tokens};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Problem domain inferred from the request text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    DataProcessing,
    Frontend,
    Backend,
    Debugging,
    Architecture,
    FileAnalysis,
    General,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataProcessing => "data_processing",
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Debugging => "debugging",
            Self::Architecture => "architecture",
            Self::FileAnalysis => "file_analysis",
            Self::General => "general",
        }
    }
}

/// Shape of the question being asked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    HowTo,
    Explanation,
    Troubleshooting,
    Implementation,
    Analysis,
    GeneralQuery,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HowTo => "how_to",
            Self::Explanation => "explanation",
            Self::Troubleshooting => "troubleshooting",
            Self::Implementation => "implementation",
            Self::Analysis => "analysis",
            Self::GeneralQuery => "general_query",
        }
    }
}

/// Input size bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBucket {
    Small,
    Medium,
    Large,
}

impl LengthBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

/// Canonical request summary; keys the cache and the empirical table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Fingerprint {
    pub domain: Domain,
    pub question_type: QuestionType,
    /// Sorted, deduplicated canonical tags.
    pub keywords: Vec<String>,
    /// Heuristic complexity in [0, 1].
    pub complexity: f64,
    pub length_bucket: LengthBucket,
    pub has_code: bool,
    pub has_json: bool,
    /// SHA-256 hex of the canonical string, 64 chars.
    pub hash: String,
}

/// Canonical keyword table: domain -> indicative terms.
///
/// Matching happens on whitespace-normalized, lowercased text, so multi
/// word terms are stable across formatting differences.
const DOMAIN_KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::DataProcessing,
        &[
            "csv", "dataframe", "etl", "sql", "aggregate", "dataset", "parquet", "data pipeline",
            "batch job",
        ],
    ),
    (
        Domain::Frontend,
        &[
            "react", "css", "html", "component", "dom", "frontend", "browser", "layout",
            "stylesheet",
        ],
    ),
    (
        Domain::Backend,
        &[
            "api", "server", "database", "endpoint", "rest", "grpc", "backend", "middleware",
            "message queue",
        ],
    ),
    (
        Domain::Debugging,
        &[
            "error", "bug", "crash", "stack trace", "panic", "exception", "segfault", "traceback",
            "not working",
        ],
    ),
    (
        Domain::Architecture,
        &[
            "architecture",
            "microservice",
            "design pattern",
            "scalability",
            "monolith",
            "distributed",
            "infrastructure",
        ],
    ),
    (
        Domain::FileAnalysis,
        &[
            "this file",
            "these files",
            "codebase",
            "repository",
            "source tree",
            "refactor",
        ],
    ),
];

static QUESTION_PATTERNS: LazyLock<Vec<(QuestionType, Regex)>> = LazyLock::new(|| {
    [
        (
            QuestionType::HowTo,
            r"\bhow (do|can|to|would|should|does one)\b",
        ),
        (
            QuestionType::Troubleshooting,
            r"\b(why (is|does|am|won't)|not working|doesn't work|keeps failing|broken)\b",
        ),
        (
            QuestionType::Explanation,
            r"\b(what (is|are|does)|explain|describe|difference between|walk me through)\b",
        ),
        (
            QuestionType::Analysis,
            r"\b(analyze|review|compare|evaluate|assess|audit)\b",
        ),
        (
            QuestionType::Implementation,
            r"\b(write|implement|create|build|add|generate|convert)\b",
        ),
    ]
    .into_iter()
    .map(|(qt, pat)| (qt, Regex::new(pat).expect("question pattern must compile")))
    .collect()
});

static CODE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(fn|def|function|class|struct|import)\b|#include|=>")
        .expect("code marker pattern must compile")
});

static JSON_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*""#).expect("json marker pattern must compile"));

/// Collapse all whitespace runs to single spaces, trim, lowercase.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Compute the fingerprint for a request.
pub fn fingerprint(request: &RouterRequest) -> Fingerprint {
    let raw = request.full_text();
    let text = normalize(&raw);

    let mut keywords: Vec<String> = Vec::new();
    let mut best: (Option<Domain>, usize) = (None, 0);
    for (domain, terms) in DOMAIN_KEYWORDS {
        let mut hits = 0;
        for term in *terms {
            if text.contains(term) {
                hits += 1;
                keywords.push(term.replace(' ', "_"));
            }
        }
        if hits > best.1 {
            best = (Some(*domain), hits);
        }
    }

    // File inputs pin the domain regardless of prompt wording.
    let domain = if !request.file_inputs.is_empty() {
        Domain::FileAnalysis
    } else {
        best.0.unwrap_or(Domain::General)
    };

    keywords.sort();
    keywords.dedup();
    keywords.truncate(8);

    let question_type = QUESTION_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map(|(qt, _)| *qt)
        .unwrap_or(QuestionType::GeneralQuery);

    let tokens = estimate_tokens(&text);
    let length_bucket = if tokens < 100 {
        LengthBucket::Small
    } else if tokens < 500 {
        LengthBucket::Medium
    } else {
        LengthBucket::Large
    };

    let keyword_load = (keywords.len() as f64 * 0.08).min(0.5);
    let size_load = (tokens as f64 / 8_000.0).min(0.5);
    let complexity = ((keyword_load + size_load) * 100.0).round() / 100.0;

    let has_code = raw.contains("```") || CODE_MARKER.is_match(&text);
    let has_json = JSON_MARKER.is_match(&raw);

    let canonical = format!(
        "{}|{}|{}|c={:.2}|len={}|code={}|json={}",
        domain.as_str(),
        question_type.as_str(),
        keywords.join(","),
        complexity,
        length_bucket.as_str(),
        has_code as u8,
        has_json as u8,
    );
    let hash = format!("{:x}", Sha256::digest(canonical.as_bytes()));

    Fingerprint {
        domain,
        question_type,
        keywords,
        complexity,
        length_bucket,
        has_code,
        has_json,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn req(prompt: &str) -> RouterRequest {
        RouterRequest::new(prompt, Duration::from_secs(60))
    }

    #[test]
    fn test_fingerprint_is_pure() {
        let r = req("Why is my React component not working after the update?");
        let a = fingerprint(&r);
        let b = fingerprint(&r);
        assert_eq!(a, b);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_whitespace_normalization_preserves_classification() {
        let a = fingerprint(&req("How do I   connect to a REST api\n\nserver?"));
        let b = fingerprint(&req("How do I connect to a REST api server?"));
        assert_eq!(a.domain, b.domain);
        assert_eq!(a.question_type, b.question_type);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_domain_detection() {
        assert_eq!(
            fingerprint(&req("My build crashes with a stack trace and a panic")).domain,
            Domain::Debugging
        );
        assert_eq!(
            fingerprint(&req("Style this CSS component for the browser DOM")).domain,
            Domain::Frontend
        );
        assert_eq!(
            fingerprint(&req("Design a scalable microservice architecture")).domain,
            Domain::Architecture
        );
        assert_eq!(
            fingerprint(&req("hello there")).domain,
            Domain::General
        );
    }

    #[test]
    fn test_file_inputs_pin_domain() {
        let mut r = req("summarize please");
        r.file_inputs = vec!["/workspace/src/main.rs".to_string()];
        assert_eq!(fingerprint(&r).domain, Domain::FileAnalysis);
    }

    #[test]
    fn test_question_type_detection() {
        assert_eq!(
            fingerprint(&req("How do I write tests in Rust?")).question_type,
            QuestionType::HowTo
        );
        assert_eq!(
            fingerprint(&req("What is a lifetime in Rust?")).question_type,
            QuestionType::Explanation
        );
        assert_eq!(
            fingerprint(&req("Why is my function not working?")).question_type,
            QuestionType::Troubleshooting
        );
        assert_eq!(
            fingerprint(&req("Write a parser for TOML")).question_type,
            QuestionType::Implementation
        );
        assert_eq!(
            fingerprint(&req("Review this module for race conditions")).question_type,
            QuestionType::Analysis
        );
        assert_eq!(
            fingerprint(&req("bananas")).question_type,
            QuestionType::GeneralQuery
        );
    }

    #[test]
    fn test_keywords_sorted_and_deduped() {
        let fp = fingerprint(&req(
            "The server database api keeps failing, the api endpoint and database too",
        ));
        let mut sorted = fp.keywords.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(fp.keywords, sorted);
    }

    #[test]
    fn test_length_buckets() {
        assert_eq!(
            fingerprint(&req("short")).length_bucket,
            LengthBucket::Small
        );
        let medium = "word ".repeat(150);
        assert_eq!(
            fingerprint(&req(&medium)).length_bucket,
            LengthBucket::Medium
        );
        let large = "word ".repeat(800);
        assert_eq!(
            fingerprint(&req(&large)).length_bucket,
            LengthBucket::Large
        );
    }

    #[test]
    fn test_code_and_json_detection() {
        assert!(fingerprint(&req("```rust\nfn main() {}\n```")).has_code);
        assert!(fingerprint(&req("what does def foo mean")).has_code);
        assert!(!fingerprint(&req("plain prose about nothing")).has_code);

        assert!(fingerprint(&req(r#"parse {"name": "x"} for me"#)).has_json);
        assert!(!fingerprint(&req("no structured data here")).has_json);
    }

    #[test]
    fn test_hash_is_64_chars_and_distinct() {
        let a = fingerprint(&req("Write a CSV aggregation pipeline"));
        let b = fingerprint(&req("Why is my CSS layout broken?"));
        assert_eq!(a.hash.len(), 64);
        assert_eq!(b.hash.len(), 64);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_complexity_bounded() {
        let fp = fingerprint(&req(&format!(
            "architecture microservice distributed {} ",
            "filler ".repeat(3000)
        )));
        assert!(fp.complexity >= 0.0);
        assert!(fp.complexity <= 1.0);
    }
}
