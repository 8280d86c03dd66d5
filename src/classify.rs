//! Request complexity classification
//!
//! Scores a request in [0, 1] and labels its intent as simple, complex,
//! or ambiguous. The output is advisory: it scales timeouts and response
//! budgets but never disqualifies an endpoint on its own.

use crate::request::RouterRequest;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Classified intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Simple,
    Complex,
    Ambiguous,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
            Self::Ambiguous => "ambiguous",
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Final complexity score in [0, 1]
    pub score: f64,
    pub intent: Intent,
    /// Names of the patterns that fired, for diagnostics
    pub matched_patterns: Vec<&'static str>,
    pub reason: String,
}

struct WeightedPattern {
    name: &'static str,
    weight: f64,
    regex: Regex,
}

fn compile(set: &[(&'static str, f64, &str)]) -> Vec<WeightedPattern> {
    set.iter()
        .map(|(name, weight, pat)| WeightedPattern {
            name,
            weight: *weight,
            regex: Regex::new(pat).expect("classifier pattern must compile"),
        })
        .collect()
}

static SIMPLE_PATTERNS: LazyLock<Vec<WeightedPattern>> = LazyLock::new(|| {
    compile(&[
        (
            "simple_factual",
            0.8,
            r"^(what|who|where|when) (is|are|was|were)\b",
        ),
        (
            "simple_snippet",
            0.9,
            r"\b(write|create|make) a (simple|small|short|basic|quick)\b",
        ),
        ("single_function", 0.85, r"\bwrite a function\b"),
        (
            "toy_transform",
            0.8,
            r"\b(reverse|sort|sum|count|capitalize)\b.*\b(string|list|array|numbers?|words?)\b",
        ),
        ("one_liner", 0.8, r"\bone[- ]liner\b"),
        ("typo_fix", 0.85, r"\bfix (this|a|the) typo\b"),
    ])
});

static COMPLEX_PATTERNS: LazyLock<Vec<WeightedPattern>> = LazyLock::new(|| {
    compile(&[
        (
            "system_design",
            0.9,
            r"\b(design|architect)\b.*\b(system|service|platform|architecture)\b",
        ),
        ("microservices", 0.8, r"\bmicroservices?\b"),
        (
            "distributed_systems",
            0.85,
            r"\b(distributed|high[- ]availability|fault[- ]toleran\w+|horizontally scal\w+)\b",
        ),
        (
            "large_refactor",
            0.85,
            r"\brefactor\b.*\b(entire|whole|codebase|project|monolith)\b",
        ),
        (
            "migration",
            0.8,
            r"\b(migrate|migration)\b.*\b(database|schema|cloud|platform)\b",
        ),
        ("end_to_end", 0.7, r"\bend[- ]to[- ]end\b"),
        ("multi_step", 0.7, r"\b(orchestrat\w+|multi[- ]stage|multi[- ]step)\b"),
    ])
});

/// Complexity-indicator keyword categories, weighted additively.
const INDICATOR_CATEGORIES: &[(&str, f64, &[&str])] = &[
    (
        "architectural",
        0.15,
        &["architecture", "scalable", "monolith", "distributed", "topology"],
    ),
    (
        "coordination",
        0.12,
        &["workflow", "orchestrate", "pipeline", "synchronize", "saga"],
    ),
    (
        "enterprise",
        0.10,
        &["enterprise", "compliance", "audit", "governance", "sla"],
    ),
    (
        "integration",
        0.12,
        &["gateway", "webhook", "third-party", "oauth", "message queue"],
    ),
    (
        "planning",
        0.10,
        &["roadmap", "milestone", "phases", "requirements", "trade-off"],
    ),
];

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Classify a request. Pure function of the request text.
pub fn classify(request: &RouterRequest) -> Classification {
    let raw = request.full_text();
    let text = normalize(&raw);

    let mut matched: Vec<&'static str> = Vec::new();

    // Highest-weighted match per set is the primary signal.
    let mut simple_confidence: f64 = 0.0;
    for p in SIMPLE_PATTERNS.iter() {
        if p.regex.is_match(&text) {
            matched.push(p.name);
            simple_confidence = simple_confidence.max(p.weight);
        }
    }

    let mut complex_confidence: f64 = 0.0;
    for p in COMPLEX_PATTERNS.iter() {
        if p.regex.is_match(&text) {
            matched.push(p.name);
            complex_confidence = complex_confidence.max(p.weight);
        }
    }

    let mut indicator_score = 0.0;
    for (name, weight, terms) in INDICATOR_CATEGORIES {
        if terms.iter().any(|t| text.contains(t)) {
            matched.push(*name);
            indicator_score += *weight;
        }
    }

    let length_factor = (raw.len() as f64 / 1_000.0).min(0.3);

    let score = (complex_confidence + indicator_score + length_factor).clamp(0.0, 1.0);

    let (intent, reason) = if complex_confidence > 0.7 {
        (
            Intent::Complex,
            format!("complex pattern matched with confidence {:.2}", complex_confidence),
        )
    } else if score >= 0.6 {
        (
            Intent::Complex,
            format!("aggregate complexity score {:.2} >= 0.6", score),
        )
    } else if simple_confidence > 0.7 && score < 0.3 {
        (
            Intent::Simple,
            format!(
                "simple pattern matched with confidence {:.2} and score {:.2} < 0.3",
                simple_confidence, score
            ),
        )
    } else {
        (
            Intent::Ambiguous,
            format!(
                "no decisive signal (simple {:.2}, complex {:.2}, score {:.2})",
                simple_confidence, complex_confidence, score
            ),
        )
    };

    Classification {
        score,
        intent,
        matched_patterns: matched,
        reason,
    }
}
