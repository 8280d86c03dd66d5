//! Prompt assembly under an endpoint token budget
//!
//! Builds the outbound prompt from the request text and analyzed files,
//! highest-value files first, truncating or omitting whatever the
//! endpoint's context window cannot carry. Chunked files contribute only
//! their top-ranked chunk; the rest stay available for later requests.

use crate::analysis::chunker::{ChunkOptions, SemanticChunker};
use crate::analysis::FileUnit;
use crate::analysis::structure::ComplexityBucket;
use crate::endpoints::Endpoint;
use crate::request::{RouterRequest, estimate_tokens};
use serde::Serialize;

/// Tokens held back from the context window for safety.
const SAFETY_MARGIN_TOKENS: u32 = 512;

/// Smallest remaining budget worth truncating a file into.
const MIN_TRUNCATION_TOKENS: usize = 256;

/// The assembled prompt and what was left out.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPrompt {
    pub text: String,
    pub token_estimate: usize,
    pub files_included: usize,
    pub files_omitted: usize,
    pub chunks_omitted: usize,
    pub truncated: bool,
}

/// Priority score for file ordering: deeper files first, source over
/// markup, moderate sizes over tiny or huge ones.
fn priority_score(file: &FileUnit) -> u32 {
    let complexity = match file.complexity_bucket {
        ComplexityBucket::High => 30,
        ComplexityBucket::Medium => 20,
        ComplexityBucket::Low => 10,
    };
    let source = if file.language.is_source() { 15 } else { 0 };
    let size = if (1_024..=50 * 1_024).contains(&file.size) {
        10
    } else {
        0
    };
    complexity + source + size
}

/// Assemble the outbound prompt for `endpoint` within its token budget.
pub fn assemble(
    request: &RouterRequest,
    endpoint: &Endpoint,
    files: &[FileUnit],
) -> AssembledPrompt {
    let budget = endpoint
        .max_context_tokens()
        .saturating_sub(endpoint.max_response_tokens())
        .saturating_sub(SAFETY_MARGIN_TOKENS)
        .max(MIN_TRUNCATION_TOKENS as u32) as usize;

    let mut text = request.full_text();
    let mut used = estimate_tokens(&text);
    let mut files_included = 0;
    let mut files_omitted = 0;
    let mut chunks_omitted = 0;
    let mut truncated = false;

    let mut ordered: Vec<&FileUnit> = files.iter().collect();
    ordered.sort_by(|a, b| {
        priority_score(b)
            .cmp(&priority_score(a))
            .then_with(|| a.path.cmp(&b.path))
    });

    for (index, file) in ordered.iter().enumerate() {
        // Chunked files send only the top-ranked chunk per call.
        let (body, file_chunks_omitted) = match file.chunks.first() {
            Some(first) => (first.text.as_str(), file.chunks.len() - 1),
            None => (file.content.as_str(), 0),
        };

        let mut section = format!(
            "\n\n// File: {} ({})\n{}",
            file.path,
            file.language.as_str(),
            body
        );
        if file_chunks_omitted > 0 {
            section.push_str(&format!(
                "\n[{} additional chunk(s) of {} omitted]",
                file_chunks_omitted, file.path
            ));
        }

        let cost = estimate_tokens(&section);
        if used + cost <= budget {
            text.push_str(&section);
            used += cost;
            files_included += 1;
            chunks_omitted += file_chunks_omitted;
            continue;
        }

        // Over budget: truncate this file into whatever room remains, or
        // stop with a sentinel naming how many files never made it.
        let remaining = budget.saturating_sub(used);
        if remaining >= MIN_TRUNCATION_TOKENS {
            let options = ChunkOptions {
                target_tokens: remaining,
                max_tokens: remaining,
                min_tokens: 1,
                overlap_tokens: 0,
            };
            let chunker = SemanticChunker::new(options);
            if let Some(head) = chunker.cursor(body, file.language).next() {
                let section = format!(
                    "\n\n// File: {} ({}) [truncated to fit the context budget]\n{}",
                    file.path,
                    file.language.as_str(),
                    head.text
                );
                text.push_str(&section);
                used += estimate_tokens(&section);
                files_included += 1;
                truncated = true;
            }
        }

        files_omitted = ordered.len() - index - if truncated { 1 } else { 0 };
        if files_omitted > 0 {
            text.push_str(&format!(
                "\n\n[{} file(s) omitted to fit the context budget]",
                files_omitted
            ));
        }
        break;
    }

    tracing::debug!(
        endpoint_name = %endpoint.name(),
        budget,
        used,
        files_included,
        files_omitted,
        "Prompt assembled"
    );

    AssembledPrompt {
        token_estimate: estimate_tokens(&text),
        text,
        files_included,
        files_omitted,
        chunks_omitted,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::structure::Language;
    use crate::config::EndpointConfig;
    use crate::endpoints::test_support::two_endpoint_config;
    use crate::endpoints::Endpoint;
    use std::time::Duration;

    fn endpoint(max_context: u32, max_response: u32) -> Endpoint {
        let config = two_endpoint_config();
        let descriptor = EndpointConfig {
            max_context_tokens: max_context,
            max_response_tokens: max_response,
            ..config.endpoints[0].clone()
        };
        Endpoint::from_config(&descriptor, &config.breaker).unwrap()
    }

    fn unit(path: &str, content: &str, bucket: ComplexityBucket) -> FileUnit {
        FileUnit {
            path: path.to_string(),
            size: content.len() as u64,
            language: Language::Rust,
            line_count: content.lines().count(),
            imports: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            complexity_bucket: bucket,
            content: content.to_string(),
            chunks: Vec::new(),
        }
    }

    fn request(prompt: &str) -> RouterRequest {
        RouterRequest::new(prompt, Duration::from_secs(60))
    }

    #[test]
    fn test_assembles_prompt_with_all_files_when_budget_allows() {
        let endpoint = endpoint(32_768, 4_096);
        let files = vec![
            unit("/w/a.rs", "fn a() {}\n", ComplexityBucket::Low),
            unit("/w/b.rs", "fn b() {}\n", ComplexityBucket::Low),
        ];

        let assembled = assemble(&request("Review this"), &endpoint, &files);
        assert_eq!(assembled.files_included, 2);
        assert_eq!(assembled.files_omitted, 0);
        assert!(assembled.text.contains("// File: /w/a.rs (rust)"));
        assert!(assembled.text.contains("// File: /w/b.rs (rust)"));
        assert!(assembled.text.starts_with("Review this"));
    }

    #[test]
    fn test_budget_formula_caps_total_tokens() {
        // 2048 context - 512 response - 512 margin = 1024 token budget.
        let endpoint = endpoint(2_048, 512);
        let big = "let x = 1;\n".repeat(1_000);
        let files = vec![unit("/w/big.rs", &big, ComplexityBucket::Medium)];

        let assembled = assemble(&request("q"), &endpoint, &files);
        assert!(
            assembled.token_estimate <= 1_024 + 64,
            "assembled {} tokens",
            assembled.token_estimate
        );
        assert!(assembled.truncated || assembled.files_omitted > 0);
    }

    #[test]
    fn test_high_complexity_source_files_come_first() {
        let endpoint = endpoint(32_768, 4_096);
        let files = vec![
            unit("/w/low.rs", "fn l() {}\n", ComplexityBucket::Low),
            unit("/w/high.rs", "fn h() {}\n", ComplexityBucket::High),
        ];

        let assembled = assemble(&request("q"), &endpoint, &files);
        let high_pos = assembled.text.find("/w/high.rs").unwrap();
        let low_pos = assembled.text.find("/w/low.rs").unwrap();
        assert!(high_pos < low_pos);
    }

    #[test]
    fn test_omitted_files_get_sentinel() {
        // Tiny budget: 1300 - 256 - 512 = 532 tokens.
        let endpoint = endpoint(1_300, 256);
        let chunk = "fn f() { let value = compute(); }\n".repeat(60); // ~510 tokens
        let files = vec![
            unit("/w/a.rs", &chunk, ComplexityBucket::High),
            unit("/w/b.rs", &chunk, ComplexityBucket::Low),
            unit("/w/c.rs", &chunk, ComplexityBucket::Low),
        ];

        let assembled = assemble(&request("q"), &endpoint, &files);
        assert!(assembled.files_included >= 1);
        assert!(assembled.files_omitted >= 1);
        assert!(assembled.text.contains("omitted to fit the context budget"));
    }

    #[test]
    fn test_chunked_file_sends_only_top_chunk() {
        let endpoint = endpoint(65_536, 4_096);
        let mut file = unit("/w/huge.js", "ignored", ComplexityBucket::High);
        file.language = Language::JavaScript;
        file.chunks = vec![
            crate::analysis::Chunk {
                source_path: Some("/w/huge.js".to_string()),
                order_index: 0,
                token_estimate: 100,
                text: "function first() {}\n".to_string(),
                cut_at_boundary: true,
                carry_over_tokens: 0,
            },
            crate::analysis::Chunk {
                source_path: Some("/w/huge.js".to_string()),
                order_index: 1,
                token_estimate: 100,
                text: "function second() {}\n".to_string(),
                cut_at_boundary: false,
                carry_over_tokens: 20,
            },
        ];

        let assembled = assemble(&request("q"), &endpoint, &[file]);
        assert!(assembled.text.contains("function first"));
        assert!(
            !assembled.text.contains("function second"),
            "only the top-ranked chunk is sent"
        );
        assert!(assembled.text.contains("1 additional chunk(s) of /w/huge.js omitted"));
        assert_eq!(assembled.chunks_omitted, 1);
    }

    #[test]
    fn test_no_files_passes_request_through() {
        let endpoint = endpoint(32_768, 4_096);
        let req = request("Just a question").with_context("with context");
        let assembled = assemble(&req, &endpoint, &[]);
        assert_eq!(assembled.text, "Just a question\nwith context");
        assert_eq!(assembled.files_included, 0);
    }
}
