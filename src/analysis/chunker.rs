//! Semantic chunking of oversized content
//!
//! Splits large text into token-bounded chunks at language-aware
//! boundaries, carrying an overlap prefix from each chunk into the next so
//! cross-chunk references stay resolvable. The cursor is lazy: prompt
//! assembly can pull the first chunk without the rest being realized.

use crate::analysis::structure::Language;
use crate::request::estimate_tokens;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Chunking options
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            target_tokens: 6_000,
            max_tokens: 8_000,
            min_tokens: 500,
            overlap_tokens: 200,
        }
    }
}

/// How many lines around the target cut-point are searched for a boundary.
const BOUNDARY_WINDOW: usize = 10;

/// A bounded slice of content
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub source_path: Option<String>,
    pub order_index: usize,
    pub token_estimate: usize,
    pub text: String,
    pub cut_at_boundary: bool,
    /// Estimated tokens of the prefix shared with the previous chunk.
    pub carry_over_tokens: usize,
}

/// Language-aware chunker
#[derive(Debug, Clone)]
pub struct SemanticChunker {
    options: ChunkOptions,
}

impl SemanticChunker {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Chunk the whole input eagerly.
    pub fn chunk(&self, text: &str, language: Language) -> Vec<Chunk> {
        self.cursor(text, language).collect()
    }

    /// Lazy chunk cursor; each `next()` realizes one chunk.
    pub fn cursor<'a>(&self, text: &'a str, language: Language) -> ChunkCursor<'a> {
        let lines: Vec<&'a str> = if text.is_empty() {
            Vec::new()
        } else {
            text.split_inclusive('\n').collect()
        };

        // Prefix sums over per-line token estimates make span costs O(1).
        let mut sums = Vec::with_capacity(lines.len() + 1);
        sums.push(0usize);
        for line in &lines {
            sums.push(sums.last().unwrap() + estimate_tokens(line));
        }

        ChunkCursor {
            text,
            lines,
            sums,
            pos: 0,
            order: 0,
            overlap_text: String::new(),
            options: self.options,
            boundaries: boundaries_for(language),
            done: false,
        }
    }
}

/// Lazy pull of chunks
pub struct ChunkCursor<'a> {
    text: &'a str,
    lines: Vec<&'a str>,
    /// `sums[i]` = estimated tokens of `lines[..i]`
    sums: Vec<usize>,
    pos: usize,
    order: usize,
    overlap_text: String,
    options: ChunkOptions,
    boundaries: &'static BoundaryPatterns,
    done: bool,
}

impl ChunkCursor<'_> {
    fn span_tokens(&self, start: usize, end: usize) -> usize {
        self.sums[end] - self.sums[start]
    }

    /// True when cutting before `lines[at]` lands on a semantic boundary:
    /// the previous line closes a block, or `lines[at]` opens one.
    fn is_boundary(&self, at: usize) -> bool {
        if at == 0 || at >= self.lines.len() {
            return false;
        }
        self.boundaries.block_end.is_match(self.lines[at - 1])
            || self.boundaries.block_start.is_match(self.lines[at])
    }

    fn cut_after_blank(&self, at: usize) -> bool {
        at > 0 && self.lines[at - 1].trim().is_empty()
    }

    /// Pick the cut line for the next chunk body starting at `self.pos`,
    /// given a body budget. Prefers a semantic boundary within
    /// `BOUNDARY_WINDOW` lines of the target cut, breaking ties toward the
    /// target token count and then toward cuts after a blank line.
    fn choose_cut(&self, body_target: usize, budget: usize) -> usize {
        let n = self.lines.len();

        let mut target_line = self.pos + 1;
        while target_line < n && self.span_tokens(self.pos, target_line) < body_target {
            target_line += 1;
        }

        // Hard ceiling: the largest end that still fits the budget.
        let mut max_end = self.pos + 1;
        while max_end < n && self.span_tokens(self.pos, max_end + 1) <= budget {
            max_end += 1;
        }

        let lo = target_line.saturating_sub(BOUNDARY_WINDOW).max(self.pos + 1);
        let hi = (target_line + BOUNDARY_WINDOW).min(max_end);

        let mut best: Option<(usize, usize, bool)> = None;
        for candidate in lo..=hi {
            if !self.is_boundary(candidate) {
                continue;
            }
            let dist = self.span_tokens(self.pos, candidate).abs_diff(body_target);
            let blank = self.cut_after_blank(candidate);
            let better = match best {
                None => true,
                Some((_, best_dist, best_blank)) => {
                    dist < best_dist || (dist == best_dist && blank && !best_blank)
                }
            };
            if better {
                best = Some((candidate, dist, blank));
            }
        }

        best.map(|(c, _, _)| c).unwrap_or(max_end.min(target_line))
    }
}

impl Iterator for ChunkCursor<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let n = self.lines.len();
        let total = self.sums[n];

        // Whole input fits: one chunk, verbatim.
        if self.order == 0 && total <= self.options.max_tokens {
            self.done = true;
            return Some(Chunk {
                source_path: None,
                order_index: 0,
                token_estimate: estimate_tokens(self.text),
                text: self.text.to_string(),
                cut_at_boundary: false,
                carry_over_tokens: 0,
            });
        }

        let overlap_est = estimate_tokens(&self.overlap_text);
        let budget = self.options.max_tokens.saturating_sub(overlap_est).max(1);
        let remaining = self.span_tokens(self.pos, n);
        let body_target = self.options.target_tokens.min(budget);

        // Terminal rule: when the remainder fits the budget and cutting at
        // target would leave a sub-minimum tail, emit everything left as
        // one (merged) final chunk. A remainder that cannot fit keeps
        // being cut; a sub-minimum tail that cannot merge is emitted
        // as-is on the next pull.
        let mut end = if remaining <= budget
            && remaining < body_target + self.options.min_tokens
        {
            n
        } else {
            self.choose_cut(body_target, budget)
        };

        // Boundary drift can still leave a sub-minimum tail; absorb it
        // when the whole remainder fits under max.
        if end < n {
            let tail = self.span_tokens(end, n);
            if tail < self.options.min_tokens && remaining <= budget {
                end = n;
            }
        }

        let cut_at_boundary = end < n && self.is_boundary(end);

        let body: String = self.lines[self.pos..end].concat();
        let text = format!("{}{}", self.overlap_text, body);
        let carry_over_tokens = overlap_est;

        // Overlap for the next chunk: trailing body lines totalling at
        // least overlap_tokens.
        let mut overlap_start = end;
        while overlap_start > self.pos
            && self.span_tokens(overlap_start, end) < self.options.overlap_tokens
        {
            overlap_start -= 1;
        }
        self.overlap_text = self.lines[overlap_start..end].concat();

        let chunk = Chunk {
            source_path: None,
            order_index: self.order,
            token_estimate: estimate_tokens(&text),
            text,
            cut_at_boundary,
            carry_over_tokens,
        };

        self.order += 1;
        self.pos = end;
        if self.pos >= n {
            self.done = true;
        }

        Some(chunk)
    }
}

struct BoundaryPatterns {
    block_start: Regex,
    block_end: Regex,
}

fn boundaries_for(language: Language) -> &'static BoundaryPatterns {
    const BLOCK_END: &str = r"^\s*[}\])]+[;,]?\s*$";

    static RUST: LazyLock<BoundaryPatterns> = LazyLock::new(|| BoundaryPatterns {
        block_start: re(
            r"^\s*(pub\s|fn\s|impl[\s<]|struct\s|enum\s|trait\s|mod\s|use\s|macro_rules!|///|//!|//|#\[)",
        ),
        block_end: re(BLOCK_END),
    });
    static JS: LazyLock<BoundaryPatterns> = LazyLock::new(|| BoundaryPatterns {
        block_start: re(
            r"^\s*(function\s|class\s|export\s|import\s|const\s|let\s|var\s|async\s+function|//|/\*)",
        ),
        block_end: re(BLOCK_END),
    });
    static PYTHON: LazyLock<BoundaryPatterns> = LazyLock::new(|| BoundaryPatterns {
        block_start: re(r"^(def\s|class\s|import\s|from\s|@|#|async\s+def\s)"),
        block_end: re(r"^\s*(return|pass|raise)\b"),
    });
    static GO: LazyLock<BoundaryPatterns> = LazyLock::new(|| BoundaryPatterns {
        block_start: re(r"^(func\s|type\s|import\s|var\s|const\s|//)"),
        block_end: re(BLOCK_END),
    });
    static GENERIC: LazyLock<BoundaryPatterns> = LazyLock::new(|| BoundaryPatterns {
        block_start: re(r"^\S"),
        block_end: re(BLOCK_END),
    });

    match language {
        Language::Rust => &RUST,
        Language::JavaScript | Language::TypeScript => &JS,
        Language::Python => &PYTHON,
        Language::Go => &GO,
        _ => &GENERIC,
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("boundary pattern must compile")
}
