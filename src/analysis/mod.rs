//! File analysis pipeline
//!
//! Safe path resolution, bounded concurrent reads, structure extraction,
//! and semantic chunking of oversized inputs, orchestrated behind a single
//! `analyze` entry point.

pub mod chunker;
pub mod path_safety;
pub mod prompt;
pub mod reader;
pub mod structure;

pub use chunker::{Chunk, ChunkOptions, SemanticChunker};
pub use path_safety::{PathDiagnosis, PathPolicy, SafetyCheck};
pub use reader::{FileError, RawFile, ReadLimits};
pub use structure::{ComplexityBucket, Language, StructureSummary};

use crate::config::FilesConfig;
use crate::error::RouteResult;
use crate::request::estimate_tokens;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default per-file read timeout when the request carries no deadline
/// pressure of its own.
const DEFAULT_FILE_TIMEOUT: Duration = Duration::from_secs(5);

/// One analyzed source file
#[derive(Debug, Clone, Serialize)]
pub struct FileUnit {
    pub path: String,
    pub size: u64,
    pub language: Language,
    pub line_count: usize,
    pub imports: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub complexity_bucket: ComplexityBucket,
    pub content: String,
    /// Populated only when the content exceeds the chunker's max.
    pub chunks: Vec<Chunk>,
}

impl FileUnit {
    pub fn token_estimate(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Cross-file context computed when at least two files were analyzed.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectContext {
    pub languages: BTreeSet<String>,
    pub directories: BTreeSet<String>,
    pub file_type_counts: BTreeMap<String, usize>,
    pub import_roots: BTreeSet<String>,
    pub frameworks: BTreeSet<String>,
}

/// Result of `analyze`
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub files: Vec<FileUnit>,
    pub errors: Vec<FileError>,
    pub project_context: Option<ProjectContext>,
}

/// Per-request analysis options; values are clamped to the configured caps.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub max_files: Option<usize>,
    pub pattern: Option<String>,
    pub include_project_context: bool,
    /// Remaining request time; caps the per-file timeout.
    pub time_remaining: Option<Duration>,
}

/// Known framework tags keyed by import substrings.
const FRAMEWORK_TAGS: &[(&str, &str)] = &[
    ("react", "react"),
    ("next", "nextjs"),
    ("vue", "vue"),
    ("django", "django"),
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("express", "express"),
    ("axum", "axum"),
    ("actix", "actix"),
    ("tokio", "tokio"),
    ("spring", "spring"),
    ("rails", "rails"),
];

/// The file analysis pipeline
#[derive(Debug, Clone)]
pub struct Analyzer {
    policy: PathPolicy,
    config: FilesConfig,
    chunk_options: ChunkOptions,
}

impl Analyzer {
    pub fn new(config: FilesConfig, chunk_options: ChunkOptions) -> Self {
        Self {
            policy: PathPolicy::new(config.workspace_root.clone()),
            config,
            chunk_options,
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    fn limits(&self, options: &AnalysisOptions) -> ReadLimits {
        let per_file_timeout = options
            .time_remaining
            .map(|remaining| remaining.min(DEFAULT_FILE_TIMEOUT))
            .unwrap_or(DEFAULT_FILE_TIMEOUT);

        ReadLimits {
            max_file_bytes: self.config.max_file_bytes,
            max_files: options.max_files.unwrap_or(self.config.max_files),
            concurrency: self.config.concurrency,
            extra_extensions: self.config.allowed_extensions.clone(),
            per_file_timeout,
        }
        .clamped()
    }

    /// Analyze the given paths: resolve, read, extract, chunk.
    ///
    /// Per-file failures land in `errors`; the batch never aborts on one
    /// bad file.
    pub async fn analyze(
        &self,
        inputs: &[String],
        options: &AnalysisOptions,
    ) -> RouteResult<AnalysisReport> {
        let limits = self.limits(options);

        // Directory walks are blocking filesystem work; keep them off the
        // async reactor.
        let (targets, mut errors) = {
            let policy = self.policy.clone();
            let inputs = inputs.to_vec();
            let pattern = options.pattern.clone();
            let limits = limits.clone();
            match tokio::task::spawn_blocking(move || {
                reader::collect_files(&policy, &inputs, pattern.as_deref(), &limits)
            })
            .await
            {
                Ok(collected) => collected,
                Err(e) => (
                    Vec::new(),
                    vec![FileError {
                        path: String::new(),
                        message: format!("file collection task failed: {}", e),
                    }],
                ),
            }
        };

        tracing::debug!(
            inputs = inputs.len(),
            collected = targets.len(),
            rejected = errors.len(),
            "Collected analysis targets"
        );

        let (raw_files, read_errors) = reader::read_files(targets, &limits).await;
        errors.extend(read_errors);

        let chunker = SemanticChunker::new(self.chunk_options);
        let mut files: Vec<FileUnit> = raw_files
            .into_iter()
            .map(|raw| {
                let summary = structure::extract(&raw.content, raw.language);
                let path = raw.path.display().to_string();

                let chunks = if estimate_tokens(&raw.content) > self.chunk_options.max_tokens {
                    let mut chunks = chunker.chunk(&raw.content, raw.language);
                    for chunk in &mut chunks {
                        chunk.source_path = Some(path.clone());
                    }
                    chunks
                } else {
                    Vec::new()
                };

                FileUnit {
                    path,
                    size: raw.size,
                    language: raw.language,
                    line_count: summary.line_count,
                    imports: summary.imports,
                    functions: summary.functions,
                    classes: summary.classes,
                    complexity_bucket: summary.complexity_bucket,
                    content: raw.content,
                    chunks,
                }
            })
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));

        let project_context = (options.include_project_context && files.len() >= 2)
            .then(|| build_project_context(&files));

        Ok(AnalysisReport {
            files,
            errors,
            project_context,
        })
    }

    /// Structured safety report for one path, including filesystem checks.
    pub fn diagnose_file_access(&self, input: &str) -> PathDiagnosis {
        let mut diagnosis = self.policy.diagnose(input);

        if let Some(resolved) = diagnosis.resolved.clone() {
            let path = std::path::Path::new(&resolved);

            let allowed = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| {
                    Language::from_extension(ext).is_some()
                        || self
                            .config
                            .allowed_extensions
                            .iter()
                            .any(|a| a.eq_ignore_ascii_case(ext))
                })
                .unwrap_or(false);
            diagnosis.checks.push(SafetyCheck {
                name: "extension_allowed",
                passed: allowed,
                detail: match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) => format!("extension '{}'", ext),
                    None => "no extension".to_string(),
                },
            });

            match std::fs::metadata(path) {
                Ok(meta) => {
                    diagnosis.checks.push(SafetyCheck {
                        name: "exists",
                        passed: true,
                        detail: if meta.is_dir() {
                            "directory".to_string()
                        } else {
                            format!("file, {} bytes", meta.len())
                        },
                    });
                    if meta.is_file() {
                        diagnosis.checks.push(SafetyCheck {
                            name: "size_within_limit",
                            passed: meta.len() <= self.config.max_file_bytes,
                            detail: format!(
                                "{} of {} bytes allowed",
                                meta.len(),
                                self.config.max_file_bytes
                            ),
                        });
                    }
                }
                Err(e) => diagnosis.checks.push(SafetyCheck {
                    name: "exists",
                    passed: false,
                    detail: e.to_string(),
                }),
            }
        }

        diagnosis
    }
}

fn build_project_context(files: &[FileUnit]) -> ProjectContext {
    let mut languages = BTreeSet::new();
    let mut directories = BTreeSet::new();
    let mut file_type_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut import_roots = BTreeSet::new();
    let mut frameworks = BTreeSet::new();

    for file in files {
        languages.insert(file.language.as_str().to_string());

        let path = std::path::Path::new(&file.path);
        if let Some(parent) = path.parent() {
            directories.insert(parent.display().to_string());
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            *file_type_counts.entry(ext.to_lowercase()).or_default() += 1;
        }

        for import in &file.imports {
            let root = import
                .split(&[':', '.', '/', ' '][..])
                .next()
                .unwrap_or(import)
                .trim()
                .to_string();
            if !root.is_empty() {
                import_roots.insert(root);
            }

            let lowered = import.to_lowercase();
            for (needle, tag) in FRAMEWORK_TAGS {
                if lowered.contains(needle) {
                    frameworks.insert(tag.to_string());
                }
            }
        }
    }

    ProjectContext {
        languages,
        directories,
        file_type_counts,
        import_roots,
        frameworks,
    }
}
