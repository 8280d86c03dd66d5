//! Bounded file collection and reading
//!
//! Expands input paths (files or depth-limited directory walks) into an
//! allowlisted file set, then reads them with bounded concurrency and
//! per-file timeouts. Per-file failures are recorded, never fatal: partial
//! success is the normal mode for directory inputs.

use crate::analysis::path_safety::{BLOCKED_SEGMENTS, PathPolicy};
use crate::analysis::structure::Language;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use walkdir::WalkDir;

/// Hard limits; request options may lower but never raise them.
pub const MAX_FILES_CAP: usize = 50;
pub const CONCURRENCY_CAP: usize = 10;
const WALK_DEPTH_LIMIT: usize = 10;

/// One recorded per-file failure
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub path: String,
    pub message: String,
}

/// Collection limits for one analysis request
#[derive(Debug, Clone)]
pub struct ReadLimits {
    pub max_file_bytes: u64,
    pub max_files: usize,
    pub concurrency: usize,
    pub extra_extensions: Vec<String>,
    pub per_file_timeout: Duration,
}

impl ReadLimits {
    /// Clamp request-supplied values to the hard caps.
    pub fn clamped(mut self) -> Self {
        self.max_files = self.max_files.min(MAX_FILES_CAP);
        self.concurrency = self.concurrency.clamp(1, CONCURRENCY_CAP);
        self
    }
}

/// A successfully read file, before structure extraction.
#[derive(Debug)]
pub struct RawFile {
    pub path: PathBuf,
    pub size: u64,
    pub language: Language,
    pub content: String,
}

fn extension_allowed(path: &Path, extra: &[String]) -> Option<Language> {
    let ext = path.extension()?.to_str()?;
    Language::from_extension(ext).or_else(|| {
        extra
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
            .then_some(Language::Text)
    })
}

/// Translate a `*`/`?` glob into an anchored regex over the file name.
fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut regex = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).ok()
}

/// Expand inputs into concrete, allowlisted file paths.
///
/// Directories are walked depth-limited, yielding allowed files until
/// `max_files` is reached. If a resolved path does not exist, the original
/// form is retried once; this is the only sanctioned fallback.
pub fn collect_files(
    policy: &PathPolicy,
    inputs: &[String],
    pattern: Option<&str>,
    limits: &ReadLimits,
) -> (Vec<(PathBuf, Language)>, Vec<FileError>) {
    let mut files = Vec::new();
    let mut errors = Vec::new();
    let glob = pattern.and_then(compile_glob);

    let name_matches = |path: &Path| -> bool {
        match (&glob, path.file_name().and_then(|n| n.to_str())) {
            (Some(re), Some(name)) => re.is_match(name),
            (Some(_), None) => false,
            (None, _) => true,
        }
    };

    for input in inputs {
        if files.len() >= limits.max_files {
            break;
        }

        let resolved = match policy.resolve(input) {
            Ok(p) => p,
            Err(e) => {
                errors.push(FileError {
                    path: input.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        // One retry with the caller's original form when normalization
        // produced a path that is not actually on disk.
        let target = if resolved.exists() {
            resolved
        } else {
            let original = PathBuf::from(input);
            if original != resolved
                && original.exists()
                && policy.resolve(&original.display().to_string()).is_ok()
            {
                tracing::debug!(
                    input = %input,
                    resolved = %resolved.display(),
                    "Normalized path missing, falling back to original form"
                );
                original
            } else {
                errors.push(FileError {
                    path: resolved.display().to_string(),
                    message: "path does not exist".to_string(),
                });
                continue;
            }
        };

        if target.is_file() {
            match extension_allowed(&target, &limits.extra_extensions) {
                Some(language) if name_matches(&target) => files.push((target, language)),
                Some(_) => {}
                None => errors.push(FileError {
                    path: target.display().to_string(),
                    message: "extension is not in the allowlist".to_string(),
                }),
            }
            continue;
        }

        // Directory walk, depth-limited, skipping blocked segments.
        let walker = WalkDir::new(&target)
            .max_depth(WALK_DEPTH_LIMIT)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && BLOCKED_SEGMENTS.iter().any(|b| *b == name))
            });

        for entry in walker {
            if files.len() >= limits.max_files {
                break;
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    errors.push(FileError {
                        path: target.display().to_string(),
                        message: format!("walk error: {}", e),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if !name_matches(&path) {
                continue;
            }
            if let Some(language) = extension_allowed(&path, &limits.extra_extensions) {
                files.push((path, language));
            }
        }
    }

    (files, errors)
}

/// Read collected files with bounded concurrency and per-file timeouts.
pub async fn read_files(
    targets: Vec<(PathBuf, Language)>,
    limits: &ReadLimits,
) -> (Vec<RawFile>, Vec<FileError>) {
    let semaphore = Arc::new(Semaphore::new(limits.concurrency));
    let mut handles = Vec::with_capacity(targets.len());

    for (path, language) in targets {
        let semaphore = semaphore.clone();
        let max_bytes = limits.max_file_bytes;
        let timeout = limits.per_file_timeout;

        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("read semaphore is never closed");

            let read = tokio::time::timeout(timeout, async {
                let meta = tokio::fs::metadata(&path).await.map_err(|e| e.to_string())?;
                if meta.len() > max_bytes {
                    return Err(format!(
                        "file is {} bytes, over the {} byte limit",
                        meta.len(),
                        max_bytes
                    ));
                }
                let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
                let content = String::from_utf8_lossy(&bytes).into_owned();
                Ok::<(u64, String), String>((meta.len(), content))
            })
            .await;

            match read {
                Ok(Ok((size, content))) => Ok(RawFile {
                    path,
                    size,
                    language,
                    content,
                }),
                Ok(Err(message)) => Err(FileError {
                    path: path.display().to_string(),
                    message,
                }),
                Err(_) => Err(FileError {
                    path: path.display().to_string(),
                    message: format!("read timed out after {:?}", timeout),
                }),
            }
        }));
    }

    let mut files = Vec::new();
    let mut errors = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(file)) => files.push(file),
            Ok(Err(err)) => errors.push(err),
            Err(join_err) => errors.push(FileError {
                path: String::new(),
                message: format!("read task failed: {}", join_err),
            }),
        }
    }

    (files, errors)
}
