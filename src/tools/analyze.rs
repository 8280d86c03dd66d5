//! The `analyze_files` tool
//!
//! Runs the file pipeline and returns per-file structure metadata, an
//! optional project context, and — when a prompt is supplied — an
//! attached `query` reply whose prompt was assembled from those files.

use crate::analysis::{AnalysisOptions, FileError, FileUnit, ProjectContext};
use crate::handlers::AppState;
use crate::tools::query::{self, QueryArgs, QueryReply};
use crate::tools::ToolFailure;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// `paths` accepts either a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PathsArg {
    One(String),
    Many(Vec<String>),
}

impl PathsArg {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

/// Arguments for `analyze_files`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeArgs {
    pub paths: PathsArg,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub include_project_context: bool,
    /// When present, the analyzed files are assembled into a prompt and
    /// routed as a query; the reply is attached.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Per-file metadata returned to the caller (content stays server-side).
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: String,
    pub size: u64,
    pub language: &'static str,
    pub line_count: usize,
    pub imports: Vec<String>,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub complexity_bucket: &'static str,
    pub token_estimate: usize,
    pub chunk_count: usize,
}

impl From<&FileUnit> for FileReport {
    fn from(unit: &FileUnit) -> Self {
        Self {
            path: unit.path.clone(),
            size: unit.size,
            language: unit.language.as_str(),
            line_count: unit.line_count,
            imports: unit.imports.clone(),
            functions: unit.functions.clone(),
            classes: unit.classes.clone(),
            complexity_bucket: unit.complexity_bucket.as_str(),
            token_estimate: unit.token_estimate(),
            chunk_count: unit.chunks.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalysisReply {
    pub files: Vec<FileReport>,
    pub errors: Vec<FileError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_context: Option<ProjectContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryReply>,
}

pub async fn run(
    state: &AppState,
    args: AnalyzeArgs,
    cancel: &CancellationToken,
) -> Result<AnalysisReply, ToolFailure> {
    let paths = args.paths.into_vec();
    let options = AnalysisOptions {
        max_files: args.max_files,
        pattern: args.pattern.clone(),
        include_project_context: args.include_project_context,
        time_remaining: None,
    };

    let report = state
        .analyzer()
        .analyze(&paths, &options)
        .await
        .map_err(ToolFailure::from)?;

    let files: Vec<FileReport> = report.files.iter().map(FileReport::from).collect();

    let query = match args.prompt {
        Some(prompt) if !prompt.trim().is_empty() => {
            let reply = query::run(
                state,
                QueryArgs {
                    prompt,
                    context: None,
                    task_hint: None,
                    force_endpoint: None,
                    max_tokens: None,
                    file_inputs: Some(paths),
                },
                cancel,
            )
            .await?;
            Some(reply)
        }
        _ => None,
    };

    Ok(AnalysisReply {
        files,
        errors: report.errors,
        project_context: report.project_context,
        query,
    })
}
