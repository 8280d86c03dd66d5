//! The `compare` tool
//!
//! Analyzes two files, reports size/structure deltas and a line-level
//! similarity score, and optionally attaches a model comparison routed
//! through the normal query path.

use crate::analysis::AnalysisOptions;
use crate::error::RouteError;
use crate::handlers::AppState;
use crate::tools::analyze::FileReport;
use crate::tools::query::{self, QueryArgs, QueryReply};
use crate::tools::ToolFailure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

/// Arguments for `compare`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareArgs {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub include_model_analysis: bool,
}

#[derive(Debug, Serialize)]
pub struct CompareReply {
    pub left: FileReport,
    pub right: FileReport,
    pub size_delta_bytes: i64,
    pub line_delta: i64,
    pub common_functions: Vec<String>,
    pub common_imports: Vec<String>,
    /// Jaccard similarity over trimmed, non-empty lines, in [0, 1].
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_analysis: Option<QueryReply>,
}

/// Jaccard similarity over the sets of trimmed non-empty lines.
fn line_similarity(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let set_b: BTreeSet<&str> = b.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn common(a: &[String], b: &[String]) -> Vec<String> {
    let set_b: BTreeSet<&String> = b.iter().collect();
    let mut out: Vec<String> = a.iter().filter(|x| set_b.contains(x)).cloned().collect();
    out.sort();
    out
}

pub async fn run(
    state: &AppState,
    args: CompareArgs,
    cancel: &CancellationToken,
) -> Result<CompareReply, ToolFailure> {
    let options = AnalysisOptions::default();

    let report = state
        .analyzer()
        .analyze(&[args.left.clone(), args.right.clone()], &options)
        .await
        .map_err(ToolFailure::from)?;

    if report.files.len() != 2 {
        let detail = report
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ToolFailure::from(RouteError::InvalidRequest(format!(
            "compare needs two readable files, got {} ({})",
            report.files.len(),
            detail
        ))));
    }

    // analyze() sorts by path; restore the caller's left/right order.
    let resolved_left = state
        .analyzer()
        .policy()
        .resolve(&args.left)
        .map_err(ToolFailure::from)?;
    let (left, right) = if report.files[0].path == resolved_left.display().to_string() {
        (&report.files[0], &report.files[1])
    } else {
        (&report.files[1], &report.files[0])
    };

    let model_analysis = if args.include_model_analysis {
        let reply = query::run(
            state,
            QueryArgs {
                prompt: format!(
                    "Compare these two files. Describe the structural differences \
                     and which is better organized: {} vs {}",
                    left.path, right.path
                ),
                context: None,
                task_hint: None,
                force_endpoint: None,
                max_tokens: None,
                file_inputs: Some(vec![args.left.clone(), args.right.clone()]),
            },
            cancel,
        )
        .await?;
        Some(reply)
    } else {
        None
    };

    Ok(CompareReply {
        size_delta_bytes: left.size as i64 - right.size as i64,
        line_delta: left.line_count as i64 - right.line_count as i64,
        common_functions: common(&left.functions, &right.functions),
        common_imports: common(&left.imports, &right.imports),
        similarity: line_similarity(&left.content, &right.content),
        left: FileReport::from(left),
        right: FileReport::from(right),
        model_analysis,
    })
}
