//! The tool surface
//!
//! Every operation the service offers is one variant of the [`Tool`] sum
//! type with a per-variant handler; dispatch is a single match, no runtime
//! method lookup. The HTTP layer only parses arguments and hands the
//! variant here.

pub mod analyze;
pub mod compare;
pub mod diagnose;
pub mod query;
pub mod status;

pub use analyze::{AnalysisReply, AnalyzeArgs, FileReport};
pub use compare::{CompareArgs, CompareReply};
pub use diagnose::DiagnoseArgs;
pub use query::{QueryArgs, QueryMetadata, QueryReply};
pub use status::StatusReply;

use crate::analysis::PathDiagnosis;
use crate::error::RouteError;
use crate::handlers::AppState;
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// The closed set of operations.
#[derive(Debug)]
pub enum Tool {
    Query(QueryArgs),
    AnalyzeFiles(AnalyzeArgs),
    Status,
    Compare(CompareArgs),
    DiagnoseFileAccess(DiagnoseArgs),
}

/// One reply per tool variant.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ToolReply {
    Query(QueryReply),
    Analysis(AnalysisReply),
    Status(StatusReply),
    Compare(CompareReply),
    Diagnosis(PathDiagnosis),
}

/// A failed tool invocation: the error kind and message, the endpoints
/// that were attempted, and a routing hint when the empirical table has
/// evidence to offer one.
#[derive(Debug)]
pub struct ToolFailure {
    pub error: RouteError,
    pub endpoints_attempted: Vec<String>,
    pub hint: Option<String>,
}

impl From<RouteError> for ToolFailure {
    fn from(error: RouteError) -> Self {
        Self {
            error,
            endpoints_attempted: Vec::new(),
            hint: None,
        }
    }
}

impl IntoResponse for ToolFailure {
    fn into_response(self) -> Response {
        let status = self.error.http_status();
        let body = Json(serde_json::json!({
            "error": self.error.to_string(),
            "kind": self.error.kind(),
            "endpoints_attempted": self.endpoints_attempted,
            "hint": self.hint,
        }));
        (status, body).into_response()
    }
}

/// Run one tool invocation.
pub async fn dispatch(
    state: &AppState,
    tool: Tool,
    cancel: &CancellationToken,
) -> Result<ToolReply, ToolFailure> {
    match tool {
        Tool::Query(args) => query::run(state, args, cancel).await.map(ToolReply::Query),
        Tool::AnalyzeFiles(args) => analyze::run(state, args, cancel)
            .await
            .map(ToolReply::Analysis),
        Tool::Status => Ok(ToolReply::Status(status::run(state))),
        Tool::Compare(args) => compare::run(state, args, cancel)
            .await
            .map(ToolReply::Compare),
        Tool::DiagnoseFileAccess(args) => Ok(ToolReply::Diagnosis(diagnose::run(state, &args))),
    }
}
