//! The `diagnose_file_access` tool
//!
//! Runs every path safety and filesystem check independently for one
//! input path and reports each outcome, so operators can see exactly
//! which gate a rejected path failed.

use crate::analysis::PathDiagnosis;
use crate::handlers::AppState;
use serde::Deserialize;

/// Arguments for `diagnose_file_access`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnoseArgs {
    pub path: String,
}

pub fn run(state: &AppState, args: &DiagnoseArgs) -> PathDiagnosis {
    state.analyzer().diagnose_file_access(&args.path)
}
