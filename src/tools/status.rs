//! The `status` tool
//!
//! One synchronous snapshot: endpoint health and breaker states, rolling
//! request counters, cache statistics, and the empirical table's busiest
//! fingerprints.

use crate::cache::CacheStatsSnapshot;
use crate::endpoints::EndpointSnapshot;
use crate::endpoints::executor::LogCounters;
use crate::handlers::AppState;
use crate::learner::PatternSummary;
use serde::Serialize;

/// How many top fingerprints the status report carries.
const TOP_PATTERNS: usize = 10;

#[derive(Debug, Serialize)]
pub struct EmpiricalStatus {
    pub table_size: usize,
    pub top_patterns: Vec<PatternSummary>,
}

#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub uptime_seconds: u64,
    pub endpoints: Vec<EndpointSnapshot>,
    pub requests: LogCounters,
    pub cache: CacheStatsSnapshot,
    pub empirical: EmpiricalStatus,
}

pub fn run(state: &AppState) -> StatusReply {
    StatusReply {
        uptime_seconds: state.uptime().as_secs(),
        endpoints: state.registry().snapshots(),
        requests: state.execution_log().counters(),
        cache: state.cache().stats(),
        empirical: EmpiricalStatus {
            table_size: state.learner().len(),
            top_patterns: state.learner().top_patterns(TOP_PATTERNS),
        },
    }
}
