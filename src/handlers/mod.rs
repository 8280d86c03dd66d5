//! HTTP handlers and shared application state
//!
//! `AppState` wires the whole core together: registry, router, cache,
//! learner, executor, analyzer, metrics, and the execution log. Every
//! field is cheaply cloneable (`Arc`) because Axum clones state per
//! request and handlers run concurrently.

use crate::analysis::{Analyzer, ChunkOptions};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::endpoints::{ChatClient, EndpointRegistry, ExecutionLog, Executor};
use crate::error::RouteResult;
use crate::learner::EmpiricalLearner;
use crate::metrics::Metrics;
use crate::middleware::request_id::{RequestId, request_id_middleware};
use crate::router::SmartRouter;
use crate::tools::{self, Tool, ToolFailure, ToolReply};
use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Rolling execution-record capacity.
const EXECUTION_LOG_CAPACITY: usize = 1_024;

/// Bound on the empirical table.
const EMPIRICAL_TABLE_CAP: usize = 10_000;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: EndpointRegistry,
    router: Arc<SmartRouter>,
    cache: Arc<ResponseCache>,
    learner: Arc<EmpiricalLearner>,
    executor: Arc<Executor>,
    analyzer: Arc<Analyzer>,
    metrics: Arc<Metrics>,
    execution_log: Arc<ExecutionLog>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl AppState {
    /// Wire up the core from configuration. Loads the empirical snapshot
    /// when one is configured and present.
    pub fn new(config: Arc<Config>, shutdown: CancellationToken) -> RouteResult<Self> {
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| crate::error::RouteError::Config(format!(
                    "failed to initialize metrics: {}",
                    e
                )))?,
        );

        let registry = EndpointRegistry::from_config_with_metrics(&config, metrics.clone())?;

        let learner = Arc::new(EmpiricalLearner::new(EMPIRICAL_TABLE_CAP));
        if let Some(path) = &config.routing.snapshot_path {
            learner.load_from(path);
        }

        let execution_log = Arc::new(ExecutionLog::new(EXECUTION_LOG_CAPACITY));
        let executor = Arc::new(Executor::new(
            ChatClient::new()?,
            learner.clone(),
            execution_log.clone(),
            metrics.clone(),
            config.retry.clone(),
        ));

        let router = Arc::new(SmartRouter::new(
            registry.clone(),
            learner.clone(),
            config.routing.clone(),
        ));

        let cache = Arc::new(ResponseCache::new_with_metrics(
            config.cache_ttl(),
            config.cache.max_bytes,
            config.cache.max_entries,
            metrics.clone(),
        ));

        let analyzer = Arc::new(Analyzer::new(
            config.files.clone(),
            ChunkOptions::default(),
        ));

        Ok(Self {
            config,
            registry,
            router,
            cache,
            learner,
            executor,
            analyzer,
            metrics,
            execution_log,
            shutdown,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn router(&self) -> &SmartRouter {
        &self.router
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn learner(&self) -> &EmpiricalLearner {
        &self.learner
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn execution_log(&self) -> &ExecutionLog {
        &self.execution_log
    }

    /// The root cancellation token; child tokens derive request deadlines.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Per-request cancellation: a child of the shutdown token that also
    /// fires when the request's own deadline elapses.
    pub fn request_token(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        let timed = token.clone();
        let max = self.config.max_request_duration();
        tokio::spawn(async move {
            tokio::time::sleep(max).await;
            timed.cancel();
        });
        token
    }
}

/// Build the Axum application.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/tools/query", post(tool_query))
        .route("/tools/analyze_files", post(tool_analyze))
        .route("/tools/status", get(tool_status))
        .route("/tools/compare", post(tool_compare))
        .route("/tools/diagnose_file_access", post(tool_diagnose))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.uptime().as_secs(),
        "endpoints": state.registry().len(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics().gather() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

async fn run_tool(
    state: AppState,
    request_id: RequestId,
    tool: Tool,
) -> Result<Json<ToolReply>, ToolFailure> {
    let cancel = state.request_token();
    tracing::debug!(request_id = %request_id, "Dispatching tool");
    let reply = tools::dispatch(&state, tool, &cancel).await?;
    Ok(Json(reply))
}

async fn tool_query(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(args): Json<tools::QueryArgs>,
) -> Result<Json<ToolReply>, ToolFailure> {
    run_tool(state, request_id, Tool::Query(args)).await
}

async fn tool_analyze(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(args): Json<tools::AnalyzeArgs>,
) -> Result<Json<ToolReply>, ToolFailure> {
    run_tool(state, request_id, Tool::AnalyzeFiles(args)).await
}

async fn tool_status(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<ToolReply>, ToolFailure> {
    run_tool(state, request_id, Tool::Status).await
}

async fn tool_compare(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(args): Json<tools::CompareArgs>,
) -> Result<Json<ToolReply>, ToolFailure> {
    run_tool(state, request_id, Tool::Compare(args)).await
}

async fn tool_diagnose(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(args): Json<tools::DiagnoseArgs>,
) -> Result<Json<ToolReply>, ToolFailure> {
    run_tool(state, request_id, Tool::DiagnoseFileAccess(args)).await
}
