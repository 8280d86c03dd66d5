//! The `query` tool
//!
//! Fingerprint, cache check, classify, route, assemble, execute. The
//! cache is single-flight on the fingerprint hash, so identical
//! concurrent queries share one upstream call.

use crate::analysis::{AnalysisOptions, prompt};
use crate::cache::{CacheOutcome, CachedQuery};
use crate::classify::{Classification, classify};
use crate::endpoints::Attempt;
use crate::error::RouteResult;
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::handlers::AppState;
use crate::request::{RouterRequest, TaskHint};
use crate::router::RoutingMethod;
use crate::tools::ToolFailure;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Arguments for `query`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    pub prompt: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub task_hint: Option<TaskHint>,
    #[serde(default)]
    pub force_endpoint: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub file_inputs: Option<Vec<String>>,
}

/// Structured routing metadata returned with every query-bearing reply.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecisionMeta {
    pub endpoint_used: String,
    pub reason_code: String,
    pub confidence_percent: u8,
    pub method: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmpiricalMeta {
    pub fingerprint_hash: String,
    pub historical_success_rate: Option<f64>,
    pub sample_count: u64,
    pub demoted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMeta {
    pub total_ms: u64,
    pub endpoint_ms: u64,
    pub routing_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationMeta {
    pub intent: &'static str,
    pub score_percent: u8,
    pub complexity_percent: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata {
    pub routing_decision: RoutingDecisionMeta,
    pub empirical_routing: EmpiricalMeta,
    pub performance: PerformanceMeta,
    pub classification: ClassificationMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
    pub cache: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReply {
    pub response: String,
    pub metadata: QueryMetadata,
}

/// What the single-flight leader observed while producing the result.
/// Coalesced waiters and cache hits have no execution of their own.
#[derive(Debug, Clone)]
struct LeaderMeta {
    method: RoutingMethod,
    reason: String,
    confidence_percent: u8,
    demoted: bool,
    attempts: Vec<Attempt>,
    routing_ms: u64,
    endpoint_ms: u64,
}

pub async fn run(
    state: &AppState,
    args: QueryArgs,
    cancel: &CancellationToken,
) -> Result<QueryReply, ToolFailure> {
    let total_start = Instant::now();

    let mut request = RouterRequest::new(args.prompt, state.config().max_request_duration());
    if let Some(context) = args.context {
        request = request.with_context(context);
    }
    request.task_hint = args.task_hint.unwrap_or_default();
    request.force_endpoint = args.force_endpoint;
    request.max_tokens_override = args.max_tokens;
    request.file_inputs = args.file_inputs.unwrap_or_default();
    request.validate().map_err(ToolFailure::from)?;

    let fp = fingerprint(&request);
    let cls = classify(&request);

    let leader_meta: Arc<Mutex<Option<LeaderMeta>>> = Arc::new(Mutex::new(None));

    let (result, cache_outcome) = state
        .cache()
        .get_or_compute(&fp.hash, || {
            let slot = leader_meta.clone();
            let request = &request;
            let fp = &fp;
            let cls = &cls;
            async move { produce(state, request, fp, cls, slot, cancel).await }
        })
        .await;

    let value = match result {
        Ok(value) => value,
        Err(error) => {
            let attempts = leader_meta
                .lock()
                .expect("metadata mutex is never poisoned")
                .take()
                .map(|m| m.attempts)
                .unwrap_or_default();
            let mut attempted: Vec<String> =
                attempts.into_iter().map(|a| a.endpoint).collect();
            attempted.dedup();

            let hint = state
                .learner()
                .suggest(&fp.hash, state.config().routing.empirical_min_samples)
                .map(|name| {
                    format!("consider routing this category of query to '{}'", name)
                });

            return Err(ToolFailure {
                error,
                endpoints_attempted: attempted,
                hint,
            });
        }
    };

    let leader = leader_meta
        .lock()
        .expect("metadata mutex is never poisoned")
        .take();

    let cache_label = match cache_outcome {
        CacheOutcome::Hit => "hit",
        CacheOutcome::MissLeader => "miss",
        CacheOutcome::Coalesced => "coalesced",
    };

    let (routing_decision, attempts, routing_ms, endpoint_ms, demoted) = match leader {
        Some(meta) => (
            RoutingDecisionMeta {
                endpoint_used: value.endpoint_used.clone(),
                reason_code: meta.reason,
                confidence_percent: meta.confidence_percent,
                method: meta.method.as_str(),
            },
            meta.attempts,
            meta.routing_ms,
            meta.endpoint_ms,
            meta.demoted,
        ),
        None => (
            RoutingDecisionMeta {
                endpoint_used: value.endpoint_used.clone(),
                reason_code: match cache_outcome {
                    CacheOutcome::Coalesced => {
                        "coalesced with a concurrent identical request".to_string()
                    }
                    _ => "served from the response cache".to_string(),
                },
                confidence_percent: 100,
                method: RoutingMethod::Direct.as_str(),
            },
            Vec::new(),
            0,
            0,
            false,
        ),
    };

    let (historical_success_rate, sample_count) = state
        .learner()
        .endpoint_stats(&fp.hash, &value.endpoint_used)
        .map(|(rate, samples)| (Some(rate), samples))
        .unwrap_or((None, 0));

    Ok(QueryReply {
        response: value.response,
        metadata: QueryMetadata {
            routing_decision,
            empirical_routing: EmpiricalMeta {
                fingerprint_hash: fp.hash.clone(),
                historical_success_rate,
                sample_count,
                demoted,
            },
            performance: PerformanceMeta {
                total_ms: total_start.elapsed().as_millis() as u64,
                endpoint_ms,
                routing_ms,
            },
            classification: ClassificationMeta {
                intent: cls.intent.as_str(),
                score_percent: (cls.score * 100.0).round() as u8,
                complexity_percent: (fp.complexity * 100.0).round() as u8,
            },
            attempts,
            cache: cache_label,
        },
    })
}

async fn produce(
    state: &AppState,
    request: &RouterRequest,
    fp: &Fingerprint,
    cls: &Classification,
    slot: Arc<Mutex<Option<LeaderMeta>>>,
    cancel: &CancellationToken,
) -> RouteResult<CachedQuery> {
    let routing_start = Instant::now();
    let plan = state.router().route(request, fp, cls)?;

    // File inputs run through the analysis pipeline, and the prompt is
    // assembled against the leading candidate's budget.
    let prompt_text = if request.file_inputs.is_empty() {
        request.full_text()
    } else {
        let options = AnalysisOptions {
            include_project_context: false,
            time_remaining: Some(request.time_remaining()),
            ..Default::default()
        };
        let report = state
            .analyzer()
            .analyze(&request.file_inputs, &options)
            .await?;
        prompt::assemble(request, &plan.candidates[0], &report.files).text
    };

    let routing_ms = routing_start.elapsed().as_millis() as u64;
    state
        .metrics()
        .record_routing_duration(plan.method.as_str(), routing_ms as f64);

    let exec_start = Instant::now();
    let execution_plan = crate::endpoints::ExecutionPlan {
        candidates: plan.candidates.clone(),
        per_endpoint_timeout: plan.per_endpoint_timeout,
        response_max_tokens: plan.response_max_tokens,
    };
    let execution = state
        .executor()
        .execute(
            &execution_plan,
            &fp.hash,
            &prompt_text,
            request.deadline,
            cancel,
        )
        .await;

    match execution {
        Ok(exec) => {
            let endpoint_ms = exec_start.elapsed().as_millis() as u64;
            let method = if exec.attempts.len() > 1 {
                RoutingMethod::Failover
            } else {
                plan.method
            };
            state
                .metrics()
                .record_request(&exec.endpoint_used, method.as_str());

            *slot.lock().expect("metadata mutex is never poisoned") = Some(LeaderMeta {
                method,
                reason: plan.reason,
                confidence_percent: plan.confidence_percent,
                demoted: plan.demoted,
                attempts: exec.attempts,
                routing_ms,
                endpoint_ms,
            });

            Ok(CachedQuery {
                response: exec.content,
                endpoint_used: exec.endpoint_used,
                completed_at: Utc::now(),
                token_usage: exec.usage,
            })
        }
        Err(failure) => {
            *slot.lock().expect("metadata mutex is never poisoned") = Some(LeaderMeta {
                method: plan.method,
                reason: plan.reason,
                confidence_percent: plan.confidence_percent,
                demoted: plan.demoted,
                attempts: failure.attempts,
                routing_ms,
                endpoint_ms: exec_start.elapsed().as_millis() as u64,
            });
            Err(failure.error)
        }
    }
}
