//! Request execution: retries, failover, and outcome accounting
//!
//! Walks the router's ordered candidate list. Network errors are retried
//! on the same endpoint with jittered backoff; timeouts, capacity, 5xx,
//! and one-shot 4xx failures move on to the next candidate. Every attempt
//! feeds the breaker, the execution log, the metrics, and the empirical
//! learner. Cancellation aborts immediately with no retry and no failover.

use crate::config::RetryConfig;
use crate::endpoints::{ChatClient, Endpoint, TokenUsage};
use crate::error::RouteError;
use crate::learner::EmpiricalLearner;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Attempt outcome taxonomy for records and the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Timeout,
    Capacity,
    Network,
    Policy,
    Cancelled,
    Other,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Capacity => "capacity",
            Self::Network => "network",
            Self::Policy => "policy",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }

    pub fn from_error(error: &RouteError) -> Self {
        match error {
            RouteError::Timeout { .. } => Self::Timeout,
            RouteError::Capacity { .. } => Self::Capacity,
            RouteError::Network { .. } => Self::Network,
            RouteError::Upstream4xx { .. } | RouteError::Rejected { .. }
            | RouteError::InvalidRequest(_) | RouteError::EndpointOpen { .. } => Self::Policy,
            RouteError::Cancelled => Self::Cancelled,
            _ => Self::Other,
        }
    }
}

/// One attempt against one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: Outcome,
    pub error: Option<String>,
}

/// One appended execution record, per attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub fingerprint_hash: String,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: Outcome,
    pub bytes_out: u64,
    pub bytes_in: u64,
}

/// In-memory rolling log of execution records plus cumulative counters.
#[derive(Debug)]
pub struct ExecutionLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

#[derive(Debug)]
struct LogInner {
    records: VecDeque<ExecutionRecord>,
    totals: BTreeMap<&'static str, u64>,
}

/// Cumulative outcome counters for the status tool.
#[derive(Debug, Clone, Serialize)]
pub struct LogCounters {
    pub total: u64,
    pub by_outcome: BTreeMap<&'static str, u64>,
}

impl ExecutionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                totals: BTreeMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, record: ExecutionRecord) {
        let mut inner = self.inner.lock().expect("log mutex is never poisoned");
        *inner.totals.entry(record.outcome.as_str()).or_default() += 1;
        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
    }

    pub fn counters(&self) -> LogCounters {
        let inner = self.inner.lock().expect("log mutex is never poisoned");
        LogCounters {
            total: inner.totals.values().sum(),
            by_outcome: inner.totals.clone(),
        }
    }

    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock().expect("log mutex is never poisoned");
        inner.records.iter().rev().take(n).cloned().collect()
    }

    /// Count of successful records, used by tests and the status tool.
    pub fn successes(&self) -> u64 {
        self.counters()
            .by_outcome
            .get("success")
            .copied()
            .unwrap_or(0)
    }
}

/// The ordered plan the router hands to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub candidates: Vec<Arc<Endpoint>>,
    pub per_endpoint_timeout: Duration,
    pub response_max_tokens: u32,
}

/// A completed execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub content: String,
    pub endpoint_used: String,
    pub usage: TokenUsage,
    pub attempts: Vec<Attempt>,
}

/// A failed execution, carrying the attempts that were made so callers
/// can report which endpoints were tried.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub error: RouteError,
    pub attempts: Vec<Attempt>,
}

/// The execution engine.
pub struct Executor {
    client: ChatClient,
    learner: Arc<EmpiricalLearner>,
    log: Arc<ExecutionLog>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl Executor {
    pub fn new(
        client: ChatClient,
        learner: Arc<EmpiricalLearner>,
        log: Arc<ExecutionLog>,
        metrics: Arc<Metrics>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            learner,
            log,
            metrics,
            retry,
        }
    }

    /// Execute the plan: walk candidates in order, retrying network
    /// failures on the same endpoint, failing over on everything else
    /// the policy allows.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        fingerprint_hash: &str,
        prompt: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Execution, ExecutionError> {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut best_error: Option<RouteError> = None;

        for endpoint in &plan.candidates {
            if cancel.is_cancelled() {
                return Err(ExecutionError {
                    error: RouteError::Cancelled,
                    attempts,
                });
            }

            if !endpoint.breaker().try_acquire() {
                tracing::debug!(
                    endpoint_name = %endpoint.name(),
                    "Skipping candidate with non-admitting breaker"
                );
                continue;
            }

            let mut same_endpoint_attempt: u32 = 0;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ExecutionError {
                        error: RouteError::Cancelled,
                        attempts,
                    });
                }
                let timeout = plan.per_endpoint_timeout.min(remaining);
                let deadline_bound = timeout < plan.per_endpoint_timeout;

                let started_at = Utc::now();
                let started = Instant::now();
                let result = self
                    .client
                    .complete(
                        endpoint,
                        prompt,
                        plan.response_max_tokens,
                        timeout,
                        cancel,
                    )
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(outcome) => {
                        endpoint.breaker().record_success();
                        self.learner.record(
                            fingerprint_hash,
                            endpoint.name(),
                            true,
                            Some(outcome.latency_ms),
                            None,
                        );
                        self.log.append(ExecutionRecord {
                            fingerprint_hash: fingerprint_hash.to_string(),
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome: Outcome::Success,
                            bytes_out: prompt.len() as u64,
                            bytes_in: outcome.content.len() as u64,
                        });
                        attempts.push(Attempt {
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome: Outcome::Success,
                            error: None,
                        });

                        return Ok(Execution {
                            content: outcome.content,
                            endpoint_used: endpoint.name().to_string(),
                            usage: outcome.usage,
                            attempts,
                        });
                    }
                    Err(RouteError::Cancelled) => {
                        // No retry, no failover; only the cancelled record
                        // is committed.
                        self.log.append(ExecutionRecord {
                            fingerprint_hash: fingerprint_hash.to_string(),
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome: Outcome::Cancelled,
                            bytes_out: prompt.len() as u64,
                            bytes_in: 0,
                        });
                        attempts.push(Attempt {
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome: Outcome::Cancelled,
                            error: None,
                        });
                        return Err(ExecutionError {
                            error: RouteError::Cancelled,
                            attempts,
                        });
                    }
                    Err(error) => {
                        let outcome = Outcome::from_error(&error);
                        tracing::warn!(
                            endpoint_name = %endpoint.name(),
                            fingerprint = %fingerprint_hash,
                            outcome = outcome.as_str(),
                            attempt = same_endpoint_attempt + 1,
                            error = %error,
                            "Endpoint attempt failed"
                        );

                        endpoint.note_failure();
                        if error.counts_as_breaker_failure() {
                            endpoint.breaker().record_failure();
                        }
                        self.metrics
                            .record_endpoint_failure(endpoint.name(), error.kind());
                        self.learner.record(
                            fingerprint_hash,
                            endpoint.name(),
                            false,
                            None,
                            Some(error.kind()),
                        );
                        self.log.append(ExecutionRecord {
                            fingerprint_hash: fingerprint_hash.to_string(),
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome,
                            bytes_out: prompt.len() as u64,
                            bytes_in: 0,
                        });
                        attempts.push(Attempt {
                            endpoint: endpoint.name().to_string(),
                            started_at,
                            duration_ms,
                            outcome,
                            error: Some(error.to_string()),
                        });

                        // A timeout produced by deadline pressure (the
                        // per-endpoint window was already clipped) is not
                        // retried; the deadline will not get looser.
                        let deadline_timeout =
                            matches!(error, RouteError::Timeout { .. }) && deadline_bound;

                        let retryable = matches!(error, RouteError::Network { .. })
                            && same_endpoint_attempt < self.retry.attempts
                            && !deadline_timeout;

                        if best_error
                            .as_ref()
                            .map(|b| error.informativeness() > b.informativeness())
                            .unwrap_or(true)
                        {
                            best_error = Some(error);
                        }

                        if retryable {
                            same_endpoint_attempt += 1;
                            let backoff = self.backoff(same_endpoint_attempt);
                            tracing::debug!(
                                endpoint_name = %endpoint.name(),
                                backoff_ms = backoff.as_millis() as u64,
                                "Retrying network failure on the same endpoint"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return Err(ExecutionError {
                                        error: RouteError::Cancelled,
                                        attempts,
                                    });
                                }
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            continue;
                        }

                        break; // fail over to the next candidate
                    }
                }
            }
        }

        let error = best_error.unwrap_or_else(|| RouteError::EndpointOpen {
            endpoint: plan
                .candidates
                .first()
                .map(|e| e.name().to_string())
                .unwrap_or_default(),
        });
        Err(ExecutionError { error, attempts })
    }

    /// Exponential backoff with jitter: base doubles per attempt, capped,
    /// then jittered down by up to half.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .retry
            .base_ms
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
            .min(self.retry.cap_ms);
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis(exp - jitter)
    }
}
