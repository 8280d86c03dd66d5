//! Endpoint selection
//!
//! Turns a request, its fingerprint, and its classification into an
//! ordered candidate list plus the per-endpoint timeout and response-token
//! budget. Selection drops unusable endpoints (open breaker, unhealthy,
//! missing capabilities), ranks the rest by priority, health band, the
//! local-first balancer, and latency, and finally lets the empirical
//! table demote a top candidate with a bad track record on this
//! fingerprint. The table reorders, never vetoes: the top candidate is
//! always tried.

use crate::classify::Classification;
use crate::config::RoutingConfig;
use crate::endpoints::{
    BreakerState, Capability, Endpoint, EndpointKind, EndpointRegistry, HealthState,
};
use crate::error::{RouteError, RouteResult};
use crate::fingerprint::Fingerprint;
use crate::learner::EmpiricalLearner;
use crate::request::{RouterRequest, TaskHint, estimate_tokens};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Inputs above this size imply the `large_context` capability.
const LARGE_CONTEXT_TOKENS: usize = 32_768;

/// Floor for the scaled response-token budget.
const MIN_RESPONSE_TOKENS: u32 = 256;

/// Rolling window length for the local-first balancer.
const BALANCE_WINDOW: usize = 100;

/// How a routing decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMethod {
    Direct,
    Forced,
    Empirical,
    Failover,
}

impl RoutingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Forced => "forced",
            Self::Empirical => "empirical",
            Self::Failover => "failover",
        }
    }
}

/// The router's output, consumed by the executor.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub candidates: Vec<Arc<Endpoint>>,
    pub per_endpoint_timeout: Duration,
    pub response_max_tokens: u32,
    pub method: RoutingMethod,
    pub reason: String,
    pub confidence_percent: u8,
    pub demoted: bool,
}

/// An open breaker blocks selection only until its cooldown elapses; a
/// cooled-down breaker admits half-open probes, so the endpoint is
/// selectable again for forced and ranked candidates alike.
fn breaker_blocks_selection(endpoint: &Endpoint) -> bool {
    endpoint.breaker().state() == BreakerState::Open
        && endpoint
            .breaker()
            .cooldown_remaining()
            .is_some_and(|d| d > Duration::ZERO)
}

/// Rolling record of which side (local/cloud) recent decisions landed on.
#[derive(Debug)]
struct BalanceWindow {
    window: VecDeque<EndpointKind>,
}

impl BalanceWindow {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(BALANCE_WINDOW),
        }
    }

    fn note(&mut self, kind: EndpointKind) {
        if self.window.len() == BALANCE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(kind);
    }

    /// The side currently under-represented against the target ratio.
    /// With an empty window the local side is preferred outright.
    fn preferred(&self, local_ratio: f64) -> EndpointKind {
        if self.window.is_empty() {
            return EndpointKind::Local;
        }
        let locals = self
            .window
            .iter()
            .filter(|k| **k == EndpointKind::Local)
            .count() as f64;
        if locals < local_ratio * self.window.len() as f64 {
            EndpointKind::Local
        } else {
            EndpointKind::Cloud
        }
    }
}

/// The smart router.
pub struct SmartRouter {
    registry: EndpointRegistry,
    learner: Arc<EmpiricalLearner>,
    config: RoutingConfig,
    balance: Mutex<BalanceWindow>,
}

impl SmartRouter {
    pub fn new(
        registry: EndpointRegistry,
        learner: Arc<EmpiricalLearner>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            registry,
            learner,
            config,
            balance: Mutex::new(BalanceWindow::new()),
        }
    }

    /// Capabilities the request implies, derived from the task hint and
    /// the request text.
    pub fn required_capabilities(request: &RouterRequest) -> Vec<Capability> {
        let mut required = Vec::new();
        if matches!(request.task_hint, TaskHint::Coding | TaskHint::Debugging) {
            required.push(Capability::Code);
        }
        let text = request.full_text();
        if text.contains("<fim_") || text.contains("<|fim") {
            required.push(Capability::Fim);
        }
        if estimate_tokens(&text) > LARGE_CONTEXT_TOKENS {
            required.push(Capability::LargeContext);
        }
        required
    }

    /// Produce the ordered candidate plan for one request.
    pub fn route(
        &self,
        request: &RouterRequest,
        fingerprint: &Fingerprint,
        classification: &Classification,
    ) -> RouteResult<RoutePlan> {
        let scale = 1.0 + (self.config.complex_multiplier - 1.0) * classification.score;
        let per_endpoint_timeout = Duration::from_millis(
            (self.config.request_timeout_base_ms as f64 * scale) as u64,
        );

        // Rule 1: a forced endpoint short-circuits selection entirely.
        if let Some(name) = &request.force_endpoint {
            let endpoint = self.registry.get(name).ok_or_else(|| {
                RouteError::InvalidRequest(format!("unknown endpoint '{}'", name))
            })?;

            if breaker_blocks_selection(&endpoint) {
                return Err(RouteError::EndpointOpen {
                    endpoint: name.clone(),
                });
            }

            let response_max_tokens =
                self.response_budget(&endpoint, request, classification.score);
            self.note_decision(endpoint.kind());

            return Ok(RoutePlan {
                candidates: vec![endpoint],
                per_endpoint_timeout,
                response_max_tokens,
                method: RoutingMethod::Forced,
                reason: format!("caller forced endpoint '{}'", name),
                confidence_percent: 100,
                demoted: false,
            });
        }

        // Rule 2: drop endpoints that cannot serve this request.
        let required = Self::required_capabilities(request);
        let mut candidates: Vec<Arc<Endpoint>> = self
            .registry
            .list()
            .into_iter()
            .filter(|e| {
                let unhealthy = e.health() == HealthState::Unhealthy;
                let capable = required.iter().all(|c| e.has_capability(*c));
                !breaker_blocks_selection(e) && !unhealthy && capable
            })
            .collect();

        if candidates.is_empty() {
            let names: Vec<&str> = self.registry.all().iter().map(|e| e.name()).collect();
            return Err(RouteError::EndpointOpen {
                endpoint: names.join(", "),
            });
        }

        // Rules 3 and 4: rank by priority, health band, then the balancer
        // preference between otherwise-tied endpoints, then latency.
        let preferred = self
            .balance
            .lock()
            .expect("balance mutex is never poisoned")
            .preferred(self.config.local_first_ratio);
        candidates.sort_by_key(|e| {
            (
                e.priority(),
                e.health().rank(),
                if e.kind() == preferred { 0u8 } else { 1u8 },
                e.last_latency_ms().unwrap_or(u64::MAX),
            )
        });

        // Rule 5: empirical demotion of a top candidate with a bad track
        // record on this fingerprint. One slot, never a veto.
        let mut demoted = false;
        if candidates.len() > 1 {
            if let Some((rate, samples)) = self
                .learner
                .endpoint_stats(&fingerprint.hash, candidates[0].name())
            {
                if samples >= self.config.empirical_min_samples
                    && rate < self.config.empirical_demote_threshold
                {
                    tracing::info!(
                        fingerprint = %fingerprint.hash,
                        endpoint_name = %candidates[0].name(),
                        success_rate = rate,
                        samples,
                        "Demoting top candidate on empirical evidence"
                    );
                    candidates.swap(0, 1);
                    demoted = true;
                }
            }
        }

        let top = candidates[0].clone();
        let response_max_tokens = self.response_budget(&top, request, classification.score);
        self.note_decision(top.kind());

        let (method, reason) = if demoted {
            (
                RoutingMethod::Empirical,
                format!(
                    "empirical table demoted the priority candidate; '{}' leads",
                    top.name()
                ),
            )
        } else {
            (
                RoutingMethod::Direct,
                format!(
                    "'{}' leads on priority {} and {} health",
                    top.name(),
                    top.priority(),
                    top.health().as_str()
                ),
            )
        };

        let confidence_percent = match top.health() {
            HealthState::Healthy => {
                if demoted {
                    70
                } else {
                    90
                }
            }
            HealthState::Degraded => 75,
            HealthState::Unknown => 60,
            HealthState::Unhealthy => 40,
        };

        tracing::debug!(
            candidates = candidates.len(),
            top = %top.name(),
            method = method.as_str(),
            timeout_ms = per_endpoint_timeout.as_millis() as u64,
            response_max_tokens,
            "Routing plan built"
        );

        Ok(RoutePlan {
            candidates,
            per_endpoint_timeout,
            response_max_tokens,
            method,
            reason,
            confidence_percent,
            demoted,
        })
    }

    /// Response-token budget: the endpoint maximum scaled by the same
    /// classifier factor as the timeout, normalized so a score of 1.0
    /// grants the full budget, floored to stay usable.
    fn response_budget(
        &self,
        endpoint: &Endpoint,
        request: &RouterRequest,
        score: f64,
    ) -> u32 {
        if let Some(explicit) = request.max_tokens_override {
            return explicit.min(endpoint.max_response_tokens());
        }
        let factor =
            (1.0 + (self.config.complex_multiplier - 1.0) * score) / self.config.complex_multiplier;
        let scaled = (endpoint.max_response_tokens() as f64 * factor) as u32;
        scaled.clamp(
            MIN_RESPONSE_TOKENS.min(endpoint.max_response_tokens()),
            endpoint.max_response_tokens(),
        )
    }

    fn note_decision(&self, kind: EndpointKind) {
        self.balance
            .lock()
            .expect("balance mutex is never poisoned")
            .note(kind);
    }
}
