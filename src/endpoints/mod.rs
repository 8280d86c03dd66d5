//! Endpoint descriptors, runtime state, and the registry
//!
//! An [`Endpoint`] is an immutable descriptor (URL, model, budgets, auth,
//! capabilities) plus mutable runtime state (health, latency, failure
//! counts) guarded by the endpoint's own mutex, and a circuit breaker.
//! Descriptors are loaded at startup and never change afterwards.

pub mod breaker;
pub mod client;
pub mod executor;
pub mod health;

pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{ChatClient, ChatOutcome, TokenUsage};
pub use executor::{Attempt, Execution, ExecutionError, ExecutionLog, ExecutionPlan, Executor, Outcome};
pub use health::HealthMonitor;

use crate::config::{BreakerConfig, Config, EndpointConfig};
use crate::error::{RouteError, RouteResult};
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Authentication policy for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    Bearer,
}

/// Which side of the local-first ratio an endpoint sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    #[default]
    Local,
    Cloud,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

/// What kinds of requests an endpoint can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Fim,
    Code,
    Reasoning,
    LargeContext,
}

/// Probed health of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Ranking band used by the router: healthy > degraded > unknown.
    /// Unhealthy endpoints never reach the ranking stage.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unknown => 2,
            Self::Unhealthy => 3,
        }
    }
}

/// Mutable runtime state, guarded by the endpoint's own mutex.
#[derive(Debug)]
struct EndpointRuntime {
    health: HealthState,
    last_probe_at: Option<Instant>,
    last_latency_ms: Option<u64>,
    failure_count: u64,
    consecutive_probe_failures: u32,
    consecutive_probe_successes: u32,
}

/// Serializable view of one endpoint's runtime state for the status tool.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub kind: &'static str,
    pub model: String,
    pub priority: u8,
    pub health: &'static str,
    pub breaker_state: &'static str,
    pub breaker_cooldown_remaining_ms: Option<u64>,
    pub last_latency_ms: Option<u64>,
    pub seconds_since_last_probe: Option<u64>,
    pub failure_count: u64,
}

/// One inference endpoint: immutable descriptor plus runtime state.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    base_url: String,
    model: String,
    priority: u8,
    max_context_tokens: u32,
    max_response_tokens: u32,
    auth: AuthKind,
    bearer_token: Option<String>,
    kind: EndpointKind,
    capabilities: Vec<Capability>,
    temperature: f64,
    health_url: String,
    runtime: Mutex<EndpointRuntime>,
    breaker: CircuitBreaker,
}

impl Endpoint {
    /// Build an endpoint from configuration, resolving the bearer secret
    /// from the environment variable named by `auth_secret_ref`.
    pub fn from_config(config: &EndpointConfig, breaker: &BreakerConfig) -> RouteResult<Self> {
        Self::build(config, breaker, None)
    }

    /// Like `from_config`, but the endpoint's breaker transitions are
    /// counted in the Prometheus registry.
    pub fn from_config_with_metrics(
        config: &EndpointConfig,
        breaker: &BreakerConfig,
        metrics: Arc<Metrics>,
    ) -> RouteResult<Self> {
        Self::build(config, breaker, Some(metrics))
    }

    fn build(
        config: &EndpointConfig,
        breaker: &BreakerConfig,
        metrics: Option<Arc<Metrics>>,
    ) -> RouteResult<Self> {
        let bearer_token = match config.auth_kind {
            AuthKind::None => None,
            AuthKind::Bearer => {
                let var = config.auth_secret_ref.as_deref().ok_or_else(|| {
                    RouteError::Config(format!(
                        "endpoint '{}' uses bearer auth without auth_secret_ref",
                        config.name
                    ))
                })?;
                let token = std::env::var(var).map_err(|_| {
                    RouteError::Config(format!(
                        "endpoint '{}': environment variable {} is not set",
                        config.name, var
                    ))
                })?;
                Some(token)
            }
        };

        // base_url conventionally already carries /v1; only add the
        // version segment when it is missing.
        let base = config.base_url.trim_end_matches('/').to_string();
        let health_url = config.health_url.clone().unwrap_or_else(|| {
            if base.ends_with("/v1") {
                format!("{}/models", base)
            } else {
                format!("{}/v1/models", base)
            }
        });

        Ok(Self {
            name: config.name.clone(),
            base_url: base,
            model: config.model.clone(),
            priority: config.priority,
            max_context_tokens: config.max_context_tokens,
            max_response_tokens: config.max_response_tokens,
            auth: config.auth_kind,
            bearer_token,
            kind: config.kind,
            capabilities: config.capabilities.clone(),
            temperature: config.temperature,
            health_url,
            runtime: Mutex::new(EndpointRuntime {
                health: HealthState::Unknown,
                last_probe_at: None,
                last_latency_ms: None,
                failure_count: 0,
                consecutive_probe_failures: 0,
                consecutive_probe_successes: 0,
            }),
            breaker: match metrics {
                Some(metrics) => {
                    CircuitBreaker::new_with_metrics(config.name.clone(), breaker, metrics)
                }
                None => CircuitBreaker::new(config.name.clone(), breaker),
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    pub fn max_response_tokens(&self) -> u32 {
        self.max_response_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.kind == EndpointKind::Local
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn auth(&self) -> AuthKind {
        self.auth
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn health(&self) -> HealthState {
        self.runtime
            .lock()
            .expect("endpoint mutex is never poisoned")
            .health
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        self.runtime
            .lock()
            .expect("endpoint mutex is never poisoned")
            .last_latency_ms
    }

    /// Count one execution failure against this endpoint.
    pub fn note_failure(&self) {
        let mut runtime = self
            .runtime
            .lock()
            .expect("endpoint mutex is never poisoned");
        runtime.failure_count += 1;
    }

    /// Apply one probe outcome and return the resulting health state.
    ///
    /// Transitions: one failure degrades a healthy endpoint, three
    /// consecutive failures mark it unhealthy, and three consecutive
    /// successes after failure restore it. A fresh (unknown) endpoint is
    /// healthy after its first successful probe.
    pub fn record_probe(&self, success: bool, latency_ms: Option<u64>) -> HealthState {
        let mut runtime = self
            .runtime
            .lock()
            .expect("endpoint mutex is never poisoned");
        runtime.last_probe_at = Some(Instant::now());

        if success {
            if let Some(ms) = latency_ms {
                runtime.last_latency_ms = Some(ms);
            }
            runtime.consecutive_probe_failures = 0;
            runtime.consecutive_probe_successes += 1;

            let next = match runtime.health {
                HealthState::Unknown => HealthState::Healthy,
                HealthState::Healthy => HealthState::Healthy,
                HealthState::Degraded | HealthState::Unhealthy => {
                    if runtime.consecutive_probe_successes >= 3 {
                        HealthState::Healthy
                    } else {
                        runtime.health
                    }
                }
            };
            if next == HealthState::Healthy && runtime.health != HealthState::Healthy {
                tracing::info!(
                    endpoint_name = %self.name,
                    "Endpoint recovered to healthy state"
                );
            }
            runtime.health = next;
        } else {
            runtime.consecutive_probe_successes = 0;
            runtime.consecutive_probe_failures += 1;
            runtime.failure_count += 1;

            let next = if runtime.consecutive_probe_failures >= 3 {
                HealthState::Unhealthy
            } else if runtime.health == HealthState::Healthy {
                HealthState::Degraded
            } else {
                runtime.health
            };
            if next != runtime.health {
                tracing::warn!(
                    endpoint_name = %self.name,
                    consecutive_failures = runtime.consecutive_probe_failures,
                    from = runtime.health.as_str(),
                    to = next.as_str(),
                    "Endpoint health transition"
                );
            }
            runtime.health = next;
        }

        runtime.health
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        let runtime = self
            .runtime
            .lock()
            .expect("endpoint mutex is never poisoned");
        EndpointSnapshot {
            name: self.name.clone(),
            kind: self.kind.as_str(),
            model: self.model.clone(),
            priority: self.priority,
            health: runtime.health.as_str(),
            breaker_state: self.breaker.state().as_str(),
            breaker_cooldown_remaining_ms: self
                .breaker
                .cooldown_remaining()
                .map(|d| d.as_millis() as u64),
            last_latency_ms: runtime.last_latency_ms,
            seconds_since_last_probe: runtime.last_probe_at.map(|at| at.elapsed().as_secs()),
            failure_count: runtime.failure_count,
        }
    }
}

/// Immutable set of endpoints, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
}

impl EndpointRegistry {
    pub fn from_config(config: &Config) -> RouteResult<Self> {
        Self::build(config, None)
    }

    /// Like `from_config`, but breaker transitions across the pool are
    /// counted in the Prometheus registry.
    pub fn from_config_with_metrics(config: &Config, metrics: Arc<Metrics>) -> RouteResult<Self> {
        Self::build(config, Some(metrics))
    }

    fn build(config: &Config, metrics: Option<Arc<Metrics>>) -> RouteResult<Self> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| Endpoint::build(e, &config.breaker, metrics.clone()).map(Arc::new))
            .collect::<RouteResult<Vec<_>>>()?;

        tracing::info!(
            total_endpoints = endpoints.len(),
            local = endpoints.iter().filter(|e| e.is_local()).count(),
            "Endpoint registry initialized"
        );

        Ok(Self { endpoints })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.name() == name).cloned()
    }

    pub fn all(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// All endpoints ordered by priority ascending, then last latency
    /// ascending (unprobed endpoints sort after probed ones).
    pub fn list(&self) -> Vec<Arc<Endpoint>> {
        let mut ordered = self.endpoints.clone();
        ordered.sort_by(|a, b| {
            a.priority().cmp(&b.priority()).then_with(|| {
                let la = a.last_latency_ms().unwrap_or(u64::MAX);
                let lb = b.last_latency_ms().unwrap_or(u64::MAX);
                la.cmp(&lb)
            })
        });
        ordered
    }

    pub fn snapshots(&self) -> Vec<EndpointSnapshot> {
        self.endpoints.iter().map(|e| e.snapshot()).collect()
    }
}
