//! Prometheus metrics collection for Switchyard
//!
//! Tracks request counts per endpoint, routing decision latency, endpoint
//! failures by kind, cache effectiveness, and circuit breaker transitions.
//! Exposed via the `/metrics` endpoint in Prometheus text format.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for Switchyard
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    requests_total: CounterVec,
    routing_duration: HistogramVec,
    endpoint_failures: CounterVec,
    cache_events: CounterVec,
    breaker_transitions: CounterVec,
}

impl Metrics {
    /// Create a new Metrics instance and register all collectors.
    ///
    /// # Errors
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new(
                "switchyard_requests_total",
                "Total routed requests by endpoint and routing method",
            ),
            &["endpoint", "method"],
        )?;

        let routing_duration = HistogramVec::new(
            HistogramOpts::new(
                "switchyard_routing_duration_ms",
                "Routing decision latency in milliseconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]),
            &["method"],
        )?;

        let endpoint_failures = CounterVec::new(
            Opts::new(
                "switchyard_endpoint_failures_total",
                "Execution failures by endpoint and error kind",
            ),
            &["endpoint", "kind"],
        )?;

        let cache_events = CounterVec::new(
            Opts::new(
                "switchyard_cache_events_total",
                "Response cache events (hit, miss, coalesced, evicted)",
            ),
            &["event"],
        )?;

        let breaker_transitions = CounterVec::new(
            Opts::new(
                "switchyard_breaker_transitions_total",
                "Circuit breaker state transitions by endpoint",
            ),
            &["endpoint", "state"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(routing_duration.clone()))?;
        registry.register(Box::new(endpoint_failures.clone()))?;
        registry.register(Box::new(cache_events.clone()))?;
        registry.register(Box::new(breaker_transitions.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            routing_duration,
            endpoint_failures,
            cache_events,
            breaker_transitions,
        })
    }

    /// Record a completed request. Label failures degrade observability,
    /// never the request.
    pub fn record_request(&self, endpoint: &str, method: &str) {
        if let Ok(counter) = self
            .requests_total
            .get_metric_with_label_values(&[endpoint, method])
        {
            counter.inc();
        } else {
            tracing::error!(endpoint, method, "Metrics recording failed for requests_total");
        }
    }

    pub fn record_routing_duration(&self, method: &str, duration_ms: f64) {
        if let Ok(hist) = self
            .routing_duration
            .get_metric_with_label_values(&[method])
        {
            hist.observe(duration_ms);
        } else {
            tracing::error!(method, "Metrics recording failed for routing_duration");
        }
    }

    pub fn record_endpoint_failure(&self, endpoint: &str, kind: &str) {
        if let Ok(counter) = self
            .endpoint_failures
            .get_metric_with_label_values(&[endpoint, kind])
        {
            counter.inc();
        } else {
            tracing::error!(endpoint, kind, "Metrics recording failed for endpoint_failures");
        }
    }

    pub fn record_cache_event(&self, event: &str) {
        if let Ok(counter) = self.cache_events.get_metric_with_label_values(&[event]) {
            counter.inc();
        } else {
            tracing::error!(event, "Metrics recording failed for cache_events");
        }
    }

    pub fn record_breaker_transition(&self, endpoint: &str, state: &str) {
        if let Ok(counter) = self
            .breaker_transitions
            .get_metric_with_label_values(&[endpoint, state])
        {
            counter.inc();
        } else {
            tracing::error!(
                endpoint,
                state,
                "Metrics recording failed for breaker_transitions"
            );
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics were not valid UTF-8: {}", e)))
    }
}
