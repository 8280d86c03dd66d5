//! Background health probing
//!
//! Periodically probes every endpoint's health URL and feeds the outcome
//! into the endpoint's health state machine. The router only ever reads
//! the most recent state; nothing on the request path waits for a probe.

use crate::config::Config;
use crate::endpoints::EndpointRegistry;
use crate::error::{RouteError, RouteResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Periodic endpoint prober.
pub struct HealthMonitor {
    registry: EndpointRegistry,
    http: reqwest::Client,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: EndpointRegistry, config: &Config) -> RouteResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .map_err(|e| RouteError::Config(format!("failed to build probe client: {}", e)))?;

        Ok(Self {
            registry,
            http,
            interval: config.probe_interval(),
        })
    }

    /// Probe every endpoint once.
    pub async fn probe_all(&self) {
        for endpoint in self.registry.all() {
            let url = endpoint.health_url().to_string();
            let started = Instant::now();

            let success = match self.http.get(&url).send().await {
                Ok(response) => {
                    let ok = response.status().is_success();
                    tracing::debug!(
                        endpoint_name = %endpoint.name(),
                        url = %url,
                        status = %response.status(),
                        healthy = ok,
                        "Health probe completed"
                    );
                    ok
                }
                Err(e) => {
                    tracing::debug!(
                        endpoint_name = %endpoint.name(),
                        url = %url,
                        error = %e,
                        "Health probe failed"
                    );
                    false
                }
            };

            let latency_ms = started.elapsed().as_millis() as u64;
            endpoint.record_probe(success, success.then_some(latency_ms));
        }
    }

    /// Spawn the background probe loop: one immediate sweep so the first
    /// routed request sees real health state, then one sweep per interval
    /// until the cancellation token fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_ms = self.interval.as_millis() as u64,
                endpoints = self.registry.len(),
                "Starting background health probes"
            );

            self.probe_all().await;

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the immediate first tick

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Health probe loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.probe_all().await;
                    }
                }
            }
        })
    }
}
