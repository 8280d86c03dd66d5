//! Configuration management for Switchyard
//!
//! Parses TOML configuration files, applies environment overrides, and
//! provides typed access to settings. The key set is closed: unknown keys
//! are a parse error, and every tunable has a documented default.

use crate::endpoints::{AuthKind, Capability, EndpointKind};
use crate::error::{RouteError, RouteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on any single request's lifetime; the effective
    /// deadline is min(caller deadline, now + this).
    #[serde(default = "default_max_request_duration_ms")]
    pub max_request_duration_ms: u64,
    /// How long in-flight requests may drain on shutdown before being aborted.
    #[serde(default = "default_drain_ms")]
    pub drain_on_shutdown_ms: u64,
}

fn default_max_request_duration_ms() -> u64 {
    120_000
}

fn default_drain_ms() -> u64 {
    3_000
}

/// One inference endpoint descriptor. Immutable after startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub max_context_tokens: u32,
    pub max_response_tokens: u32,
    #[serde(default)]
    pub auth_kind: AuthKind,
    /// Name of the environment variable holding the bearer token.
    /// Secrets never appear in the TOML file itself.
    #[serde(default)]
    pub auth_secret_ref: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub kind: EndpointKind,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Probe target; defaults to `{base_url}/v1/models`.
    #[serde(default)]
    pub health_url: Option<String>,
}

fn default_priority() -> u8 {
    1
}

fn default_temperature() -> f64 {
    0.7
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Target fraction of traffic served by local endpoints.
    #[serde(default = "default_local_first_ratio")]
    pub local_first_ratio: f64,
    #[serde(default = "default_request_timeout_base_ms")]
    pub request_timeout_base_ms: u64,
    /// Classifier-scaled ceiling: a score of 1.0 multiplies the base
    /// timeout by this much.
    #[serde(default = "default_complex_multiplier")]
    pub complex_multiplier: f64,
    /// Demote the top candidate when its empirical success rate on this
    /// fingerprint falls below the threshold.
    #[serde(default = "default_demote_threshold")]
    pub empirical_demote_threshold: f64,
    #[serde(default = "default_empirical_min_samples")]
    pub empirical_min_samples: u64,
    /// Best-effort JSON snapshot of the empirical table, written on clean
    /// shutdown and loaded on startup.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            local_first_ratio: default_local_first_ratio(),
            request_timeout_base_ms: default_request_timeout_base_ms(),
            complex_multiplier: default_complex_multiplier(),
            empirical_demote_threshold: default_demote_threshold(),
            empirical_min_samples: default_empirical_min_samples(),
            snapshot_path: None,
        }
    }
}

fn default_local_first_ratio() -> f64 {
    0.95
}

fn default_request_timeout_base_ms() -> u64 {
    25_000
}

fn default_complex_multiplier() -> f64 {
    3.0
}

fn default_demote_threshold() -> f64 {
    0.2
}

fn default_empirical_min_samples() -> u64 {
    10
}

/// Health probing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_probe_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_ms")]
    pub open_ms: u64,
    #[serde(default = "default_halfopen_successes")]
    pub halfopen_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_ms: default_open_ms(),
            halfopen_successes: default_halfopen_successes(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_ms() -> u64 {
    60_000
}

fn default_halfopen_successes() -> u32 {
    3
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            max_bytes: default_cache_max_bytes(),
            max_entries: default_cache_max_entries(),
        }
    }
}

fn default_cache_ttl_ms() -> u64 {
    900_000
}

fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_cache_max_entries() -> usize {
    1024
}

/// File analysis pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilesConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_file_concurrency")]
    pub concurrency: usize,
    /// Extra allowed extensions beyond the built-in source/text set.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
            concurrency: default_file_concurrency(),
            allowed_extensions: Vec::new(),
            workspace_root: default_workspace_root(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_max_files() -> usize {
    50
}

fn default_file_concurrency() -> usize {
    5
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/workspace")
}

/// Same-endpoint retry configuration (network errors only)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_base_ms() -> u64 {
    100
}

fn default_retry_cap_ms() -> u64 {
    2_000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> RouteResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RouteError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config = Self::from_str(&content).map_err(|e| {
            RouteError::Config(format!(
                "Failed to parse config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SWITCHYARD_*` environment overrides.
    ///
    /// The override set is closed; each variable maps to exactly one
    /// scalar key. Parse failures are configuration errors, not warnings.
    pub fn apply_env_overrides(&mut self) -> RouteResult<()> {
        fn parse_env<T: std::str::FromStr>(name: &str) -> RouteResult<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            match std::env::var(name) {
                Ok(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                    RouteError::Config(format!("Invalid value for {}: '{}' ({})", name, raw, e))
                }),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parse_env::<f64>("SWITCHYARD_LOCAL_FIRST_RATIO")? {
            self.routing.local_first_ratio = v;
        }
        if let Some(v) = parse_env::<u64>("SWITCHYARD_REQUEST_TIMEOUT_BASE_MS")? {
            self.routing.request_timeout_base_ms = v;
        }
        if let Some(v) = parse_env::<f64>("SWITCHYARD_COMPLEX_MULTIPLIER")? {
            self.routing.complex_multiplier = v;
        }
        if let Some(v) = parse_env::<u64>("SWITCHYARD_PROBE_INTERVAL_MS")? {
            self.health.probe_interval_ms = v;
        }
        if let Some(v) = parse_env::<u64>("SWITCHYARD_PROBE_TIMEOUT_MS")? {
            self.health.probe_timeout_ms = v;
        }
        if let Some(v) = parse_env::<u64>("SWITCHYARD_CACHE_TTL_MS")? {
            self.cache.ttl_ms = v;
        }
        if let Some(v) = parse_env::<u32>("SWITCHYARD_RETRY_ATTEMPTS")? {
            self.retry.attempts = v;
        }
        if let Some(v) = parse_env::<u64>("SWITCHYARD_DRAIN_ON_SHUTDOWN_MS")? {
            self.server.drain_on_shutdown_ms = v;
        }
        if let Some(v) = parse_env::<PathBuf>("SWITCHYARD_WORKSPACE_ROOT")? {
            self.files.workspace_root = v;
        }
        if let Some(v) = parse_env::<String>("SWITCHYARD_LOG_LEVEL")? {
            self.observability.log_level = v;
        }
        Ok(())
    }

    /// Validate configuration after parsing
    pub fn validate(&self) -> RouteResult<()> {
        if self.endpoints.is_empty() {
            return Err(RouteError::Config(
                "Configuration error: at least one endpoint must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name.as_str()) {
                return Err(RouteError::Config(format!(
                    "Configuration error: duplicate endpoint name '{}'. \
                    Endpoint names must be unique.",
                    endpoint.name
                )));
            }

            if !endpoint.base_url.starts_with("http://")
                && !endpoint.base_url.starts_with("https://")
            {
                return Err(RouteError::Config(format!(
                    "Configuration error: endpoint '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    endpoint.name, endpoint.base_url
                )));
            }

            if endpoint.max_context_tokens == 0 {
                return Err(RouteError::Config(format!(
                    "Configuration error: endpoint '{}' has max_context_tokens=0. \
                    It must be greater than 0.",
                    endpoint.name
                )));
            }

            if endpoint.max_response_tokens >= endpoint.max_context_tokens {
                return Err(RouteError::Config(format!(
                    "Configuration error: endpoint '{}' has max_response_tokens={} >= \
                    max_context_tokens={}. The response budget must leave room for the prompt.",
                    endpoint.name, endpoint.max_response_tokens, endpoint.max_context_tokens
                )));
            }

            if endpoint.temperature < 0.0
                || endpoint.temperature > 2.0
                || !endpoint.temperature.is_finite()
            {
                return Err(RouteError::Config(format!(
                    "Configuration error: endpoint '{}' has invalid temperature {}. \
                    temperature must be a finite number between 0.0 and 2.0.",
                    endpoint.name, endpoint.temperature
                )));
            }

            if endpoint.auth_kind == AuthKind::Bearer && endpoint.auth_secret_ref.is_none() {
                return Err(RouteError::Config(format!(
                    "Configuration error: endpoint '{}' uses bearer auth but has no \
                    auth_secret_ref naming the environment variable with the token.",
                    endpoint.name
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.routing.local_first_ratio)
            || !self.routing.local_first_ratio.is_finite()
        {
            return Err(RouteError::Config(format!(
                "Configuration error: local_first_ratio {} is outside [0.0, 1.0].",
                self.routing.local_first_ratio
            )));
        }

        if self.routing.complex_multiplier < 1.0 || !self.routing.complex_multiplier.is_finite() {
            return Err(RouteError::Config(format!(
                "Configuration error: complex_multiplier {} must be a finite number >= 1.0.",
                self.routing.complex_multiplier
            )));
        }

        if !(0.0..=1.0).contains(&self.routing.empirical_demote_threshold) {
            return Err(RouteError::Config(format!(
                "Configuration error: empirical_demote_threshold {} is outside [0.0, 1.0].",
                self.routing.empirical_demote_threshold
            )));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(RouteError::Config(
                "Configuration error: breaker.failure_threshold must be greater than 0."
                    .to_string(),
            ));
        }

        if self.files.concurrency == 0 {
            return Err(RouteError::Config(
                "Configuration error: files.concurrency must be greater than 0.".to_string(),
            ));
        }

        if self.retry.base_ms > self.retry.cap_ms {
            return Err(RouteError::Config(format!(
                "Configuration error: retry.base_ms ({}) exceeds retry.cap_ms ({}).",
                self.retry.base_ms, self.retry.cap_ms
            )));
        }

        Ok(())
    }

    pub fn max_request_duration(&self) -> Duration {
        Duration::from_millis(self.server.max_request_duration_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.server.drain_on_shutdown_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.health.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health.probe_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache.ttl_ms)
    }
}

impl FromStr for Config {
    type Err = RouteError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        toml::from_str(toml_str)
            .map_err(|e| RouteError::Config(format!("Invalid TOML: {}", e)))
    }
}
