//! Command-line interface for Switchyard
//!
//! Provides argument parsing and subcommand handling for the Switchyard binary.

use clap::{Parser, Subcommand};

/// AI request router for heterogeneous LLM endpoints
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version)]
#[command(about = "AI request router for heterogeneous LLM endpoints")]
#[command(
    long_about = "Switchyard routes coding, analysis, and generation requests across \
    local and cloud model endpoints with local-first selection, health probing, \
    circuit breaking, response caching, and empirical routing feedback."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchyard.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Switchyard Configuration
# ========================
#
# This file configures the HTTP server, the endpoint pool, routing,
# health probing, circuit breaking, caching, and the file pipeline.
# Every SWITCHYARD_* environment variable overrides its matching key.

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "127.0.0.1"

# Port to listen on
port = 3100

# Hard ceiling on any single request's lifetime (milliseconds)
max_request_duration_ms = 120000

# How long in-flight requests may drain on shutdown before being aborted
drain_on_shutdown_ms = 3000

# ─────────────────────────────────────────────────────────────────────────────
# ENDPOINT POOL
#
# Priority: smaller = preferred. kind: "local" or "cloud" (drives the
# local-first balancer). Bearer secrets are named by auth_secret_ref and
# read from the environment, never from this file.
# ─────────────────────────────────────────────────────────────────────────────

[[endpoints]]
name = "local"
base_url = "http://127.0.0.1:1234/v1"
model = "qwen2.5-coder-14b"
priority = 1
max_context_tokens = 32768
max_response_tokens = 4096
kind = "local"
capabilities = ["code", "fim"]

[[endpoints]]
name = "cloud_a"
base_url = "https://api.example.com/v1"
model = "deepseek-chat"
priority = 2
max_context_tokens = 65536
max_response_tokens = 8192
auth_kind = "bearer"
auth_secret_ref = "CLOUD_A_API_KEY"
kind = "cloud"
capabilities = ["code", "reasoning", "large_context"]

[routing]
# Target fraction of traffic served locally (soft balancer, not a gate)
local_first_ratio = 0.95

# Base per-endpoint timeout; scaled up to complex_multiplier x for
# complex requests
request_timeout_base_ms = 25000
complex_multiplier = 3.0

# Demote the priority candidate when its success rate on a fingerprint
# drops below the threshold over at least empirical_min_samples tries
empirical_demote_threshold = 0.2
empirical_min_samples = 10

# Optional empirical-table snapshot, written on clean shutdown
# snapshot_path = "/var/lib/switchyard/empirical.json"

[health]
probe_interval_ms = 30000
probe_timeout_ms = 5000

[breaker]
failure_threshold = 5
open_ms = 60000
halfopen_successes = 3

[cache]
ttl_ms = 900000
max_bytes = 67108864
max_entries = 1024

[files]
max_file_bytes = 10485760
max_files = 50
concurrency = 5
workspace_root = "/workspace"
# Extra extensions beyond the built-in source/text set
# allowed_extensions = ["proto"]

[retry]
attempts = 2
base_ms = 100
cap_ms = 2000

[observability]
log_level = "info"
"#
}
