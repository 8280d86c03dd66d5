//! Telemetry and observability setup
//!
//! Structured logging for the routing pipeline. Spans and events use a
//! small set of shared field names so one request can be followed across
//! components: `request_id` (correlation), `endpoint_name` (which
//! upstream), `fingerprint` (cache/learner key), and `outcome` (attempt
//! taxonomy). New code should reuse these names rather than inventing
//! variants.
//!
//! `RUST_LOG` always wins. Without it, the filter runs Switchyard at the
//! configured level, keeps tower's HTTP traces visible, and quiets the
//! HTTP client internals, whose connection churn would otherwise drown
//! the routing signal during failover storms.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Per-target levels applied alongside Switchyard's own level.
const TARGET_LEVELS: &[(&str, &str)] = &[
    ("tower_http", "debug"),
    ("hyper", "warn"),
    ("reqwest", "warn"),
];

/// Build the default filter directives for a given Switchyard level.
fn directives(level: &str) -> String {
    let mut parts = Vec::with_capacity(TARGET_LEVELS.len() + 1);
    parts.push(format!("switchyard={}", level));
    for (target, target_level) in TARGET_LEVELS {
        parts.push(format!("{}={}", target, target_level));
    }
    parts.join(",")
}

/// Initialize the tracing subscriber for structured logging.
///
/// This can only be called once per process; subsequent calls are
/// silently ignored, so tests and embedded uses may call it freely.
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    });
}
