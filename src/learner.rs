//! Empirical routing table
//!
//! Records execution outcomes per request fingerprint and endpoint, and
//! feeds advisory ranking signals back into the router. The learner never
//! vetoes an endpoint; it only reorders candidates and supplies routing
//! hints for error messages.
//!
//! Reads take a snapshot through the concurrent map; writes are serialized
//! per fingerprint by the map's shard locking. The table is bounded: the
//! least-recently-updated entries are evicted past the cap.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Exponential weight for the running latency average.
const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Running outcome statistics for one endpoint under one fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointStats {
    pub total: u64,
    pub successes: u64,
    pub avg_latency_ms: f64,
    pub failure_breakdown: BTreeMap<String, u64>,
}

impl EndpointStats {
    fn record(&mut self, success: bool, latency_ms: Option<u64>, failure_kind: Option<&str>) {
        self.total += 1;
        if success {
            self.successes += 1;
            if let Some(ms) = latency_ms {
                if self.successes == 1 {
                    self.avg_latency_ms = ms as f64;
                } else {
                    self.avg_latency_ms = self.avg_latency_ms * (1.0 - LATENCY_EWMA_ALPHA)
                        + ms as f64 * LATENCY_EWMA_ALPHA;
                }
            }
        } else if let Some(kind) = failure_kind {
            *self.failure_breakdown.entry(kind.to_string()).or_default() += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64
        }
    }
}

/// All observations for one fingerprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmpiricalEntry {
    pub total: u64,
    pub per_endpoint: BTreeMap<String, EndpointStats>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Summary row for the status tool.
#[derive(Debug, Clone, Serialize)]
pub struct PatternSummary {
    pub fingerprint_hash: String,
    pub total: u64,
    pub best_endpoint: Option<String>,
    pub best_success_rate: Option<f64>,
}

/// The bounded, concurrent empirical table.
#[derive(Debug)]
pub struct EmpiricalLearner {
    table: DashMap<String, EmpiricalEntry>,
    max_entries: usize,
}

impl EmpiricalLearner {
    pub fn new(max_entries: usize) -> Self {
        Self {
            table: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Record one execution outcome. Writes for the same fingerprint are
    /// serialized; distinct fingerprints proceed independently.
    pub fn record(
        &self,
        fingerprint_hash: &str,
        endpoint: &str,
        success: bool,
        latency_ms: Option<u64>,
        failure_kind: Option<&str>,
    ) {
        {
            let mut entry = self.table.entry(fingerprint_hash.to_string()).or_default();
            entry.total += 1;
            entry.last_update = Some(Utc::now());
            entry
                .per_endpoint
                .entry(endpoint.to_string())
                .or_default()
                .record(success, latency_ms, failure_kind);
        }

        if self.table.len() > self.max_entries {
            self.evict_oldest();
        }
    }

    /// Success rate and sample count for one (fingerprint, endpoint) pair.
    pub fn endpoint_stats(&self, fingerprint_hash: &str, endpoint: &str) -> Option<(f64, u64)> {
        let entry = self.table.get(fingerprint_hash)?;
        let stats = entry.per_endpoint.get(endpoint)?;
        Some((stats.success_rate(), stats.total))
    }

    /// The historically best endpoint for a fingerprint, if any endpoint
    /// has at least `min_samples` observations. Used for routing hints in
    /// error messages.
    pub fn suggest(&self, fingerprint_hash: &str, min_samples: u64) -> Option<String> {
        let entry = self.table.get(fingerprint_hash)?;
        entry
            .per_endpoint
            .iter()
            .filter(|(_, stats)| stats.total >= min_samples)
            .max_by(|(_, a), (_, b)| {
                a.success_rate()
                    .partial_cmp(&b.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(name, _)| name.clone())
    }

    /// Aggregate observation count for a fingerprint.
    pub fn observations(&self, fingerprint_hash: &str) -> u64 {
        self.table
            .get(fingerprint_hash)
            .map(|e| e.total)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Top fingerprints by observation count, for the status tool.
    pub fn top_patterns(&self, n: usize) -> Vec<PatternSummary> {
        let mut rows: Vec<PatternSummary> = self
            .table
            .iter()
            .map(|kv| {
                let best = kv
                    .value()
                    .per_endpoint
                    .iter()
                    .max_by(|(_, a), (_, b)| {
                        a.success_rate()
                            .partial_cmp(&b.success_rate())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                PatternSummary {
                    fingerprint_hash: kv.key().clone(),
                    total: kv.value().total,
                    best_endpoint: best.map(|(name, _)| name.clone()),
                    best_success_rate: best.map(|(_, s)| s.success_rate()),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total));
        rows.truncate(n);
        rows
    }

    fn evict_oldest(&self) {
        while self.table.len() > self.max_entries {
            let oldest = self
                .table
                .iter()
                .min_by_key(|kv| kv.value().last_update)
                .map(|kv| kv.key().clone());
            match oldest {
                Some(key) => {
                    self.table.remove(&key);
                    tracing::debug!(fingerprint = %key, "Evicted least-recently-updated empirical entry");
                }
                None => break,
            }
        }
    }

    /// Best-effort JSON snapshot. Failures are logged, never fatal.
    pub fn snapshot_to(&self, path: &Path) -> std::io::Result<()> {
        let entries: BTreeMap<String, EmpiricalEntry> = self
            .table
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&entries)?;
        std::fs::write(path, json)?;
        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            "Empirical snapshot written"
        );
        Ok(())
    }

    /// Load a snapshot written by `snapshot_to`. Absence or corruption is
    /// tolerated by starting empty.
    pub fn load_from(&self, path: &Path) {
        let entries: BTreeMap<String, EmpiricalEntry> = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Empirical snapshot is corrupt, discarding"
                    );
                    return;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Empirical snapshot unreadable, discarding"
                );
                return;
            }
        };

        let count = entries.len();
        for (key, value) in entries {
            self.table.insert(key, value);
        }
        tracing::info!(entries = count, "Empirical snapshot loaded");
    }
}
