//! Metrics
//!
//! Orchestrator metrics collection interfaces and implementations.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Orchestrator metrics interface.
pub trait OrchestratorMetrics: Send + Sync {
    /// Record a finished request and its outcome (`success` or an error code).
    fn record_request(&self, method: &str, outcome: &str);

    /// Record one transport exchange.
    fn record_attempt(&self, method: &str);

    /// Record a scheduled retry.
    fn record_retry(&self, method: &str, error_code: &str, delay_ms: f64);

    /// Record a cache lookup.
    fn record_cache_lookup(&self, hit: bool);

    /// Record entries dropped after a successful write.
    fn record_cache_invalidation(&self, removed: usize);

    /// Record a completed token refresh.
    fn record_token_refresh(&self, success: bool);

    /// Record end-to-end request duration.
    fn record_request_duration(&self, method: &str, duration_ms: f64);

    /// Record time spent waiting for a gate slot.
    fn record_gate_wait(&self, wait_ms: f64);
}

/// No-op metrics implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl OrchestratorMetrics for NoOpMetrics {
    fn record_request(&self, _method: &str, _outcome: &str) {}
    fn record_attempt(&self, _method: &str) {}
    fn record_retry(&self, _method: &str, _error_code: &str, _delay_ms: f64) {}
    fn record_cache_lookup(&self, _hit: bool) {}
    fn record_cache_invalidation(&self, _removed: usize) {}
    fn record_token_refresh(&self, _success: bool) {}
    fn record_request_duration(&self, _method: &str, _duration_ms: f64) {}
    fn record_gate_wait(&self, _wait_ms: f64) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: u64,
}

/// In-memory metrics for testing.
#[derive(Default)]
pub struct InMemoryMetrics {
    entries: Mutex<Vec<MetricEntry>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded entries.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().clone()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Sum of the values recorded under `name`.
    pub fn total(&self, name: &str) -> f64 {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.value)
            .sum()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, name: &str, value: f64, labels: &[(&str, String)]) {
        let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        self.entries.lock().push(MetricEntry {
            name: name.to_string(),
            value,
            labels,
            timestamp,
        });
    }
}

impl OrchestratorMetrics for InMemoryMetrics {
    fn record_request(&self, method: &str, outcome: &str) {
        self.record(
            "api_requests_total",
            1.0,
            &[("method", method.to_string()), ("outcome", outcome.to_string())],
        );
    }

    fn record_attempt(&self, method: &str) {
        self.record("api_attempts_total", 1.0, &[("method", method.to_string())]);
    }

    fn record_retry(&self, method: &str, error_code: &str, delay_ms: f64) {
        self.record(
            "api_retries_total",
            1.0,
            &[("method", method.to_string()), ("error", error_code.to_string())],
        );
        self.record(
            "api_retry_delay_ms",
            delay_ms,
            &[("method", method.to_string())],
        );
    }

    fn record_cache_lookup(&self, hit: bool) {
        let name = if hit { "api_cache_hits_total" } else { "api_cache_misses_total" };
        self.record(name, 1.0, &[]);
    }

    fn record_cache_invalidation(&self, removed: usize) {
        self.record("api_cache_invalidated_total", removed as f64, &[]);
    }

    fn record_token_refresh(&self, success: bool) {
        self.record(
            "api_token_refreshes_total",
            1.0,
            &[("success", success.to_string())],
        );
    }

    fn record_request_duration(&self, method: &str, duration_ms: f64) {
        self.record(
            "api_request_duration_ms",
            duration_ms,
            &[("method", method.to_string())],
        );
    }

    fn record_gate_wait(&self, wait_ms: f64) {
        self.record("api_gate_wait_ms", wait_ms, &[]);
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}
