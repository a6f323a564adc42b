//! Telemetry
//!
//! Observability components for orchestrated requests.
//!
//! Structured logging goes through `tracing` directly; installing a
//! subscriber is left to the application. This module holds the metrics
//! seam.

pub mod metrics;

pub use metrics::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, OrchestratorMetrics,
};
