//! Builders
//!
//! Fluent builder patterns for orchestrator configuration.

pub mod config;

pub use config::{orchestrator_config, OrchestratorConfigBuilder};
