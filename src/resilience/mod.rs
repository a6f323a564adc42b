//! Resilience
//!
//! Resilience patterns for outbound requests.
//!
//! This module provides:
//!
//! - **Retry**: Exponential backoff with jitter and server wait hints
//! - **Gate**: FIFO bound on simultaneous requests

pub mod gate;
pub mod retry;

// Retry
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, DEFAULT_RETRY_CONFIG};

// Gate
pub use gate::{ConcurrencyGate, GateStats, ScopedSlot};
