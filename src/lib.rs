//! REST Request Orchestrator
//!
//! Resilient client-side orchestration for a JSON REST API: bounded
//! concurrency, retries with backoff, single-flight credential refresh and
//! response caching.
//!
//! # Features
//!
//! - Bounded concurrency with FIFO admission
//! - Exponential backoff with jitter, honoring `Retry-After`
//! - Bearer credentials refreshed once however many requests need them
//! - Transparent resend after a 401
//! - TTL cache for reads, invalidated by writes
//! - Cancellation at any point of a request
//!
//! # Example
//!
//! ```rust,ignore
//! use rest_orchestrator::{orchestrator_config, RequestDescriptor, RequestOrchestrator, TokenPair};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = orchestrator_config()
//!         .base_url("https://api.example.com/v1")
//!         .token_endpoint("https://auth.example.com/oauth/token")
//!         .client_id("todo-app")
//!         .max_concurrency(4)
//!         .build()?;
//!
//!     let tokens = TokenPair::expiring_in("access", "refresh", Duration::from_secs(3600));
//!     let api = RequestOrchestrator::new(config, tokens)?;
//!
//!     let todos: Vec<serde_json::Value> = api.get_json("/todos").await?;
//!     println!("{} todos", todos.len());
//!
//!     api.execute(RequestDescriptor::delete("/todos/1")).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: Request, response, credential and configuration types
//! - `error`: Error hierarchy and response classification
//! - `core`: HTTP transport
//! - `resilience`: Retry policy and concurrency gate
//! - `token`: Token manager and refresher
//! - `cache`: Response cache
//! - `builders`: Fluent builder for configuration
//! - `telemetry`: Metrics
//! - `client`: The request orchestrator combining all of the above

pub mod builders;
pub mod cache;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main client
pub use client::RequestOrchestrator;

// Re-export builders
pub use builders::{orchestrator_config, OrchestratorConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, parse_retry_after, ApiError, ApiResult, AuthError,
    ConfigurationError, NetworkError, ProtocolError, TransportError,
};

// Re-export types
pub use types::{
    // Config
    OrchestratorConfig,
    // Request / response
    ApiResponse, HeaderSet, RequestDescriptor,
    // Token
    AccessToken, TokenPair, TokenResponse,
};

// Re-export core components
pub use core::{
    create_mock_transport, create_transport, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MockHttpTransport, RecordedRequest, ReqwestHttpTransport,
};

// Re-export token management
pub use token::{
    create_mock_token_refresher, HttpTokenRefresher, MockTokenRefresher, TokenManager,
    TokenManagerConfig, TokenRefresher,
};

// Re-export resilience
pub use resilience::{
    ConcurrencyGate, GateStats, RetryConfig, RetryDecision, RetryPolicy, ScopedSlot,
    DEFAULT_RETRY_CONFIG,
};

// Re-export cache
pub use cache::{CacheEntry, CacheKey, CacheStats, ResponseCache};

// Re-export telemetry
pub use telemetry::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, MetricEntry, MetricLabels,
    NoOpMetrics, OrchestratorMetrics,
};

// Re-export cancellation handle
pub use tokio_util::sync::CancellationToken;
