//! Configuration Builder
//!
//! Fluent builder for orchestrator configuration.

use std::time::Duration;

use crate::error::{ApiError, ConfigurationError};
use crate::types::OrchestratorConfig;

/// Orchestrator configuration builder.
#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    base_url: Option<String>,
    token_endpoint: Option<String>,
    client_id: Option<String>,
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Create new configuration builder with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL request paths resolve against.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set token endpoint.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the maximum number of simultaneous requests.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    /// Set the maximum attempts per request, counting the first.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_backoff(mut self, delay: Duration) -> Self {
        self.config.base_backoff = delay;
        self
    }

    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.config.max_backoff = delay;
        self
    }

    /// Enable or disable backoff jitter.
    pub fn backoff_jitter(mut self, enable: bool) -> Self {
        self.config.backoff_jitter = enable;
        self
    }

    /// Set cache entry lifetime.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set how long before expiry the access token is refreshed.
    pub fn refresh_early_margin(mut self, margin: Duration) -> Self {
        self.config.refresh_early_margin = margin;
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the largest accepted response body in bytes.
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.config.max_response_size = bytes;
        self
    }

    /// Build the orchestrator configuration.
    pub fn build(self) -> Result<OrchestratorConfig, ApiError> {
        let base_url = self.base_url.ok_or_else(|| {
            ApiError::Configuration(ConfigurationError::MissingRequired {
                field: "base_url".to_string(),
            })
        })?;

        let config = OrchestratorConfig {
            base_url,
            token_endpoint: self.token_endpoint,
            client_id: self.client_id,
            ..self.config
        };

        config.validate()?;
        Ok(config)
    }
}

/// Create a new orchestrator configuration builder.
pub fn orchestrator_config() -> OrchestratorConfigBuilder {
    OrchestratorConfigBuilder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENCY};

    #[test]
    fn test_builder_success() {
        let config = orchestrator_config()
            .base_url("https://api.example.com/v1")
            .token_endpoint("https://auth.example.com/token")
            .client_id("todo-app")
            .max_concurrency(4)
            .cache_ttl(Duration::from_secs(10))
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.client_id.as_deref(), Some("todo-app"));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.cache_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_builder_defaults() {
        let config = orchestrator_config()
            .base_url("https://api.example.com")
            .build()
            .unwrap();
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(config.backoff_jitter);
    }

    #[test]
    fn test_builder_missing_base_url() {
        let result = orchestrator_config().max_attempts(2).build();
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_builder_rejects_bad_base_url() {
        let result = orchestrator_config().base_url("not a url").build();
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::InvalidEndpoint { .. }))
        ));
    }

    #[test]
    fn test_builder_rejects_inverted_backoff() {
        let result = orchestrator_config()
            .base_url("https://api.example.com")
            .base_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_zero_attempts() {
        let result = orchestrator_config()
            .base_url("https://api.example.com")
            .max_attempts(0)
            .build();
        assert!(result.is_err());
    }
}
