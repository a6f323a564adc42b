//! Configuration Types
//!
//! Orchestrator configuration and its defaults.

use std::time::Duration;

use crate::core::DEFAULT_MAX_RESPONSE_SIZE;
use crate::error::{ApiError, ConfigurationError};
use crate::resilience::RetryConfig;
use crate::token::TokenManagerConfig;

/// Default configuration values.
pub const DEFAULT_MAX_CONCURRENCY: usize = 6;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 200;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_REFRESH_EARLY_MARGIN_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Prefix of the environment variables read by [`OrchestratorConfig::from_env`].
pub const ENV_PREFIX: &str = "ORCHESTRATOR_";

/// Request orchestrator configuration.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Base URL every request path is resolved against.
    pub base_url: String,
    /// OAuth2 token endpoint used for refresh (optional when a custom
    /// refresher is injected).
    pub token_endpoint: Option<String>,
    /// Client identifier sent with refresh requests (public clients).
    pub client_id: Option<String>,
    /// Maximum simultaneous outbound requests.
    pub max_concurrency: usize,
    /// Maximum attempts per request, counting the first.
    pub max_attempts: u32,
    /// Base delay of the exponential backoff.
    pub base_backoff: Duration,
    /// Upper bound for computed backoff delays.
    pub max_backoff: Duration,
    /// Add random jitter to backoff delays.
    pub backoff_jitter: bool,
    /// Lifetime of cached read responses.
    pub cache_ttl: Duration,
    /// Refresh the access token this long before it expires.
    pub refresh_early_margin: Duration,
    /// HTTP timeout per exchange.
    pub request_timeout: Duration,
    /// Largest response body accepted.
    pub max_response_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_endpoint: None,
            client_id: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            backoff_jitter: true,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            refresh_early_margin: Duration::from_secs(DEFAULT_REFRESH_EARLY_MARGIN_SECS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration from `ORCHESTRATOR_*` environment variables.
    ///
    /// `ORCHESTRATOR_BASE_URL` is required; every other variable falls back
    /// to its default.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let base_url = var("BASE_URL").ok_or_else(|| {
            ApiError::Configuration(ConfigurationError::MissingRequired {
                field: format!("{}BASE_URL", ENV_PREFIX),
            })
        })?;

        let defaults = Self::default();
        let config = Self {
            base_url,
            token_endpoint: var("TOKEN_ENDPOINT"),
            client_id: var("CLIENT_ID"),
            max_concurrency: parse_var(&var, "MAX_CONCURRENCY")?
                .unwrap_or(defaults.max_concurrency),
            max_attempts: parse_var(&var, "MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_backoff: parse_var(&var, "BASE_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_backoff),
            max_backoff: parse_var(&var, "MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            backoff_jitter: parse_var(&var, "BACKOFF_JITTER")?.unwrap_or(defaults.backoff_jitter),
            cache_ttl: parse_var(&var, "CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            refresh_early_margin: parse_var(&var, "REFRESH_MARGIN_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_early_margin),
            request_timeout: parse_var(&var, "TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            max_response_size: parse_var(&var, "MAX_RESPONSE_SIZE")?
                .unwrap_or(defaults.max_response_size),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants every component relies on.
    pub fn validate(&self) -> Result<(), ApiError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigurationError::InvalidEndpoint {
                url: self.base_url.clone(),
            }
            .into());
        }
        if let Some(endpoint) = &self.token_endpoint {
            if url::Url::parse(endpoint).is_err() {
                return Err(ConfigurationError::InvalidEndpoint {
                    url: endpoint.clone(),
                }
                .into());
            }
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        if self.base_backoff > self.max_backoff {
            return Err(invalid("base_backoff must not exceed max_backoff"));
        }
        Ok(())
    }

    /// Retry settings derived from this configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_backoff: self.base_backoff,
            max_backoff: self.max_backoff,
            jitter: self.backoff_jitter,
        }
    }

    /// Token manager settings derived from this configuration.
    pub fn token_manager_config(&self) -> TokenManagerConfig {
        TokenManagerConfig {
            refresh_early_margin: self.refresh_early_margin,
        }
    }
}

fn invalid(message: &str) -> ApiError {
    ApiError::Configuration(ConfigurationError::InvalidConfig {
        message: message.to_string(),
    })
}

fn parse_var<T, F>(var: &F, name: &str) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            invalid(&format!("{}{} has an invalid value: {}", ENV_PREFIX, name, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let config =
            OrchestratorConfig::from_lookup(lookup(&[("ORCHESTRATOR_BASE_URL", "https://api.example.com")]))
                .unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.cache_ttl, Duration::from_secs(DEFAULT_CACHE_TTL_SECS));
        assert!(config.token_endpoint.is_none());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("ORCHESTRATOR_BASE_URL", "https://api.example.com"),
            ("ORCHESTRATOR_TOKEN_ENDPOINT", "https://auth.example.com/token"),
            ("ORCHESTRATOR_MAX_CONCURRENCY", "2"),
            ("ORCHESTRATOR_MAX_ATTEMPTS", "5"),
            ("ORCHESTRATOR_BASE_BACKOFF_MS", "50"),
            ("ORCHESTRATOR_CACHE_TTL_SECS", "5"),
            ("ORCHESTRATOR_BACKOFF_JITTER", "false"),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(50));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert!(!config.backoff_jitter);
        assert_eq!(
            config.token_endpoint.as_deref(),
            Some("https://auth.example.com/token")
        );
    }

    #[test]
    fn test_from_lookup_requires_base_url() {
        let result = OrchestratorConfig::from_lookup(lookup(&[]));
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = OrchestratorConfig::from_lookup(lookup(&[
            ("ORCHESTRATOR_BASE_URL", "https://api.example.com"),
            ("ORCHESTRATOR_MAX_ATTEMPTS", "many"),
        ]));
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = OrchestratorConfig {
            base_url: "https://api.example.com".to_string(),
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
