//! Request Orchestrator
//!
//! Public entry point composing the transport, retry policy, token manager,
//! concurrency gate and response cache.
//!
//! A request moves through these steps:
//!
//! 1. reads are answered from the cache when a fresh entry exists;
//! 2. a gate slot is acquired;
//! 3. the current access token is attached;
//! 4. the transport sends the request;
//! 5. a 401 forces one credential refresh and a single resend that does
//!    not count as an attempt;
//! 6. other transient failures are retried per the [`RetryPolicy`], with
//!    the slot released while backing off;
//! 7. on success reads populate the cache and writes invalidate it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheKey, ResponseCache};
use crate::core::{HttpMethod, HttpRequest, HttpTransport, ReqwestHttpTransport};
use crate::error::{ApiError, ApiResult, AuthError, ConfigurationError, ProtocolError};
use crate::resilience::{ConcurrencyGate, RetryPolicy};
use crate::telemetry::{NoOpMetrics, OrchestratorMetrics};
use crate::token::{HttpTokenRefresher, TokenManager};
use crate::types::{AccessToken, ApiResponse, OrchestratorConfig, RequestDescriptor, TokenPair};

/// Resilient REST client.
pub struct RequestOrchestrator<T: HttpTransport = ReqwestHttpTransport> {
    config: OrchestratorConfig,
    base_url: Url,
    transport: Arc<T>,
    tokens: TokenManager,
    gate: ConcurrencyGate,
    cache: ResponseCache,
    retry: RetryPolicy,
    metrics: Arc<dyn OrchestratorMetrics>,
}

impl RequestOrchestrator<ReqwestHttpTransport> {
    /// Create an orchestrator over HTTPS, refreshing credentials against
    /// the configured token endpoint.
    pub fn new(config: OrchestratorConfig, tokens: TokenPair) -> ApiResult<Self> {
        config.validate()?;
        let token_endpoint = config.token_endpoint.clone().ok_or_else(|| {
            ApiError::Configuration(ConfigurationError::MissingRequired {
                field: "token_endpoint".to_string(),
            })
        })?;

        let transport = Arc::new(ReqwestHttpTransport::with_options(
            config.request_timeout,
            config.max_response_size,
        )?);

        let mut refresher = HttpTokenRefresher::new(Arc::clone(&transport), token_endpoint)
            .with_timeout(config.request_timeout);
        if let Some(client_id) = &config.client_id {
            refresher = refresher.with_client_id(client_id.clone());
        }

        let tokens = TokenManager::new(config.token_manager_config(), Arc::new(refresher), tokens);
        Self::with_components(config, transport, tokens)
    }
}

impl<T: HttpTransport> RequestOrchestrator<T> {
    /// Create an orchestrator with a custom transport and token manager.
    pub fn with_components(
        config: OrchestratorConfig,
        transport: Arc<T>,
        tokens: TokenManager,
    ) -> ApiResult<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.base_url).map_err(|_| {
            ApiError::Configuration(ConfigurationError::InvalidEndpoint {
                url: config.base_url.clone(),
            })
        })?;

        Ok(Self {
            base_url,
            transport,
            tokens,
            gate: ConcurrencyGate::new(config.max_concurrency),
            cache: ResponseCache::new(config.cache_ttl),
            retry: RetryPolicy::new(config.retry_config()),
            metrics: Arc::new(NoOpMetrics),
            config,
        })
    }

    /// Report request metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn OrchestratorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get the token manager attaching credentials.
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Get the concurrency gate.
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Get the response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Execute a request.
    ///
    /// If the descriptor carries a cancellation token, cancelling it makes
    /// this return [`ApiError::Cancelled`] at whatever point the request
    /// has reached, releasing any queued or held gate slot. A credential
    /// refresh shared with other requests keeps running.
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn execute(&self, request: RequestDescriptor) -> ApiResult<ApiResponse> {
        let started = Instant::now();
        let method = request.method();

        let result = match request.cancellation_token().cloned() {
            Some(cancellation) => {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => Err(ApiError::Cancelled),
                    result = self.run(&request) => result,
                }
            }
            None => self.run(&request).await,
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .record_request_duration(method.as_str(), elapsed_ms);

        match &result {
            Ok(response) => {
                self.metrics.record_request(method.as_str(), "success");
                debug!(status = response.status, from_cache = response.from_cache, "request succeeded");
            }
            Err(ApiError::Cancelled) => {
                self.metrics.record_request(method.as_str(), ApiError::Cancelled.error_code());
                debug!("request cancelled");
            }
            Err(error) => {
                self.metrics.record_request(method.as_str(), error.error_code());
                warn!(error = %error, code = error.error_code(), "request failed");
            }
        }

        result
    }

    async fn run(&self, request: &RequestDescriptor) -> ApiResult<ApiResponse> {
        let cache_key = CacheKey::for_request(request);
        // Read before the lookup so a write finishing mid-flight voids the store.
        let generation = self.cache.generation();
        if let Some(key) = &cache_key {
            let hit = self.cache.get(key);
            self.metrics.record_cache_lookup(hit.is_some());
            if let Some(response) = hit {
                debug!("served from cache");
                return Ok(response);
            }
        }

        let http_request = self.build_http_request(request)?;
        let mut attempt: u32 = 1;

        loop {
            let error = match self.attempt(&http_request).await {
                Ok(response) => {
                    self.on_success(request, cache_key, generation, &response);
                    return Ok(response);
                }
                Err(error) => error,
            };

            let decision = self.retry.should_retry(attempt, &error);
            if !decision.retry {
                if error.is_retryable() {
                    return Err(ApiError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                return Err(error);
            }

            // No slot is held while backing off.
            warn!(
                attempt,
                delay_ms = decision.delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            self.metrics.record_retry(
                http_request.method.as_str(),
                error.error_code(),
                decision.delay.as_secs_f64() * 1000.0,
            );
            tokio::time::sleep(decision.delay).await;
            attempt += 1;
        }
    }

    /// One attempt, holding a gate slot for its whole duration.
    async fn attempt(&self, request: &HttpRequest) -> ApiResult<ApiResponse> {
        let queued = Instant::now();
        let _slot = self.gate.acquire().await?;
        self.metrics
            .record_gate_wait(queued.elapsed().as_secs_f64() * 1000.0);

        let token = self.tokens.get_access_token().await?;
        match self.send(request, &token).await {
            Err(ApiError::Auth(AuthError::Unauthorized)) => {
                debug!("request rejected as unauthorized, refreshing credentials");
                self.tokens.invalidate_if_current(&token).await;
                let fresh = self.tokens.get_access_token().await?;
                self.send(request, &fresh).await
            }
            other => other,
        }
    }

    async fn send(&self, request: &HttpRequest, token: &AccessToken) -> ApiResult<ApiResponse> {
        let mut request = request.clone();
        request
            .headers
            .insert("authorization".to_string(), token.bearer_header());

        self.metrics.record_attempt(request.method.as_str());
        let response = self.transport.send(request).await?;
        Ok(response.into())
    }

    fn on_success(
        &self,
        request: &RequestDescriptor,
        cache_key: Option<CacheKey>,
        generation: u64,
        response: &ApiResponse,
    ) {
        match cache_key {
            Some(key) => {
                if !self.cache.put_if_unchanged(key, response.clone(), generation) {
                    debug!("cache invalidated during request, response not cached");
                }
            }
            None if request.method().is_write() => {
                let removed = self.cache.invalidate_resource(request.path());
                self.metrics.record_cache_invalidation(removed);
            }
            None => {}
        }
    }

    fn build_http_request(&self, request: &RequestDescriptor) -> ApiResult<HttpRequest> {
        let mut url = self.base_url.clone();
        let path = format!("{}{}", url.path().trim_end_matches('/'), request.path());
        url.set_path(&path);
        if !request.query_params().is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .query_params()
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }

        let mut headers = HashMap::from([("accept".to_string(), "application/json".to_string())]);
        if request.payload().is_some() {
            headers.insert("content-type".to_string(), "application/json".to_string());
        }
        for (name, value) in request.headers().iter() {
            if name == "authorization" {
                debug!("ignoring caller-supplied authorization header");
                continue;
            }
            headers.insert(name.to_string(), value.to_string());
        }

        Ok(HttpRequest {
            method: request.method(),
            url: url.into(),
            headers,
            body: request.payload().map(|body| body.to_string()),
            timeout: Some(self.config.request_timeout),
        })
    }

    /// GET `path`.
    pub async fn get(&self, path: &str) -> ApiResult<ApiResponse> {
        self.execute(RequestDescriptor::get(path)).await
    }

    /// POST `body` to `path`.
    pub async fn post(&self, path: &str, body: serde_json::Value) -> ApiResult<ApiResponse> {
        self.execute(RequestDescriptor::post(path).body(body)).await
    }

    /// PUT `body` to `path`.
    pub async fn put(&self, path: &str, body: serde_json::Value) -> ApiResult<ApiResponse> {
        self.execute(RequestDescriptor::put(path).body(body)).await
    }

    /// PATCH `path` with `body`.
    pub async fn patch(&self, path: &str, body: serde_json::Value) -> ApiResult<ApiResponse> {
        self.execute(RequestDescriptor::patch(path).body(body)).await
    }

    /// DELETE `path`.
    pub async fn delete(&self, path: &str) -> ApiResult<ApiResponse> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> ApiResult<R> {
        self.get(path).await?.json()
    }

    /// Send `body` as JSON and decode the response. An empty response body
    /// decodes as JSON `null`, so `R = ()` accepts 204 No Content.
    pub async fn send_json<B, R>(&self, method: HttpMethod, path: &str, body: &B) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = RequestDescriptor::new(method, path).json(body)?;
        let response = self.execute(request).await?;
        if response.is_empty() {
            return serde_json::from_str("null").map_err(|e| {
                ApiError::Protocol(ProtocolError::InvalidJson {
                    message: e.to_string(),
                })
            });
        }
        response.json()
    }

    /// Stop admitting requests. Requests already holding a slot finish;
    /// queued and later requests fail with [`ApiError::GateClosed`].
    pub fn shutdown(&self) {
        info!("shutting down request orchestrator");
        self.gate.close();
    }
}

impl<T: HttpTransport> std::fmt::Debug for RequestOrchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("base_url", &self.base_url.as_str())
            .field("gate", &self.gate)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpResponse, MockHttpTransport};
    use crate::token::{MockTokenRefresher, TokenManagerConfig};
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(base_url: &str) -> RequestOrchestrator<MockHttpTransport> {
        let config = OrchestratorConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        let tokens = TokenManager::new(
            TokenManagerConfig::default(),
            Arc::new(MockTokenRefresher::new()),
            TokenPair::expiring_in("access-1", "refresh-1", Duration::from_secs(3600)),
        );
        RequestOrchestrator::with_components(config, Arc::new(MockHttpTransport::new()), tokens)
            .unwrap()
    }

    #[test]
    fn test_build_url_joins_base_path_and_query() {
        let orchestrator = orchestrator("https://api.example.com/v1/");
        let request = RequestDescriptor::get("/todos")
            .query("tag", "home & garden")
            .query("tag", "urgent");

        let http = orchestrator.build_http_request(&request).unwrap();
        assert_eq!(
            http.url,
            "https://api.example.com/v1/todos?tag=home+%26+garden&tag=urgent"
        );
        assert_eq!(http.header("accept"), Some("application/json"));
        assert!(http.header("content-type").is_none());
        assert!(http.body.is_none());
    }

    #[test]
    fn test_caller_headers_merge_beneath_authorization() {
        let orchestrator = orchestrator("https://api.example.com");
        let request = RequestDescriptor::post("/todos")
            .body(json!({"title": "x"}))
            .header("Authorization", "Bearer forged")
            .header("Accept", "application/vnd.todo+json")
            .header("X-Request-Id", "42");

        let http = orchestrator.build_http_request(&request).unwrap();
        assert!(http.header("authorization").is_none());
        assert_eq!(http.header("accept"), Some("application/vnd.todo+json"));
        assert_eq!(http.header("content-type"), Some("application/json"));
        assert_eq!(http.header("x-request-id"), Some("42"));
        assert_eq!(http.body.as_deref(), Some(r#"{"title":"x"}"#));
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let orchestrator = orchestrator("https://api.example.com");
        orchestrator
            .transport()
            .queue_response(HttpResponse::ok_json(&json!([])));

        let response = orchestrator.get("/todos").await.unwrap();
        assert_eq!(response.status, 200);

        let sent = orchestrator.transport().get_last_request().unwrap();
        assert_eq!(sent.header("authorization"), Some("Bearer access-1"));
        assert_eq!(sent.timeout, Some(orchestrator.config().request_timeout));
    }

    #[tokio::test]
    async fn test_send_json_accepts_empty_body() {
        let orchestrator = orchestrator("https://api.example.com");
        orchestrator.transport().queue_status(204);

        let result: ApiResult<()> = orchestrator
            .send_json(HttpMethod::Delete, "/todos/1", &json!({}))
            .await;
        assert!(result.is_ok());
        assert_eq!(orchestrator.transport().request_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_requests() {
        let orchestrator = orchestrator("https://api.example.com");
        orchestrator.shutdown();

        let result = orchestrator.delete("/todos/1").await;
        assert!(matches!(result, Err(ApiError::GateClosed)));
        assert_eq!(orchestrator.transport().request_count(), 0);
    }

    #[test]
    fn test_with_components_rejects_bad_config() {
        let tokens = TokenManager::logged_out(
            TokenManagerConfig::default(),
            Arc::new(MockTokenRefresher::new()),
        );
        let config = OrchestratorConfig {
            base_url: "https://api.example.com".to_string(),
            max_attempts: 0,
            ..Default::default()
        };
        let result =
            RequestOrchestrator::with_components(config, Arc::new(MockHttpTransport::new()), tokens);
        assert!(result.is_err());
    }
}
