//! Token Refresher
//!
//! The network call that exchanges a refresh token for a new pair.

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{AuthError, TransportError};
use crate::types::{TokenPair, TokenResponse};

/// Token refresher interface.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new credential pair.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError>;
}

/// OAuth2 `refresh_token` grant against a token endpoint.
pub struct HttpTokenRefresher<T: HttpTransport> {
    transport: Arc<T>,
    token_endpoint: String,
    client_id: Option<String>,
    timeout: Option<Duration>,
}

impl<T: HttpTransport> HttpTokenRefresher<T> {
    /// Create new refresher.
    pub fn new(transport: Arc<T>, token_endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            token_endpoint: token_endpoint.into(),
            client_id: None,
            timeout: None,
        }
    }

    /// Send `client_id` with each refresh (public clients).
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build_request_body(&self, refresh_token: &SecretString) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "refresh_token");
        form.append_pair("refresh_token", refresh_token.expose_secret());
        if let Some(client_id) = &self.client_id {
            form.append_pair("client_id", client_id);
        }
        form.finish()
    }

    fn build_request_headers() -> HashMap<String, String> {
        HashMap::from([
            (
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            ("accept".to_string(), "application/json".to_string()),
        ])
    }
}

#[async_trait]
impl<T: HttpTransport> TokenRefresher for HttpTokenRefresher<T> {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.token_endpoint.clone(),
            headers: Self::build_request_headers(),
            body: Some(self.build_request_body(refresh_token)),
            timeout: self.timeout,
        };

        debug!(endpoint = %self.token_endpoint, "requesting token refresh");

        let response = self.transport.send(request).await.map_err(|e| match e {
            TransportError::Status { status, body, .. } => AuthError::RefreshFailed {
                message: format!("token endpoint returned {}: {}", status, body),
            },
            other => AuthError::RefreshFailed {
                message: other.to_string(),
            },
        })?;

        let token_response: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| AuthError::RefreshFailed {
                message: format!("invalid token response: {}", e),
            })?;

        Ok(TokenPair::from_response(token_response, refresh_token))
    }
}

/// Mock token refresher for testing.
///
/// Scripted outcomes are served in order; with an empty queue each call
/// issues `refreshed-token-<n>` valid for an hour.
#[derive(Default)]
pub struct MockTokenRefresher {
    outcomes: Mutex<VecDeque<Result<TokenPair, AuthError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    history: Mutex<Vec<String>>,
}

impl MockTokenRefresher {
    /// Create new mock refresher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful refresh.
    pub fn queue_tokens(&self, tokens: TokenPair) -> &Self {
        self.outcomes.lock().push_back(Ok(tokens));
        self
    }

    /// Queue a failed refresh.
    pub fn queue_error(&self, error: AuthError) -> &Self {
        self.outcomes.lock().push_back(Err(error));
        self
    }

    /// Delay every refresh by `delay`.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Number of refresh calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in call order.
    pub fn get_history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.history
            .lock()
            .push(refresh_token.expose_secret().clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcomes.lock().pop_front();
        outcome.unwrap_or_else(|| {
            Ok(TokenPair::expiring_in(
                format!("refreshed-token-{}", call),
                refresh_token.expose_secret().clone(),
                Duration::from_secs(3600),
            ))
        })
    }
}

/// Create mock token refresher for testing.
pub fn create_mock_token_refresher() -> MockTokenRefresher {
    MockTokenRefresher::new()
}
