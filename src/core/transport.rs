//! HTTP Transport
//!
//! HTTP client interface and implementations. A transport performs exactly
//! one wire exchange and applies no retry or authentication policy.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{ApiError, ConfigurationError, NetworkError, ProtocolError, TransportError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute request URL, query string included.
    pub url: String,
    /// Request headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers.get(&name).map(String::as_str)
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Non-mutating methods; only these are cached.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get)
    }

    /// Mutating methods; a successful write invalidates cached reads.
    pub fn is_write(&self) -> bool {
        !self.is_read()
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text.
    pub status_text: String,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status, body.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    /// Create a 200 JSON response.
    pub fn ok_json(body: &serde_json::Value) -> Self {
        Self::json(200, body)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request. Non-2xx responses are returned as
    /// [`TransportError::Status`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

/// Default maximum response size (10 MiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, ApiError> {
        Self::with_options(Duration::from_secs(30), DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                ApiError::Configuration(ConfigurationError::InvalidConfig {
                    message: format!("failed to create HTTP client: {}", e),
                })
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout { timeout }
            } else {
                NetworkError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge { size: len as usize }.into());
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::from(NetworkError::Timeout { timeout })
            } else {
                TransportError::from(ProtocolError::InvalidResponse {
                    message: e.to_string(),
                })
            }
        })?;

        if body.len() > self.max_response_size {
            return Err(ProtocolError::ResponseTooLarge { size: body.len() }.into());
        }

        if !(200..300).contains(&status) {
            return Err(TransportError::Status {
                status,
                headers,
                body,
            });
        }

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

/// A request seen by [`MockHttpTransport`], with the instant it arrived.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Instant,
}

/// Mock HTTP transport for testing.
///
/// Scripted outcomes are served in the order they were queued; once the
/// queue is empty the default outcome (if any) is returned.
#[derive(Default)]
pub struct MockHttpTransport {
    outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    default_outcome: Mutex<Option<Result<HttpResponse, TransportError>>>,
    request_history: Mutex<Vec<RecordedRequest>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        self.outcomes.lock().push_back(Ok(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        if (200..300).contains(&status) {
            self.queue_response(HttpResponse::json(status, body))
        } else {
            self.queue_error(TransportError::status(status, body.to_string()))
        }
    }

    /// Queue a transport failure.
    pub fn queue_error(&self, error: TransportError) -> &Self {
        self.outcomes.lock().push_back(Err(error));
        self
    }

    /// Queue a bare status; 2xx becomes a response, anything else an error.
    pub fn queue_status(&self, status: u16) -> &Self {
        if (200..300).contains(&status) {
            self.queue_response(HttpResponse::new(status, ""))
        } else {
            self.queue_error(TransportError::status(status, ""))
        }
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: HttpResponse) -> &Self {
        *self.default_outcome.lock() = Some(Ok(response));
        self
    }

    /// Delay every exchange by `latency`.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history
            .lock()
            .iter()
            .map(|recorded| recorded.request.clone())
            .collect()
    }

    /// Get request history with arrival instants.
    pub fn get_recorded_requests(&self) -> Vec<RecordedRequest> {
        self.request_history.lock().clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history
            .lock()
            .last()
            .map(|recorded| recorded.request.clone())
    }

    /// Number of exchanges performed.
    pub fn request_count(&self) -> usize {
        self.request_history.lock().len()
    }

    /// Exchanges currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous exchanges observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        self.request_history.lock().clear();
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.request_history.lock().push(RecordedRequest {
            request,
            at: Instant::now(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .or_else(|| self.default_outcome.lock().clone());

        outcome.unwrap_or_else(|| {
            Err(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }
            .into())
        })
    }
}

/// Create production HTTP transport.
pub fn create_transport(
    timeout: Option<Duration>,
) -> Result<ReqwestHttpTransport, ApiError> {
    match timeout {
        Some(t) => ReqwestHttpTransport::with_options(t, DEFAULT_MAX_RESPONSE_SIZE),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_mock_transport_serves_in_queue_order() {
        let transport = MockHttpTransport::new();
        transport
            .queue_status(500)
            .queue_json_response(200, &serde_json::json!({"key": "value"}));

        let first = transport.send(get("https://example.com/a")).await;
        assert!(matches!(
            first,
            Err(TransportError::Status { status: 500, .. })
        ));

        let second = transport.send(get("https://example.com/b")).await.unwrap();
        assert_eq!(second.status, 200);
        assert!(second.body.contains("value"));

        let history = transport.get_requests();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].url, "https://example.com/a");
    }

    #[tokio::test]
    async fn test_mock_transport_without_script_fails_to_connect() {
        let transport = MockHttpTransport::new();
        let result = transport.send(get("https://example.com")).await;
        assert!(matches!(
            result,
            Err(TransportError::Network(NetworkError::ConnectionFailed { .. }))
        ));
    }

    #[test]
    fn test_http_method_properties() {
        assert_eq!(HttpMethod::Patch.as_str(), "PATCH");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert!(HttpMethod::Get.is_read());
        assert!(HttpMethod::Post.is_write());
        assert!(HttpMethod::Put.is_write());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut request = get("https://example.com");
        request
            .headers
            .insert("authorization".to_string(), "Bearer abc".to_string());
        assert_eq!(request.header("Authorization"), Some("Bearer abc"));
    }
}
