//! Response Types

use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::core::HttpResponse;
use crate::error::{ApiError, ProtocolError};

/// Snapshot of a successful response, as returned to callers and cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
    /// Whether the snapshot was served from the response cache.
    pub from_cache: bool,
}

impl ApiResponse {
    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }

    /// Check whether the body is empty (e.g. 204 No Content).
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }
}

impl From<HttpResponse> for ApiResponse {
    fn from(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            from_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Todo {
        id: u32,
        title: String,
    }

    #[test]
    fn test_json_decoding() {
        let response: ApiResponse =
            HttpResponse::ok_json(&serde_json::json!({"id": 1, "title": "Test"})).into();

        let todo: Todo = response.json().unwrap();
        assert_eq!(
            todo,
            Todo {
                id: 1,
                title: "Test".to_string()
            }
        );
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert!(!response.from_cache);
    }

    #[test]
    fn test_bad_json_is_protocol_error() {
        let response: ApiResponse = HttpResponse::new(200, "not json").into();
        let result: Result<Todo, _> = response.json();
        assert!(matches!(
            result,
            Err(ApiError::Protocol(ProtocolError::InvalidJson { .. }))
        ));
    }
}
