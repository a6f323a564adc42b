//! Token Types
//!
//! Credential types owned by the token manager.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Token response from an OAuth2 token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Rotated refresh token, if the provider issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Access/refresh credential pair with absolute expiry.
#[derive(Clone)]
pub struct TokenPair {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// Create a new token pair.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            refresh_token: SecretString::new(refresh_token.into()),
            expires_at,
        }
    }

    /// Create a pair that expires `lifetime` from now.
    pub fn expiring_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        let lifetime = ChronoDuration::from_std(lifetime).unwrap_or(ChronoDuration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(access_token, refresh_token, expires_at)
    }

    /// Build from a token endpoint response. A missing refresh token keeps
    /// `previous_refresh`.
    pub fn from_response(response: TokenResponse, previous_refresh: &SecretString) -> Self {
        let lifetime =
            Duration::from_secs(response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        let refresh = response
            .refresh_token
            .unwrap_or_else(|| previous_refresh.expose_secret().clone());
        Self::expiring_in(response.access_token, refresh, lifetime)
    }

    /// Access token for the Authorization header.
    pub fn access_token(&self) -> AccessToken {
        AccessToken {
            value: self.access_token.clone(),
        }
    }

    pub fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if token is expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if token expires within `margin` from now.
    pub fn is_expiring_within(&self, margin: Duration) -> bool {
        match ChronoDuration::from_std(margin) {
            Ok(margin) => match Utc::now().checked_add_signed(margin) {
                Some(deadline) => self.expires_at <= deadline,
                None => true,
            },
            Err(_) => true,
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Access token wrapper for safe handling.
#[derive(Clone)]
pub struct AccessToken {
    value: SecretString,
}

impl AccessToken {
    /// Get token value.
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// Format as Authorization header value.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value.expose_secret())
    }
}

impl PartialEq for AccessToken {
    fn eq(&self, other: &Self) -> bool {
        self.secret() == other.secret()
    }
}

impl Eq for AccessToken {}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .finish()
    }
}
