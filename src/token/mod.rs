//! Token Management
//!
//! Credential lifecycle for orchestrated requests.
//!
//! This module provides:
//!
//! - **Token Manager**: Owns the credential pair; single-flight refresh
//! - **Token Refresher**: The refresh exchange itself (OAuth2 or mock)

pub mod manager;
pub mod refresher;

// Token Manager
pub use manager::{TokenManager, TokenManagerConfig};

// Token Refresher
pub use refresher::{
    create_mock_token_refresher, HttpTokenRefresher, MockTokenRefresher, TokenRefresher,
};
