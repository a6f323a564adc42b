//! Token Manager
//!
//! Owns the credential pair and coordinates refreshing it. However many
//! callers need a fresh token at once, at most one refresh is in flight;
//! every caller that arrives while it runs awaits the same outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::telemetry::{NoOpMetrics, OrchestratorMetrics};
use crate::token::TokenRefresher;
use crate::types::{AccessToken, TokenPair, DEFAULT_REFRESH_EARLY_MARGIN_SECS};

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Refresh this long before the access token expires.
    pub refresh_early_margin: Duration,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            refresh_early_margin: Duration::from_secs(DEFAULT_REFRESH_EARLY_MARGIN_SECS),
        }
    }
}

type RefreshOutcome = Result<TokenPair, AuthError>;
type RefreshSlot = watch::Receiver<Option<RefreshOutcome>>;

enum RefreshState {
    Idle,
    InProgress(RefreshSlot),
}

impl RefreshState {
    /// Receiver of a refresh that can still deliver a result.
    fn joinable(&self) -> Option<RefreshSlot> {
        match self {
            // A closed sender means the refresh task died without reporting.
            Self::InProgress(rx) if rx.has_changed().is_ok() => Some(rx.clone()),
            _ => None,
        }
    }
}

struct ManagerState {
    tokens: Option<TokenPair>,
    invalidated: bool,
    /// Bumped whenever credentials are replaced from outside a refresh, so a
    /// refresh started earlier does not overwrite them.
    generation: u64,
    refresh: RefreshState,
}

struct Inner {
    config: TokenManagerConfig,
    refresher: Arc<dyn TokenRefresher>,
    metrics: Arc<dyn OrchestratorMetrics>,
    state: Mutex<ManagerState>,
    refresh_count: AtomicU64,
}

/// Credential owner with single-flight refresh.
///
/// Cloning yields a handle to the same manager.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    /// Create a manager holding `tokens`.
    pub fn new(
        config: TokenManagerConfig,
        refresher: Arc<dyn TokenRefresher>,
        tokens: TokenPair,
    ) -> Self {
        Self::build(config, refresher, Some(tokens), Arc::new(NoOpMetrics))
    }

    /// Create a manager with no credentials; requests fail with
    /// [`AuthError::NotAuthenticated`] until [`set_tokens`](Self::set_tokens).
    pub fn logged_out(config: TokenManagerConfig, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::build(config, refresher, None, Arc::new(NoOpMetrics))
    }

    fn build(
        config: TokenManagerConfig,
        refresher: Arc<dyn TokenRefresher>,
        tokens: Option<TokenPair>,
        metrics: Arc<dyn OrchestratorMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                refresher,
                metrics,
                state: Mutex::new(ManagerState {
                    tokens,
                    invalidated: false,
                    generation: 0,
                    refresh: RefreshState::Idle,
                }),
                refresh_count: AtomicU64::new(0),
            }),
        }
    }

    /// Report refresh outcomes to `metrics`.
    ///
    /// Takes effect only before the handle is cloned.
    pub fn with_metrics(mut self, metrics: Arc<dyn OrchestratorMetrics>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.metrics = metrics,
            None => warn!("token manager already shared, metrics not attached"),
        }
        self
    }

    pub fn config(&self) -> &TokenManagerConfig {
        &self.inner.config
    }

    /// Get a usable access token.
    ///
    /// Returns the current token unless it is within the early-refresh
    /// margin of expiry or has been invalidated; otherwise joins the
    /// in-flight refresh or starts one.
    pub async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            match state.refresh.joinable() {
                Some(rx) => rx,
                None => {
                    let tokens = state.tokens.as_ref().ok_or(AuthError::NotAuthenticated)?;
                    if !state.invalidated
                        && !tokens.is_expiring_within(self.inner.config.refresh_early_margin)
                    {
                        return Ok(tokens.access_token());
                    }
                    debug!(
                        invalidated = state.invalidated,
                        "access token needs refresh"
                    );
                    self.start_refresh(&mut state)?
                }
            }
        };

        Self::await_refresh(rx).await.map(|pair| pair.access_token())
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn refresh(&self) -> Result<TokenPair, AuthError> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            match state.refresh.joinable() {
                Some(rx) => rx,
                None => self.start_refresh(&mut state)?,
            }
        };

        Self::await_refresh(rx).await
    }

    /// Force the next [`get_access_token`](Self::get_access_token) to refresh.
    pub async fn invalidate(&self) {
        let mut state = self.inner.state.lock().await;
        if state.tokens.is_some() {
            state.invalidated = true;
        }
    }

    /// Invalidate only if `rejected` is still the current token and no
    /// refresh is in flight.
    ///
    /// Returns `true` when this call marked the token invalid. Callers
    /// holding a token that was already replaced just fetch the new one.
    pub async fn invalidate_if_current(&self, rejected: &AccessToken) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.refresh.joinable().is_some() || state.invalidated {
            return false;
        }
        let is_current = state
            .tokens
            .as_ref()
            .map(|tokens| tokens.access_token() == *rejected)
            .unwrap_or(false);
        if is_current {
            state.invalidated = true;
        }
        is_current
    }

    /// Replace the credentials (sign in).
    pub async fn set_tokens(&self, tokens: TokenPair) {
        let mut state = self.inner.state.lock().await;
        state.tokens = Some(tokens);
        state.invalidated = false;
        state.generation += 1;
        info!("credentials replaced");
    }

    /// Drop the credentials (sign out).
    pub async fn logout(&self) {
        let mut state = self.inner.state.lock().await;
        state.tokens = None;
        state.invalidated = false;
        state.generation += 1;
        info!("signed out");
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.state.lock().await.tokens.is_some()
    }

    /// Snapshot of the current credential pair.
    pub async fn current_tokens(&self) -> Option<TokenPair> {
        self.inner.state.lock().await.tokens.clone()
    }

    /// Number of refreshes started over the manager's lifetime.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refresh_count.load(Ordering::SeqCst)
    }

    /// Spawn the refresh task and return its result slot.
    ///
    /// Runs with the state lock held so two callers cannot both start one.
    fn start_refresh(&self, state: &mut ManagerState) -> Result<RefreshSlot, AuthError> {
        let refresh_token = state
            .tokens
            .as_ref()
            .ok_or(AuthError::NotAuthenticated)?
            .refresh_token()
            .clone();

        let (tx, rx) = watch::channel(None);
        state.refresh = RefreshState::InProgress(rx.clone());
        let generation = state.generation;
        let number = self.inner.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(refresh = number, "starting token refresh");

        // Owned by its own task so a waiter dropping out cannot abort it.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = inner
                .refresher
                .refresh(&refresh_token)
                .await
                .map_err(|e| match e {
                    AuthError::RefreshFailed { .. } => e,
                    other => AuthError::RefreshFailed {
                        message: other.to_string(),
                    },
                });

            let mut state = inner.state.lock().await;
            if state.generation == generation {
                match &outcome {
                    Ok(tokens) => {
                        state.tokens = Some(tokens.clone());
                        info!(
                            refresh = number,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "token refresh succeeded"
                        );
                    }
                    Err(error) => {
                        state.tokens = None;
                        warn!(refresh = number, error = %error, "token refresh failed, signing out");
                    }
                }
                state.invalidated = false;
            } else {
                debug!(refresh = number, "credentials replaced during refresh, discarding result");
            }
            state.refresh = RefreshState::Idle;
            inner.metrics.record_token_refresh(outcome.is_ok());

            tx.send_replace(Some(outcome));
        });

        Ok(rx)
    }

    async fn await_refresh(mut rx: RefreshSlot) -> RefreshOutcome {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or_else(|| Err(refresh_aborted())),
            Err(_) => Err(refresh_aborted()),
        };
        outcome
    }
}

fn refresh_aborted() -> AuthError {
    AuthError::RefreshFailed {
        message: "refresh task ended without a result".to_string(),
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.inner.config)
            .field("refresh_count", &self.refresh_count())
            .finish_non_exhaustive()
    }
}
