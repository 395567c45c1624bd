use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, TokenExchange, TokenResponse};
use crate::models::{default_refresh_buffer, Tokens, User};
use crate::storage::KeyValueStore;

use super::AuthStorage;

/// Authentication status derived from the persisted records.
///
/// Never stored; always recomputed from the token and user records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthState {
    pub is_authenticated: bool,
    pub user: Option<User>,
    pub tokens: Option<Tokens>,
}

impl AuthState {
    pub fn from_records(tokens: Option<Tokens>, user: Option<User>) -> Self {
        Self {
            is_authenticated: tokens.is_some() && user.is_some(),
            user,
            tokens,
        }
    }

    pub fn unauthenticated() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("No refresh token stored")]
    MissingRefreshToken,

    #[error("Token exchange failed: {0}")]
    Exchange(#[from] ApiError),

    #[error("Refresh superseded by a newer login or logout")]
    Superseded,
}

/// Owner of the authenticated session.
///
/// Holds the persisted token and user records, publishes the derived
/// `AuthState` to subscribers, and refreshes the access token on request.
///
/// Every login and logout bumps a generation counter. A refresh only commits
/// its outcome (new tokens or a forced logout) if the generation it started
/// under is still current, so a response that arrives after the user logged
/// out or switched accounts is dropped.
pub struct SessionManager {
    storage: AuthStorage,
    exchange: Arc<dyn TokenExchange>,
    state: watch::Sender<AuthState>,
    /// Session generation; also serializes record writes
    generation: Mutex<u64>,
    /// Single-flight guard for refreshes
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_buffer: Duration,
}

impl SessionManager {
    /// Create a manager and restore any persisted session
    pub fn new(store: Arc<dyn KeyValueStore>, exchange: Arc<dyn TokenExchange>) -> Self {
        let storage = AuthStorage::new(store);
        let initial = load_session(&storage);
        debug!(authenticated = initial.is_authenticated, "Session restored");
        let (state, _) = watch::channel(initial);

        Self {
            storage,
            exchange,
            state,
            generation: Mutex::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_buffer: default_refresh_buffer(),
        }
    }

    /// Override the refresh window (default 5 minutes)
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    pub fn storage(&self) -> &AuthStorage {
        &self.storage
    }

    /// Recompute the state from storage and publish it
    pub fn restore(&self) -> AuthState {
        let _generation = self.lock_generation();
        let state = load_session(&self.storage);
        self.publish(state.clone());
        state
    }

    // =========================================================================
    // State access
    // =========================================================================

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn tokens(&self) -> Option<Tokens> {
        self.state.borrow().tokens.clone()
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Persist a new session and mark it authenticated
    pub fn login(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        user: User,
    ) -> AuthState {
        let mut generation = self.lock_generation();
        *generation += 1;

        let tokens = self
            .storage
            .save_tokens(access_token, refresh_token, expires_in_secs);
        self.storage.save_user(&user);

        info!(user_id = %user.id, expires_at = %tokens.expires_at, "Logged in");
        let state = AuthState::from_records(Some(tokens), Some(user));
        self.publish(state.clone());
        state
    }

    /// Delete the session records. Calling this when already logged out is a no-op.
    pub fn logout(&self) {
        let mut generation = self.lock_generation();
        self.clear_session(&mut generation);
        info!("Logged out");
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// True once the stored access token is inside the refresh window,
    /// or when no usable token is stored at all
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.storage.get_tokens_at(now) {
            Some(tokens) => tokens.needs_refresh_at(now, self.refresh_buffer),
            None => true,
        }
    }

    /// When the stored token becomes due for refresh
    pub fn refresh_due_at(&self) -> Option<DateTime<Utc>> {
        self.storage
            .get_tokens()
            .map(|tokens| tokens.refresh_due_at(self.refresh_buffer))
    }

    /// Refresh the access token, logging out on any failure.
    ///
    /// Returns `true` if new tokens were stored. Every failure (no refresh
    /// token, rejected or unreachable endpoint, unreadable response) ends the
    /// session and returns `false`.
    pub async fn refresh_tokens(&self) -> bool {
        match self.try_refresh().await {
            Ok(_) => true,
            Err(RefreshError::Superseded) => {
                debug!("Discarded refresh result from a previous session");
                false
            }
            Err(RefreshError::Exchange(ref e)) if e.is_rejection() => {
                info!(error = %e, "Refresh token rejected, session ended");
                false
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, session ended");
                false
            }
        }
    }

    /// Refresh the access token, reporting why it failed.
    ///
    /// Same state transitions as `refresh_tokens`.
    pub async fn try_refresh(&self) -> Result<Tokens, RefreshError> {
        let _flight = match self.refresh_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.refresh_lock.lock().await;
                // Another refresh finished while we waited
                if let Some(tokens) = self.storage.get_tokens() {
                    if !tokens.needs_refresh_at(Utc::now(), self.refresh_buffer) {
                        debug!("Tokens already refreshed by a concurrent call");
                        return Ok(tokens);
                    }
                }
                guard
            }
        };

        let started = *self.lock_generation();
        let exchanged = self.exchange_stored_token().await;

        let mut generation = self.lock_generation();
        if *generation != started {
            return Err(RefreshError::Superseded);
        }

        match exchanged {
            Ok((response, previous_refresh)) => {
                let refresh_token = response.refresh_token.unwrap_or(previous_refresh);
                let tokens = self.storage.save_tokens(
                    &response.access_token,
                    &refresh_token,
                    response.expires_in,
                );
                let user = self.storage.get_user();
                info!(expires_at = %tokens.expires_at, "Access token refreshed");
                self.publish(AuthState::from_records(Some(tokens.clone()), user));
                Ok(tokens)
            }
            Err(e) => {
                self.clear_session(&mut generation);
                Err(e)
            }
        }
    }

    /// Exchange the stored refresh token, returning the response and the
    /// refresh token that was sent
    async fn exchange_stored_token(&self) -> Result<(TokenResponse, String), RefreshError> {
        let refresh_token = self
            .storage
            .get_tokens()
            .map(|tokens| tokens.refresh_token)
            .ok_or(RefreshError::MissingRefreshToken)?;

        let response = self.exchange.refresh(&refresh_token).await?;
        Ok((response, refresh_token))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller must hold the generation lock. Also drops any pending OAuth state.
    fn clear_session(&self, generation: &mut MutexGuard<'_, u64>) {
        **generation += 1;
        self.storage.clear_all();
        self.publish(AuthState::unauthenticated());
    }

    /// Publish a state, notifying subscribers only if it changed
    fn publish(&self, next: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Read the persisted session. A user record whose tokens have expired or
/// gone missing is deleted with them.
fn load_session(storage: &AuthStorage) -> AuthState {
    let tokens = storage.get_tokens();
    let user = storage.get_user();
    if tokens.is_none() && user.is_some() {
        info!("Stored session expired, clearing user record");
        storage.clear_user();
        return AuthState::unauthenticated();
    }
    AuthState::from_records(tokens, user)
}
