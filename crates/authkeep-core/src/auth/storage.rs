use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::{Tokens, User};
use crate::storage::KeyValueStore;

/// Storage key for the token record
pub const TOKENS_KEY: &str = "auth_tokens";

/// Storage key for the user record
pub const USER_KEY: &str = "auth_user";

/// Storage key for the pending OAuth CSRF state
pub const OAUTH_STATE_KEY: &str = "oauth_state";

/// Typed access to the session records kept in a `KeyValueStore`.
///
/// Reads never fail: a missing, unreadable or stale record is reported as
/// absent. Write failures are logged and swallowed.
#[derive(Clone)]
pub struct AuthStorage {
    store: Arc<dyn KeyValueStore>,
}

impl AuthStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    // ===== Tokens =====

    /// Persist a token pair expiring `expires_in_secs` from now
    pub fn save_tokens(&self, access_token: &str, refresh_token: &str, expires_in_secs: i64) -> Tokens {
        let tokens = Tokens::issue(access_token, refresh_token, expires_in_secs);
        self.put_tokens(&tokens);
        tokens
    }

    pub fn put_tokens(&self, tokens: &Tokens) {
        self.write_json(TOKENS_KEY, tokens);
    }

    pub fn get_tokens(&self) -> Option<Tokens> {
        self.get_tokens_at(Utc::now())
    }

    /// Read the token record, deleting it if it has expired by `now`
    pub fn get_tokens_at(&self, now: DateTime<Utc>) -> Option<Tokens> {
        let tokens: Tokens = self.read_json(TOKENS_KEY)?;
        if tokens.is_expired_at(now) {
            debug!(expires_at = %tokens.expires_at, "Stored tokens expired, removing");
            self.remove(TOKENS_KEY);
            return None;
        }
        Some(tokens)
    }

    pub fn clear_tokens(&self) {
        self.remove(TOKENS_KEY);
    }

    // ===== User =====

    pub fn save_user(&self, user: &User) {
        self.write_json(USER_KEY, user);
    }

    pub fn get_user(&self) -> Option<User> {
        self.read_json(USER_KEY)
    }

    pub fn clear_user(&self) {
        self.remove(USER_KEY);
    }

    // ===== OAuth state =====

    pub fn save_oauth_state(&self, state: &str) {
        if let Err(e) = self.store.set(OAUTH_STATE_KEY, state) {
            warn!(error = %e, "Failed to save OAuth state");
        }
    }

    /// Take the pending OAuth state. A second call returns `None`.
    pub fn get_and_clear_oauth_state(&self) -> Option<String> {
        let state = match self.store.get(OAUTH_STATE_KEY) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Failed to read OAuth state");
                None
            }
        };
        self.remove(OAUTH_STATE_KEY);
        state
    }

    /// Remove every record this type manages
    pub fn clear_all(&self) {
        self.clear_tokens();
        self.clear_user();
        self.remove(OAUTH_STATE_KEY);
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session record");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Discarding unparseable session record");
                self.remove(key);
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.store.set(key, &raw));
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to save session record");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "Failed to remove session record");
        }
    }
}
