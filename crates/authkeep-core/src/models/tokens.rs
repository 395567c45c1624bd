//! Access/refresh token record persisted by the session manager.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::format::mask_token;

/// Buffer time before expiry to trigger refresh (5 minutes)
pub const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Default refresh window as a `Duration`.
pub fn default_refresh_buffer() -> Duration {
    Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum TokenType {
    #[default]
    Bearer,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Stored as Unix epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub token_type: TokenType,
}

impl Tokens {
    /// Build a token record expiring `expires_in_secs` from now.
    pub fn issue(access_token: &str, refresh_token: &str, expires_in_secs: i64) -> Self {
        Self::issue_at(access_token, refresh_token, expires_in_secs, Utc::now())
    }

    /// Build a token record expiring `expires_in_secs` after `now`.
    ///
    /// The expiry is kept at millisecond precision so the in-memory record
    /// compares equal to what is read back from storage. Negative lifetimes
    /// are clamped to zero.
    pub fn issue_at(
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_ms = now
            .timestamp_millis()
            .saturating_add(expires_in_secs.max(0).saturating_mul(1000));
        let expires_at =
            DateTime::from_timestamp_millis(expires_ms).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at,
            token_type: TokenType::Bearer,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True once `now` has reached `expires_at - buffer`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at <= now + buffer
    }

    /// Instant at which a refresh becomes due.
    pub fn refresh_due_at(&self, buffer: Duration) -> DateTime<Utc> {
        self.expires_at - buffer
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &mask_token(&self.access_token))
            .field("refresh_token", &mask_token(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}
