//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{ApiError, TokenExchange, TokenResponse};
use crate::models::User;

pub fn sample_user() -> User {
    User {
        id: "user-1".to_string(),
        email: "ada@example.com".to_string(),
        name: "Ada Lovelace".to_string(),
        picture: Some("https://example.com/ada.png".to_string()),
        verified_email: true,
    }
}

/// Answers every refresh immediately with numbered tokens.
pub struct CountingExchange {
    calls: AtomicUsize,
    expires_in: i64,
}

impl CountingExchange {
    pub fn new(expires_in: i64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            expires_in,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchange for CountingExchange {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenResponse {
            access_token: format!("access-{}", n),
            refresh_token: Some(format!("refresh-{}", n)),
            expires_in: self.expires_in,
        })
    }
}

/// Blocks inside `refresh` until released, so tests can interleave
/// logins and logouts with an in-flight exchange.
#[derive(Clone)]
pub struct GatedExchange {
    entered: Arc<Notify>,
    released: Arc<Notify>,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl GatedExchange {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            released: Arc::new(Notify::new()),
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    /// Gate whose exchange is rejected once released
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchange for GatedExchange {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.released.notified().await;

        if self.fail {
            return Err(ApiError::Unauthorized);
        }
        Ok(TokenResponse {
            access_token: "gated-access".to_string(),
            refresh_token: Some("gated-refresh".to_string()),
            expires_in: 3600,
        })
    }
}
