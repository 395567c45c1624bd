//! OAuth authorization-code helpers.
//!
//! `authorize_url` stores a one-time CSRF state before sending the user to
//! the provider; `complete` consumes it when the provider redirects back and
//! exchanges the code at the backend.

use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ApiError, CodeExchangeResponse, TokenClient};
use crate::config::Config;

use super::AuthStorage;

/// Length of the generated CSRF state
const STATE_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth is not configured: missing {0}")]
    NotConfigured(&'static str),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Provider returned an error: {0}")]
    Provider(String),

    #[error("No OAuth state was saved for this login")]
    MissingState,

    #[error("OAuth state mismatch - callback was not initiated by this client")]
    StateMismatch,

    #[error("Callback is missing the authorization code")]
    MissingCode,

    #[error("Code exchange failed: {0}")]
    Exchange(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub authorize_url: String,
    pub code_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    pub fn from_config(config: &Config) -> Result<Self, OAuthError> {
        Ok(Self {
            authorize_url: config
                .authorize_url
                .clone()
                .ok_or(OAuthError::NotConfigured("authorize_url"))?,
            code_url: config
                .code_url
                .clone()
                .ok_or(OAuthError::NotConfigured("code_url"))?,
            client_id: config
                .client_id
                .clone()
                .ok_or(OAuthError::NotConfigured("client_id"))?,
            redirect_uri: config
                .redirect_uri
                .clone()
                .ok_or(OAuthError::NotConfigured("redirect_uri"))?,
            scopes: config.scopes.clone(),
        })
    }
}

/// Generate a random CSRF state value
pub fn generate_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

pub struct OAuthClient {
    config: OAuthConfig,
    storage: AuthStorage,
    client: TokenClient,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, storage: AuthStorage, client: TokenClient) -> Self {
        Self {
            config,
            storage,
            client,
        }
    }

    /// Build the provider URL and remember the state it carries
    pub fn authorize_url(&self) -> Result<String, OAuthError> {
        let state = generate_state();
        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| OAuthError::InvalidUrl(format!("{}: {}", self.config.authorize_url, e)))?;

        self.storage.save_oauth_state(&state);
        debug!("OAuth state saved, redirecting to provider");
        Ok(url.into())
    }

    /// Check the callback against the saved state and return the code.
    ///
    /// The saved state is consumed whatever the outcome.
    pub fn verify_callback(&self, callback_url: &str) -> Result<String, OAuthError> {
        let url = Url::parse(callback_url)
            .map_err(|e| OAuthError::InvalidUrl(format!("{}: {}", callback_url, e)))?;
        let expected = self.storage.get_and_clear_oauth_state();

        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(OAuthError::Provider(error));
        }
        let expected = expected.ok_or(OAuthError::MissingState)?;
        if state.as_deref() != Some(expected.as_str()) {
            warn!("OAuth callback state did not match");
            return Err(OAuthError::StateMismatch);
        }
        code.filter(|c| !c.is_empty()).ok_or(OAuthError::MissingCode)
    }

    /// Verify the callback and exchange its code for a session.
    ///
    /// The caller passes the result to `SessionManager::login`.
    pub async fn complete(&self, callback_url: &str) -> Result<CodeExchangeResponse, OAuthError> {
        let code = self.verify_callback(callback_url)?;
        let response = self
            .client
            .exchange_code(&self.config.code_url, &code, &self.config.redirect_uri)
            .await?;
        Ok(response)
    }
}
