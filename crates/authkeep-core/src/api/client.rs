//! HTTP client for the backend token endpoints.
//!
//! This module provides `TokenClient`, which exchanges a refresh token for a
//! new access/refresh pair and, during an OAuth callback, exchanges an
//! authorization code for the initial session.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::debug;

use crate::config::Config;
use crate::models::User;

use super::ApiError;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Successful response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Some endpoints only rotate the refresh token occasionally
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Successful response from the authorization-code endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeExchangeResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub user: User,
}

/// Exchange of a refresh token for a fresh token pair.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ApiError>;
}

/// Token endpoint client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct TokenClient {
    client: Client,
    token_url: String,
}

impl TokenClient {
    /// Create a client for the given refresh endpoint
    pub fn new(token_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_timeout(token_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(token_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token_url: token_url.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(config.token_url.clone(), config.request_timeout())
    }

    /// Exchange an OAuth authorization code at the backend's code endpoint
    pub async fn exchange_code(
        &self,
        code_url: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CodeExchangeResponse, ApiError> {
        debug!(url = %code_url, "Exchanging authorization code");
        self.post_form(
            code_url,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body = response.text().await?;

        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))
    }
}

#[async_trait]
impl TokenExchange for TokenClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        debug!(url = %self.token_url, "Refreshing access token");
        self.post_form(
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_refresh_posts_form_and_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refresh")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"X","refresh_token":"Y","expires_in":3600}"#)
            .create_async()
            .await;

        let client = TokenClient::new(format!("{}/refresh", server.url())).unwrap();
        let response = client.refresh("r-1").await.unwrap();

        assert_eq!(response.access_token, "X");
        assert_eq!(response.refresh_token.as_deref(), Some("Y"));
        assert_eq!(response.expires_in, 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_maps_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(401)
            .create_async()
            .await;

        let client = TokenClient::new(format!("{}/refresh", server.url())).unwrap();
        let err = client.refresh("r-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_refresh_rejects_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let client = TokenClient::new(format!("{}/refresh", server.url())).unwrap();
        let err = client.refresh("r-1").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn test_refresh_network_failure() {
        // Nothing listens on the discard port
        let client = TokenClient::with_timeout("http://127.0.0.1:9/refresh", Duration::from_secs(2))
            .unwrap();
        let err = client.refresh("r-1").await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_exchange_code_includes_user() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "c-42".into()),
                Matcher::UrlEncoded("redirect_uri".into(), "http://localhost/cb".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"access_token":"A","refresh_token":"R","expires_in":60,
                    "user":{"id":"u1","email":"u@example.com","name":"U","verified_email":true}}"#,
            )
            .create_async()
            .await;

        let client = TokenClient::new(format!("{}/refresh", server.url())).unwrap();
        let response = client
            .exchange_code(&format!("{}/token", server.url()), "c-42", "http://localhost/cb")
            .await
            .unwrap();

        assert_eq!(response.tokens.access_token, "A");
        assert_eq!(response.user.email, "u@example.com");
        assert!(response.user.verified_email);
    }
}
