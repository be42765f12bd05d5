//! Google OAuth 2.0 token management for connected mailboxes.
//!
//! Each mailbox integration carries its own refresh token, so access
//! tokens are cached per integration and refreshed through the standard
//! refresh_token grant shortly before they expire.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, Default)]
pub struct GoogleAuthConfig {
    /// OAuth client ID shared by every mailbox integration.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint, overridable for tests.
    pub token_url: String,
}

impl GoogleAuthConfig {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct GoogleAuth {
    config: GoogleAuthConfig,
    http: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl GoogleAuth {
    pub fn new(config: GoogleAuthConfig) -> Result<Self, GoogleAuthError> {
        if !config.is_valid() {
            return Err(GoogleAuthError::MissingCredentials(
                "GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET must be set".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            config,
            http,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Valid access token for one integration. Cached tokens are reused
    /// until they are within 60 seconds of expiring.
    pub async fn access_token_for(
        &self,
        integration_id: &str,
        refresh_token: &str,
    ) -> Result<String, GoogleAuthError> {
        {
            let cache = self.cache.read().unwrap();
            if let Some(cached) = cache.get(integration_id) {
                if cached.expires_at > Instant::now() + Duration::from_secs(60) {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        self.refresh(integration_id, refresh_token).await
    }

    async fn refresh(
        &self,
        integration_id: &str,
        refresh_token: &str,
    ) -> Result<String, GoogleAuthError> {
        if refresh_token.trim().is_empty() {
            return Err(GoogleAuthError::MissingCredentials(format!(
                "integration {integration_id} has no refresh token"
            )));
        }
        debug!("refreshing access token for integration {}", integration_id);

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                "token refresh for integration {} failed: {} - {}",
                integration_id, status, body
            );
            return Err(GoogleAuthError::RefreshFailed(format!(
                "HTTP {status}: {body}"
            )));
        }

        let token: OAuthTokenResponse = response.json().await?;
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in.max(0) as u64);
        let access_token = token.access_token.clone();
        {
            let mut cache = self.cache.write().unwrap();
            cache.insert(
                integration_id.to_string(),
                CachedToken {
                    access_token: token.access_token,
                    expires_at,
                },
            );
        }

        debug!("access token for integration {} refreshed", integration_id);
        Ok(access_token)
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
    #[allow(dead_code)]
    token_type: String,
    #[allow(dead_code)]
    scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn config_validation() {
        assert!(!GoogleAuthConfig::default().is_valid());
        assert!(!GoogleAuthConfig::new("id".to_string(), "  ".to_string()).is_valid());
        assert!(GoogleAuthConfig::new("id".to_string(), "secret".to_string()).is_valid());

        assert!(matches!(
            GoogleAuth::new(GoogleAuthConfig::default()),
            Err(GoogleAuthError::MissingCredentials(_))
        ));
    }

    fn test_auth(token_url: String) -> GoogleAuth {
        GoogleAuth::new(GoogleAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            token_url,
        })
        .expect("auth")
    }

    #[tokio::test]
    async fn tokens_are_cached_per_integration() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "at-1", "expires_in": 3600, "token_type": "Bearer"}"#)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "rt-2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "at-2", "expires_in": 3600, "token_type": "Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let auth = test_auth(server.url());
        let token = auth.access_token_for("int-1", "rt-1").await.expect("refresh");
        assert_eq!(token, "at-1");
        // Second call for the same integration is served from cache.
        let token = auth.access_token_for("int-1", "rt-1").await.expect("cached");
        assert_eq!(token, "at-1");
        // A different integration refreshes with its own token.
        let token = auth.access_token_for("int-2", "rt-2").await.expect("refresh");
        assert_eq!(token, "at-2");

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn refresh_failure_carries_the_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .create_async()
            .await;

        let auth = test_auth(server.url());
        let err = auth
            .access_token_for("int-1", "rt-bad")
            .await
            .expect_err("refresh should fail");
        match err {
            GoogleAuthError::RefreshFailed(message) => {
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_refresh_token_is_rejected_without_a_request() {
        let auth = test_auth("http://127.0.0.1:9/".to_string());
        assert!(matches!(
            auth.access_token_for("int-1", "  ").await,
            Err(GoogleAuthError::MissingCredentials(_))
        ));
    }
}
