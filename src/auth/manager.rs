//! Upstream account credentials.
//!
//! `AccountCredentials` accepts exactly one caller key (the configured gateway
//! key) and hands out the upstream access token for it. The token is either
//! configured statically or obtained by logging in against the upstream token
//! endpoint and cached until shortly before it expires. Concurrent callers
//! share one login through double-checked locking.

// Author: kelexine (https://github.com/kelexine)

use super::{AccessToken, CredentialProvider, TokenResponse};
use crate::config::{AuthConfig, UpstreamConfig};
use crate::error::{ProxyError, Result};
use crate::utils::retry::{with_retry, AttemptError};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Lifetime assumed for a login token whose expiry cannot be parsed.
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Clone)]
pub struct AccountCredentials {
    config: AuthConfig,
    login_url: String,
    max_retries: u32,
    http_client: Client,
    /// Token obtained by the last login.
    cached: Arc<RwLock<Option<AccessToken>>>,
    /// Serializes logins when the cached token is stale.
    refresh_lock: Arc<Mutex<()>>,
}

impl AccountCredentials {
    pub fn new(config: &AuthConfig, upstream: &UpstreamConfig, http_client: Client) -> Result<Self> {
        let has_static = config.access_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_login = config.username.is_some() && config.password.is_some();
        if !has_static && !has_login {
            return Err(ProxyError::Config(
                "auth requires either access_token or username and password".to_string(),
            ));
        }
        if config.gateway_key.is_empty() {
            warn!("auth.gateway_key is empty; every request will be rejected");
        }

        Ok(Self {
            config: config.clone(),
            login_url: format!("{}/auth/token", upstream.base_url.trim_end_matches('/')),
            max_retries: upstream.max_retries,
            http_client,
            cached: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Acquire a valid upstream token, logging in if necessary.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.config.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        // Fast path: cached token still valid.
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired(self.config.refresh_buffer_seconds) {
                    return Ok(token.token.clone());
                }
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Re-verify after gaining the mutex.
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired(self.config.refresh_buffer_seconds) {
                    debug!("Token already refreshed by another concurrent request.");
                    return Ok(token.token.clone());
                }
            }
        }

        let token = self.login().await?;
        let value = token.token.clone();
        *self.cached.write().await = Some(token);
        info!("Obtained upstream access token via account login");
        Ok(value)
    }

    async fn login(&self) -> Result<AccessToken> {
        let username = self.config.username.clone().unwrap_or_default();
        let password = self.config.password.clone().unwrap_or_default();
        let params = [
            ("username", username.as_str()),
            ("password", password.as_str()),
            ("option", "web"),
        ];

        let client = &self.http_client;
        let url = self.login_url.as_str();
        let response: TokenResponse = with_retry("Account login", self.max_retries, || async {
            let response = client
                .post(url)
                .form(&params)
                .send()
                .await
                .map_err(|e| AttemptError::new(500, format!("network error: {}", e)))?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(AttemptError::new(status.as_u16(), body));
            }
            serde_json::from_str(&body)
                .map_err(|e| AttemptError::new(502, format!("malformed token response: {}", e)))
        })
        .await
        .map_err(|e| ProxyError::Unauthorized(format!("account login failed (HTTP {}): {}", e.status, e.body)))?;

        Ok(AccessToken {
            token: response.access_token,
            expires_at: Some(parse_expiry(response.expires.as_deref())),
        })
    }
}

/// Parse the `expires` timestamp of a token response (RFC 3339).
fn parse_expiry(expires: Option<&str>) -> i64 {
    expires
        .and_then(|e| chrono::DateTime::parse_from_rfc3339(e).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| chrono::Utc::now().timestamp() + DEFAULT_TOKEN_TTL_SECONDS)
}

#[async_trait]
impl CredentialProvider for AccountCredentials {
    async fn resolve(&self, caller_key: &str) -> Result<Option<String>> {
        if self.config.gateway_key.is_empty() || caller_key != self.config.gateway_key {
            return Ok(None);
        }
        self.get_token().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(access_token: Option<&str>) -> AuthConfig {
        AuthConfig {
            gateway_key: "sk-gateway".to_string(),
            access_token: access_token.map(str::to_string),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            refresh_buffer_seconds: 300,
        }
    }

    fn upstream(base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            max_retries: 1,
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry(Some("2024-04-30T13:34:40.547Z")), 1714484080);
        let fallback = parse_expiry(Some("not a date"));
        assert!(fallback > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_requires_some_credentials() {
        let config = AuthConfig {
            gateway_key: "k".to_string(),
            ..AuthConfig::default()
        };
        assert!(AccountCredentials::new(&config, &upstream("http://x"), Client::new()).is_err());
    }

    #[tokio::test]
    async fn test_static_token_for_gateway_key_only() {
        let creds =
            AccountCredentials::new(&auth(Some("static-token")), &upstream("http://x"), Client::new()).unwrap();
        assert_eq!(creds.resolve("sk-gateway").await.unwrap().as_deref(), Some("static-token"));
        assert_eq!(creds.resolve("sk-other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/token")
            .match_body(mockito::Matcher::UrlEncoded("option".into(), "web".into()))
            .with_status(200)
            .with_body(r#"{"accessToken": "from-login", "expires": "2099-01-01T00:00:00.000Z"}"#)
            .expect(1)
            .create_async()
            .await;

        let creds = AccountCredentials::new(&auth(None), &upstream(&server.url()), Client::new()).unwrap();
        assert_eq!(creds.resolve("sk-gateway").await.unwrap().as_deref(), Some("from-login"));
        assert_eq!(creds.resolve("sk-gateway").await.unwrap().as_deref(), Some("from-login"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_failure_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/auth/token")
            .with_status(403)
            .with_body(r#"{"msg": "bad password"}"#)
            .create_async()
            .await;

        let creds = AccountCredentials::new(&auth(None), &upstream(&server.url()), Client::new()).unwrap();
        assert!(matches!(
            creds.resolve("sk-gateway").await,
            Err(ProxyError::Unauthorized(_))
        ));
    }
}
