// Caller authorization and upstream credential management
// Author: kelexine (https://github.com/kelexine)

mod manager;

pub use manager::AccountCredentials;

use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Maps a caller's key to the upstream access token it may use.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `None` when the caller key is not accepted.
    async fn resolve(&self, caller_key: &str) -> Result<Option<String>>;
}

/// Cached upstream access token.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    /// Expiry as a Unix timestamp in seconds; `None` never expires.
    pub expires_at: Option<i64>,
}

// Custom Debug impl that never logs tokens
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Check if token is expired or will expire within buffer seconds
    pub fn is_expired(&self, buffer_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - chrono::Utc::now().timestamp() < buffer_seconds,
            None => false,
        }
    }
}

/// Reply of the account token endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires: Option<String>,
}

/// Extract the key from an `Authorization: Bearer <key>` header value.
pub fn bearer_key(header: &str) -> Option<&str> {
    let key = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    (!key.is_empty()).then_some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_impl_masks_tokens() {
        let token = AccessToken {
            token: "eyJhbGciOiJSUzI1NiI.secret".to_string(),
            expires_at: Some(1768126811),
        };
        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("eyJhbGci"));
    }

    #[test]
    fn test_expiry_detection() {
        let now = chrono::Utc::now().timestamp();
        let fresh = AccessToken {
            token: "t".to_string(),
            expires_at: Some(now + 3600),
        };
        assert!(!fresh.is_expired(300));
        assert!(fresh.is_expired(4000));

        let forever = AccessToken {
            token: "t".to_string(),
            expires_at: None,
        };
        assert!(!forever.is_expired(i64::MAX / 2));
    }

    #[test]
    fn test_bearer_key() {
        assert_eq!(bearer_key("Bearer sk-123"), Some("sk-123"));
        assert_eq!(bearer_key("bearer  sk-123 "), Some("sk-123"));
        assert_eq!(bearer_key("Basic abc"), None);
        assert_eq!(bearer_key("Bearer "), None);
    }
}
