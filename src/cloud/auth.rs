//! Authentication
//!
//! Token acquisition lives behind [`TokenCredential`]; this module only caches
//! the tokens a credential hands out and attaches them to requests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Refresh tokens this long before they expire
const TOKEN_REFRESH_BUFFER_SECS: i64 = 5 * 60;

/// Bearer token returned by a credential
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    /// `None` means the token never expires
    pub expires_on: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    /// Still usable, with the refresh buffer applied
    fn is_fresh(&self) -> bool {
        match self.expires_on {
            Some(expires_on) => {
                Utc::now() + Duration::seconds(TOKEN_REFRESH_BUFFER_SECS) < expires_on
            }
            None => true,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Anything that can hand out bearer tokens for a set of scopes
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scopes: &[String]) -> Result<AccessToken>;
}

/// Credential that always returns the same token
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token, None),
        }
    }

    /// Read the token from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        std::env::var(var)
            .ok()
            .filter(|t| !t.is_empty())
            .map(Self::new)
            .ok_or_else(|| Error::Credential(format!("environment variable {} is not set", var)))
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scopes: &[String]) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Per-pipeline authorization step: fetches, caches and attaches a token
/// scoped to one service audience
#[derive(Clone)]
pub struct BearerTokenPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    token_cache: Arc<RwLock<Option<AccessToken>>>,
}

impl BearerTokenPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self {
            credential,
            scopes,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Get a token, reusing the cached one while it is fresh
    pub async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_fresh() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token for {:?} is about to expire", self.scopes);
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }

        let token = self.credential.get_token(&self.scopes).await?;
        tracing::debug!("New token cached for {:?}", self.scopes);
        let value = token.token.clone();
        *cache = Some(token);
        Ok(value)
    }

    /// Attach `Authorization: Bearer ...` to a request
    pub async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(request.bearer_auth(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCredential {
        calls: AtomicUsize,
        lifetime: Duration,
    }

    #[async_trait]
    impl TokenCredential for CountingCredential {
        async fn get_token(&self, scopes: &[String]) -> Result<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new(
                format!("{}-{}", scopes.join(","), n),
                Some(Utc::now() + self.lifetime),
            ))
        }
    }

    #[tokio::test]
    async fn test_policy_caches_fresh_token() {
        let credential = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime: Duration::hours(1),
        });
        let policy = BearerTokenPolicy::new(credential.clone(), vec!["aud/.default".to_string()]);

        let first = policy.token().await.unwrap();
        let second = policy.token().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "aud/.default-0");
        assert_eq!(credential.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_refreshes_expiring_token() {
        let credential = Arc::new(CountingCredential {
            calls: AtomicUsize::new(0),
            lifetime: Duration::minutes(1),
        });
        let policy = BearerTokenPolicy::new(credential.clone(), vec!["s".to_string()]);

        policy.token().await.unwrap();
        policy.token().await.unwrap();
        assert_eq!(credential.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_static_credential_from_missing_env() {
        let result = StaticTokenCredential::from_env("DPCTL_TEST_TOKEN_THAT_IS_NEVER_SET");
        assert!(matches!(result, Err(Error::Credential(_))));
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = AccessToken::new("secret", None);
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
