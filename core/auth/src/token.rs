//! Bearer tokens and the cache that keeps them fresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use flextk_common::{Result, SecretString};

/// Seconds before expiry at which a token is treated as stale.
const REFRESH_MARGIN_SECS: i64 = 300;

/// An access token with its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Token valid for `expires_in` from now.
    pub fn new(token: impl Into<SecretString>, expires_in: std::time::Duration) -> Self {
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS)
    }
}

/// Something that can mint a new access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a fresh token from the issuer.
    ///
    /// # Errors
    /// - `Auth` if the issuer rejects the credentials
    /// - `Provider` for transport failures or malformed responses
    async fn fetch(&self) -> Result<AccessToken>;
}

/// A fixed token, for pre-issued credentials and tests.
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn fetch(&self) -> Result<AccessToken> {
        Ok(AccessToken::new(
            self.0.clone(),
            std::time::Duration::from_secs(3600),
        ))
    }
}

/// Caches the token from a [`TokenSource`] and refreshes it on demand.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    current: RwLock<Option<AccessToken>>,
}

impl TokenCache {
    /// Create a cache with no token yet; the first call fetches one.
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Postconditions
    /// - Returns a token that is not within the refresh margin of expiry
    ///
    /// # Errors
    /// - Token refresh failed
    pub async fn access_token(&self) -> Result<String> {
        {
            let current = self.current.read().await;
            if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
                return Ok(token.token.expose().to_string());
            }
        }

        let mut current = self.current.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(token) = current.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.token.expose().to_string());
        }

        tracing::debug!("Fetching access token");
        let token = self.source.fetch().await?;
        let secret = token.token.expose().to_string();
        *current = Some(token);

        Ok(secret)
    }

    /// `Authorization` header value for the current token.
    pub async fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.access_token().await?))
    }
}
