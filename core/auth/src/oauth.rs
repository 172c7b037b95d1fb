//! OAuth2 refresh-token grant for user-authorized Drive access.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse, TokenUrl};
use std::time::Duration;

use flextk_common::{Error, Result, SecretString};

use crate::token::{AccessToken, TokenSource};

/// Google's OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Trades a long-lived refresh token for access tokens.
pub struct RefreshTokenSource {
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
    token_url: String,
    http: reqwest::Client,
}

impl RefreshTokenSource {
    /// Create a source for Google's token endpoint.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Result<Self> {
        // Token requests must not follow redirects.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Provider(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret,
            refresh_token,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            http,
        })
    }

    /// Use a different token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    async fn fetch(&self) -> Result<AccessToken> {
        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;

        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(
                self.client_secret.expose().to_string(),
            ))
            .set_token_uri(token_url);

        let response = client
            .exchange_refresh_token(&RefreshToken::new(
                self.refresh_token.expose().to_string(),
            ))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(err) => {
                    Error::Auth(format!("Token refresh rejected: {}", err))
                }
                other => Error::Provider(format!("Token refresh failed: {}", other)),
            })?;

        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| Duration::from_secs(3600));

        Ok(AccessToken::new(
            response.access_token().secret().clone(),
            expires_in,
        ))
    }
}
