//! Google service-account keys and the JWT-bearer token grant.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use flextk_common::{Error, Result, SecretString};

use crate::jwt::{sign_rs256, AssertionClaims};
use crate::token::{AccessToken, TokenSource};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account key file that flextk uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    #[serde(rename = "type")]
    pub account_type: String,
    pub project_id: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: SecretString,
    pub client_email: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccount {
    /// Parse and validate a key file's JSON.
    ///
    /// # Errors
    /// - `InvalidInput` if the JSON is malformed, a required field is
    ///   missing, or `type` is not `service_account`
    pub fn from_json(json: &str) -> Result<Self> {
        let account: ServiceAccount = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("Invalid service account file: {}", e)))?;
        if account.account_type != "service_account" {
            return Err(Error::InvalidInput(format!(
                "Expected a service_account key file, got type '{}'",
                account.account_type
            )));
        }
        if account.client_email.is_empty() || account.private_key.is_empty() {
            return Err(Error::InvalidInput(
                "Service account file lacks client_email or private_key".to_string(),
            ));
        }
        Ok(account)
    }

    /// Read a key file from disk.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - see [`ServiceAccount::from_json`]
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("Service account file {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_json(&json)
    }

    /// Build the signed assertion for `scopes`.
    pub fn assertion(&self, scopes: &[&str]) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: scopes.join(" "),
            aud: self.token_uri.clone(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            sub: None,
        };
        sign_rs256(
            &claims,
            self.private_key.expose(),
            self.private_key_id.as_deref(),
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Exchanges a signed service-account assertion for an access token.
pub struct ServiceAccountSource {
    account: ServiceAccount,
    scopes: Vec<String>,
    http: reqwest::Client,
}

impl ServiceAccountSource {
    pub fn new(account: ServiceAccount, scopes: &[&str]) -> Self {
        Self {
            account,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            http: reqwest::Client::new(),
        }
    }

    /// Project the key belongs to.
    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }
}

#[async_trait]
impl TokenSource for ServiceAccountSource {
    async fn fetch(&self) -> Result<AccessToken> {
        let scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        let assertion = self.account.assertion(&scopes)?;

        let response = self
            .http
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "Token endpoint rejected service account {}: {} - {}",
                self.account.client_email, status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Malformed token response: {}", e)))?;

        Ok(AccessToken::new(
            token.access_token,
            Duration::from_secs(token.expires_in.unwrap_or(3600)),
        ))
    }
}
