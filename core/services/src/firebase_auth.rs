//! Firebase Authentication user lookups via the Identity Toolkit admin API.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use flextk_auth::http::{json as read_json, transport_error};
use flextk_auth::{scopes, ServiceAccount, ServiceAccountSource, TokenCache};
use flextk_common::{Error, Result};
use flextk_config::settings::FirebaseSettings;

const IDENTITY_TOOLKIT_BASE: &str = "https://identitytoolkit.googleapis.com";

/// Largest page `accounts:batchGet` serves.
pub const MAX_LIST_RESULTS: u32 = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProviderInfo {
    provider_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    last_login_at: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<RawProviderInfo>,
}

/// A Firebase user account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub photo_url: Option<String>,
    pub disabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    /// Sign-in providers linked to the account, e.g. `password`, `google.com`.
    pub providers: Vec<String>,
}

/// Identity Toolkit reports timestamps as millisecond strings.
fn millis(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

impl From<RawUser> for UserRecord {
    fn from(raw: RawUser) -> Self {
        Self {
            uid: raw.local_id,
            email: raw.email,
            email_verified: raw.email_verified,
            display_name: raw.display_name,
            phone_number: raw.phone_number,
            photo_url: raw.photo_url,
            disabled: raw.disabled,
            created_at: millis(raw.created_at),
            last_login_at: millis(raw.last_login_at),
            providers: raw
                .provider_user_info
                .into_iter()
                .map(|p| p.provider_id)
                .collect(),
        }
    }
}

/// One page of users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPage {
    pub users: Vec<UserRecord>,
    /// Pass back to [`FirebaseAuth::list_users`] for the next page.
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<RawUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<RawUser>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Firebase Authentication admin client.
pub struct FirebaseAuth {
    project_id: String,
    base_url: String,
    http: Client,
    tokens: Arc<TokenCache>,
}

impl FirebaseAuth {
    pub fn new(project_id: impl Into<String>, tokens: Arc<TokenCache>) -> Self {
        Self {
            project_id: project_id.into(),
            base_url: IDENTITY_TOOLKIT_BASE.to_string(),
            http: Client::new(),
            tokens,
        }
    }

    /// Build from the Firebase section; the project comes from the key file.
    pub fn from_settings(settings: &FirebaseSettings) -> Result<Self> {
        let account = ServiceAccount::load(&settings.service_account)?;
        let project_id = account.project_id.clone();
        let source = ServiceAccountSource::new(
            account,
            &[scopes::IDENTITY_TOOLKIT, scopes::CLOUD_PLATFORM],
        );
        Ok(Self::new(
            project_id,
            Arc::new(TokenCache::new(Arc::new(source))),
        ))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn accounts_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}/accounts:{}",
            self.base_url, self.project_id, method
        )
    }

    async fn lookup(&self, body: serde_json::Value, what: &str) -> Result<UserRecord> {
        let response = self
            .http
            .post(self.accounts_url("lookup"))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Firebase user lookup", e))?;

        let found: LookupResponse = read_json(response, "Firebase user lookup").await?;
        found
            .users
            .into_iter()
            .next()
            .map(UserRecord::from)
            .ok_or_else(|| Error::NotFound(format!("No user with {}", what)))
    }

    /// # Errors
    /// - `InvalidInput` if `uid` is empty or longer than 128 characters
    /// - `NotFound` if no such user exists
    pub async fn get_user_by_id(&self, uid: &str) -> Result<UserRecord> {
        if uid.is_empty() || uid.chars().count() > 128 {
            return Err(Error::InvalidInput(format!("Malformed user id '{}'", uid)));
        }
        self.lookup(json!({ "localId": [uid] }), &format!("uid {}", uid))
            .await
    }

    /// # Errors
    /// - `InvalidInput` if `email` is not an address
    /// - `NotFound` if no such user exists
    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        let valid = matches!(
            email.split_once('@'),
            Some((user, domain)) if !user.is_empty() && !domain.is_empty()
        );
        if !valid {
            return Err(Error::InvalidInput(format!("Malformed email '{}'", email)));
        }
        self.lookup(json!({ "email": [email] }), &format!("email {}", email))
            .await
    }

    /// `phone_number` must be in E.164 form, e.g. `+15555550100`.
    ///
    /// # Errors
    /// - `InvalidInput` if the number is not E.164
    /// - `NotFound` if no such user exists
    pub async fn get_user_by_phone_number(&self, phone_number: &str) -> Result<UserRecord> {
        let digits = phone_number.strip_prefix('+').unwrap_or_default();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidInput(format!(
                "Malformed phone number '{}'",
                phone_number
            )));
        }
        self.lookup(
            json!({ "phoneNumber": [phone_number] }),
            &format!("phone number {}", phone_number),
        )
        .await
    }

    /// One page of users, at most `max_results` (1 to 1000) long.
    pub async fn list_users(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<UserPage> {
        if max_results == 0 || max_results > MAX_LIST_RESULTS {
            return Err(Error::InvalidInput(format!(
                "max_results must be between 1 and {}",
                MAX_LIST_RESULTS
            )));
        }

        let mut request = self
            .http
            .get(self.accounts_url("batchGet"))
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&[("maxResults", max_results.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("nextPageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("Firebase list users", e))?;
        let page: BatchGetResponse = read_json(response, "Firebase list users").await?;
        debug!("Fetched {} users", page.users.len());

        Ok(UserPage {
            users: page.users.into_iter().map(UserRecord::from).collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}
