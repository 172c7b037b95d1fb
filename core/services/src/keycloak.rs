//! Keycloak OpenID Connect endpoints and the admin users API.
//!
//! Token endpoints authenticate as the configured client. User management
//! additionally needs an admin account of the realm; its token is fetched
//! once per client with the password grant.

use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use flextk_auth::http::{check, json as read_json, transport_error};
use flextk_auth::jwt::{decode_claims, verify_rs256, JwkSet};
use flextk_common::{Error, Result, SecretString};
use flextk_config::settings::KeycloakSettings;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Deserialize)]
struct RawToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Tokens of a signed-in user together with what they say about the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    /// Response of the userinfo endpoint.
    pub user_info: Value,
    /// Unverified claims of the access token.
    pub claims: Value,
    /// Realm roles from `realm_access.roles`.
    pub roles: Vec<String>,
    /// Entries of `authorization.permissions`, present on RPT tokens.
    pub permissions: Vec<Value>,
}

/// Where [`KeycloakClient::has_role`] looks for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope {
    /// `realm_access.roles`
    Realm,
    /// `resource_access.<client_id>.roles`
    Client,
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// True when the token's `exp` has passed or cannot be read.
pub fn is_token_expired(token: &str) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims["exp"].as_i64().unwrap_or(0) <= Utc::now().timestamp(),
        Err(_) => true,
    }
}

/// Expiry and audience checks on already verified claims.
fn check_claims(claims: &Value, audience: &str, now: i64) -> Result<()> {
    let exp = claims["exp"]
        .as_i64()
        .ok_or_else(|| Error::Auth("Token has no expiry".to_string()))?;
    if exp <= now {
        return Err(Error::Auth("Token has expired".to_string()));
    }

    let matches = match &claims["aud"] {
        Value::String(aud) => aud == audience,
        Value::Array(auds) => auds.iter().any(|a| a.as_str() == Some(audience)),
        _ => false,
    };
    if !matches {
        return Err(Error::Auth(format!(
            "Token is not issued for audience '{}'",
            audience
        )));
    }
    Ok(())
}

async fn decode_body<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Provider(format!("{}: malformed response: {}", what, e)))
}

/// Client for one Keycloak realm.
pub struct KeycloakClient {
    server_url: String,
    realm: String,
    client_id: String,
    client_secret: Option<SecretString>,
    admin: Option<(String, SecretString)>,
    http: Client,
    keys: OnceCell<JwkSet>,
    admin_token: OnceCell<String>,
}

impl KeycloakClient {
    pub fn new(
        server_url: impl Into<String>,
        realm: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            realm: realm.into(),
            client_id: client_id.into(),
            client_secret: None,
            admin: None,
            http: Client::new(),
            keys: OnceCell::new(),
            admin_token: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &KeycloakSettings) -> Self {
        let mut client = Self::new(
            settings.server_url.clone(),
            settings.realm_name.clone(),
            settings.client_id.clone(),
        );
        client.client_secret = settings.client_secret.clone();
        if let (Some(user), Some(password)) = (&settings.admin_username, &settings.admin_password)
        {
            client = client.with_admin(user.clone(), password.clone());
        }
        client
    }

    pub fn with_client_secret(mut self, secret: SecretString) -> Self {
        self.client_secret = Some(secret);
        self
    }

    /// Admin account used for the user management calls.
    pub fn with_admin(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.admin = Some((username.into(), password));
        self.admin_token = OnceCell::new();
        self
    }

    fn oidc_url(&self, endpoint: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.server_url, self.realm, endpoint
        )
    }

    fn users_url(&self) -> String {
        format!("{}/admin/realms/{}/users", self.server_url, self.realm)
    }

    /// Form fields identifying this client, plus `fields`.
    fn client_form(&self, fields: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut form = vec![("client_id".to_string(), self.client_id.clone())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.expose().to_string()));
        }
        form.extend(fields.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        form
    }

    async fn post_form(
        &self,
        endpoint: &str,
        form: &[(String, String)],
        what: &str,
    ) -> Result<Response> {
        let response = self
            .http
            .post(self.oidc_url(endpoint))
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        check(response, what).await
    }

    async fn request_token(&self, form: &[(String, String)], what: &str) -> Result<RawToken> {
        let response = self.post_form("token", form, what).await?;
        decode_body(response, what).await
    }

    async fn token_set(&self, raw: RawToken) -> Result<TokenSet> {
        let claims = decode_claims(&raw.access_token)?;
        let user_info = self.user_info(&raw.access_token).await?;
        let expires_in = raw.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);

        Ok(TokenSet {
            roles: string_list(&claims["realm_access"]["roles"]),
            permissions: claims["authorization"]["permissions"]
                .as_array()
                .cloned()
                .unwrap_or_default(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            token_type: raw.token_type.unwrap_or_else(|| "Bearer".to_string()),
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            expires_in,
            user_info,
            claims,
        })
    }

    /// Sign a user in with the password grant.
    ///
    /// # Errors
    /// - `InvalidInput` if either credential is empty
    /// - `Auth` if Keycloak rejects the credentials
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenSet> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::InvalidInput(
                "Username and password are required".to_string(),
            ));
        }
        let form = self.client_form(&[
            ("grant_type", "password"),
            ("scope", "openid"),
            ("username", username),
            ("password", password),
        ]);
        let raw = self.request_token(&form, "Keycloak sign-in").await?;

        info!("Signed in {} to realm {}", username, self.realm);
        self.token_set(raw).await
    }

    /// Trade a refresh token for a new token set.
    ///
    /// # Errors
    /// - `Auth` if the refresh token is expired or revoked
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        let form = self.client_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        let raw = self.request_token(&form, "Keycloak refresh").await?;
        self.token_set(raw).await
    }

    /// Claims of the userinfo endpoint for an access token.
    pub async fn user_info(&self, access_token: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.oidc_url("userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak userinfo", e))?;
        read_json(response, "Keycloak userinfo").await
    }

    /// Ask Keycloak whether a token is active. An inactive token is not an
    /// error; the response carries `"active": false`.
    pub async fn introspect_token(&self, token: &str) -> Result<Value> {
        let form = self.client_form(&[("token", token)]);
        let response = self
            .post_form("token/introspect", &form, "Keycloak introspect")
            .await?;
        decode_body(response, "Keycloak introspect").await
    }

    /// End the session behind a refresh token.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let form = self.client_form(&[("refresh_token", refresh_token)]);
        self.post_form("logout", &form, "Keycloak logout").await?;
        info!("Logged out of realm {}", self.realm);
        Ok(())
    }

    /// The realm's OpenID Connect discovery document.
    pub async fn well_known(&self) -> Result<Value> {
        let url = format!(
            "{}/realms/{}/.well-known/openid-configuration",
            self.server_url, self.realm
        );
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak discovery", e))?;
        read_json(response, "Keycloak discovery").await
    }

    async fn signing_keys(&self) -> Result<&JwkSet> {
        self.keys
            .get_or_try_init(|| async {
                debug!("Fetching signing keys of realm {}", self.realm);
                let response = self
                    .http
                    .get(self.oidc_url("certs"))
                    .send()
                    .await
                    .map_err(|e| transport_error("Keycloak certs", e))?;
                read_json(response, "Keycloak certs").await
            })
            .await
    }

    /// Verify an access token locally against the realm's signing keys and
    /// return its claims. `audience` defaults to the client id.
    ///
    /// # Errors
    /// - `Auth` if the signature, expiry or audience does not check out
    pub async fn validate_token(&self, token: &str, audience: Option<&str>) -> Result<Value> {
        let claims = verify_rs256(token, self.signing_keys().await?)?;
        check_claims(
            &claims,
            audience.unwrap_or(&self.client_id),
            Utc::now().timestamp(),
        )?;
        Ok(claims)
    }

    /// Whether the token grants `role`. The signature is not checked; an
    /// unreadable token has no roles.
    pub fn has_role(&self, token: &str, role: &str, scope: RoleScope) -> bool {
        let claims = match decode_claims(token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("Role check on unreadable token: {}", e);
                return false;
            }
        };
        let roles = match scope {
            RoleScope::Realm => &claims["realm_access"]["roles"],
            RoleScope::Client => &claims["resource_access"][self.client_id.as_str()]["roles"],
        };
        string_list(roles).iter().any(|r| r == role)
    }

    async fn admin_bearer(&self) -> Result<&str> {
        let (username, password) = self.admin.as_ref().ok_or_else(|| {
            Error::InvalidInput(
                "User management needs admin_username and admin_password".to_string(),
            )
        })?;
        let token = self
            .admin_token
            .get_or_try_init(|| async {
                let form = self.client_form(&[
                    ("grant_type", "password"),
                    ("username", username.as_str()),
                    ("password", password.expose()),
                ]);
                let raw = self.request_token(&form, "Keycloak admin sign-in").await?;
                Ok::<_, Error>(raw.access_token)
            })
            .await?;
        Ok(token.as_str())
    }

    /// Create a user from a Keycloak user representation and return its id.
    ///
    /// # Errors
    /// - `InvalidInput` without admin credentials
    /// - `Provider` if the user exists already (409) or Keycloak sends no
    ///   location for the new user
    pub async fn create_user(&self, user: &Map<String, Value>) -> Result<String> {
        let response = self
            .http
            .post(self.users_url())
            .bearer_auth(self.admin_bearer().await?)
            .json(user)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak create user", e))?;
        let response = check(response, "Keycloak create user").await?;

        let id = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| location.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Provider("Keycloak create user: no location for the new user".to_string())
            })?;
        info!("Created Keycloak user {}", id);
        Ok(id)
    }

    /// # Errors
    /// - `NotFound` if no user has `user_id`
    pub async fn get_user(&self, user_id: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}/{}", self.users_url(), user_id))
            .bearer_auth(self.admin_bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak get user", e))?;
        read_json(response, "Keycloak get user").await
    }

    /// Overwrite the given fields of a user representation.
    pub async fn update_user(&self, user_id: &str, fields: &Map<String, Value>) -> Result<()> {
        let response = self
            .http
            .put(format!("{}/{}", self.users_url(), user_id))
            .bearer_auth(self.admin_bearer().await?)
            .json(fields)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak update user", e))?;
        check(response, "Keycloak update user").await?;
        info!("Updated Keycloak user {}", user_id);
        Ok(())
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/{}", self.users_url(), user_id))
            .bearer_auth(self.admin_bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("Keycloak delete user", e))?;
        check(response, "Keycloak delete user").await?;
        info!("Deleted Keycloak user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flextk_auth::jwt::sign_rs256;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_FILE: &str = include_str!("../../auth/testdata/service_account.json");

    fn token(claims: Value) -> String {
        let key: Value = serde_json::from_str(KEY_FILE).unwrap();
        sign_rs256(&claims, key["private_key"].as_str().unwrap(), Some("realm-key")).unwrap()
    }

    fn access_token() -> String {
        token(json!({
            "sub": "u-1",
            "exp": Utc::now().timestamp() + 300,
            "aud": ["flextk", "account"],
            "realm_access": { "roles": ["editor", "offline_access"] },
            "resource_access": { "flextk": { "roles": ["uploader"] } }
        }))
    }

    fn client(server: &MockServer) -> KeycloakClient {
        KeycloakClient::new(server.uri(), "media", "flextk").with_client_secret("s3cret".into())
    }

    async fn mount_userinfo(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/realms/media/protocol/openid-connect/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "u-1",
                "preferred_username": "ada"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_authenticate_collects_roles_and_user_info() {
        let server = MockServer::start().await;
        let access = access_token();
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("client_secret=s3cret"))
            .and(body_string_contains("username=ada"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access,
                "refresh_token": "r-1",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_userinfo(&server).await;

        let tokens = client(&server).authenticate("ada", "pw").await.unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(tokens.expires_in, 300);
        assert_eq!(tokens.roles, vec!["editor", "offline_access"]);
        assert_eq!(tokens.user_info["preferred_username"], "ada");
        assert!(tokens.permissions.is_empty());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid user credentials"
            })))
            .mount(&server)
            .await;

        let result = client(&server).authenticate("ada", "wrong").await;
        assert!(matches!(result, Err(Error::Auth(_))));
        let result = client(&server).authenticate("", "pw").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_refresh_defaults_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token(),
                "refresh_token": "r-2"
            })))
            .mount(&server)
            .await;
        mount_userinfo(&server).await;

        let tokens = client(&server).refresh_token("r-1").await.unwrap();
        assert_eq!(tokens.refresh_token.as_deref(), Some("r-2"));
        assert_eq!(tokens.expires_in, DEFAULT_EXPIRES_IN);
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_introspect_and_logout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/token/introspect"))
            .and(body_string_contains("token=opaque"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": false })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/logout"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let result = client.introspect_token("opaque").await.unwrap();
        assert_eq!(result["active"], false);
        client.logout("r-1").await.unwrap();
    }

    #[test]
    fn test_role_checks() {
        let client = KeycloakClient::new("https://sso.example.com", "media", "flextk");
        let token = access_token();
        assert!(client.has_role(&token, "editor", RoleScope::Realm));
        assert!(!client.has_role(&token, "uploader", RoleScope::Realm));
        assert!(client.has_role(&token, "uploader", RoleScope::Client));
        assert!(!client.has_role("not-a-jwt", "editor", RoleScope::Realm));
    }

    #[test]
    fn test_expiry_and_audience() {
        let now = 1_700_000_000;
        let claims = json!({ "exp": now + 60, "aud": ["flextk", "account"] });
        assert!(check_claims(&claims, "flextk", now).is_ok());
        assert!(matches!(
            check_claims(&claims, "other", now),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            check_claims(&claims, "flextk", now + 61),
            Err(Error::Auth(msg)) if msg.contains("expired")
        ));
        assert!(check_claims(&json!({ "exp": now + 60, "aud": "flextk" }), "flextk", now).is_ok());

        assert!(!is_token_expired(&access_token()));
        assert!(is_token_expired(&token(json!({ "exp": 1 }))));
        assert!(is_token_expired("garbage"));
    }

    #[tokio::test]
    async fn test_validate_rejects_unknown_signing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realms/media/protocol/openid-connect/certs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{ "kid": "rotated", "kty": "RSA", "n": "AQAB", "e": "AQAB" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let result = client.validate_token(&access_token(), None).await;
        assert!(matches!(result, Err(Error::Auth(_))));
        // Keys are fetched once per client.
        let result = client.validate_token(&access_token(), None).await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_admin_user_lifecycle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/realms/media/protocol/openid-connect/token"))
            .and(body_string_contains("username=root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "admin-tok",
                "expires_in": 60
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/admin/realms/media/users"))
            .and(header_eq("authorization", "Bearer admin-tok"))
            .respond_with(ResponseTemplate::new(201).insert_header(
                "location",
                format!("{}/admin/realms/media/users/9f1c", server.uri()).as_str(),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/admin/realms/media/users/9f1c"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "9f1c", "username": "bo" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/admin/realms/media/users/9f1c"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/admin/realms/media/users/9f1c"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).with_admin("root", "admin-pw".into());
        let mut user = Map::new();
        user.insert("username".to_string(), json!("bo"));
        user.insert("enabled".to_string(), json!(true));

        let id = client.create_user(&user).await.unwrap();
        assert_eq!(id, "9f1c");
        assert_eq!(client.get_user(&id).await.unwrap()["username"], "bo");

        let mut fields = Map::new();
        fields.insert("email".to_string(), json!("bo@example.com"));
        client.update_user(&id, &fields).await.unwrap();
        client.delete_user(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_management_needs_admin() {
        let server = MockServer::start().await;
        let result = client(&server).get_user("9f1c").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
