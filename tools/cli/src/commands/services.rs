//! `flextk auth`, `flextk firestore`, `flextk payment` and `flextk unsplash`.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use flextk_common::{Error, SecretString};
use flextk_config::settings::FirebaseSettings;
use flextk_config::{ProviderSettings, Section};
use flextk_services::{
    is_token_expired, Document, FirebaseAuth, Firestore, KeycloakClient, PaymentIntentParams,
    PhotoSize, RefundReason, RoleScope, StripeClient, UnsplashClient,
};

use super::{parse_object, print_json};
use crate::context::{overrides, prompt_password, Context};

#[derive(Args)]
pub struct FirebaseCreds {
    /// Service-account JSON key file of the Firebase project.
    #[arg(
        long = "service_account",
        alias = "service-account",
        env = "GOOGLE_APPLICATION_CREDENTIALS"
    )]
    service_account: Option<PathBuf>,
}

impl FirebaseCreds {
    fn resolve(self, ctx: &Context) -> Result<FirebaseSettings> {
        let section = overrides([(
            "service_account",
            self.service_account
                .map(|p| p.to_string_lossy().into_owned()),
        )]);
        match ctx.settings("firebase", section)? {
            ProviderSettings::Firebase(s) => Ok(s),
            other => anyhow::bail!("Unexpected settings for firebase: {}", other.section_name()),
        }
    }
}

#[derive(Args)]
pub struct KeycloakCreds {
    #[arg(long = "server_url", alias = "server-url", env = "KEYCLOAK_URL")]
    server_url: Option<String>,
    #[arg(long = "realm_name", alias = "realm-name", env = "KEYCLOAK_REALM")]
    realm_name: Option<String>,
    #[arg(long = "client_id", alias = "client-id", env = "KEYCLOAK_CLIENT_ID")]
    client_id: Option<String>,
    #[arg(
        long = "client_secret",
        alias = "client-secret",
        env = "KEYCLOAK_CLIENT_SECRET",
        hide_env_values = true
    )]
    client_secret: Option<String>,
    #[arg(
        long = "admin_username",
        alias = "admin-username",
        env = "KEYCLOAK_ADMIN_USERNAME"
    )]
    admin_username: Option<String>,
    #[arg(
        long = "admin_password",
        alias = "admin-password",
        env = "KEYCLOAK_ADMIN_PASSWORD",
        hide_env_values = true
    )]
    admin_password: Option<String>,
}

impl KeycloakCreds {
    fn resolve(self, ctx: &Context) -> Result<KeycloakClient> {
        let section = overrides([
            ("server_url", self.server_url),
            ("realm_name", self.realm_name),
            ("client_id", self.client_id),
            ("client_secret", self.client_secret),
            ("admin_username", self.admin_username),
            ("admin_password", self.admin_password),
        ]);
        match ctx.settings("keycloak", section)? {
            ProviderSettings::Keycloak(s) => Ok(KeycloakClient::from_settings(&s)),
            other => anyhow::bail!("Unexpected settings for keycloak: {}", other.section_name()),
        }
    }
}

#[derive(Subcommand)]
pub enum AuthCommand {
    /// Firebase Authentication users.
    Firebase {
        #[command(flatten)]
        creds: FirebaseCreds,
        #[command(subcommand)]
        action: UserAction,
    },
    /// Keycloak sign-in, tokens and users.
    Keycloak {
        #[command(flatten)]
        creds: KeycloakCreds,
        #[command(subcommand)]
        action: KeycloakAction,
    },
}

#[derive(Subcommand)]
pub enum KeycloakAction {
    /// Sign in with a username and password and print the tokens.
    Login {
        #[arg(long)]
        username: String,
        /// Prompted when absent.
        #[arg(long = "user_password", alias = "user-password")]
        user_password: Option<String>,
    },
    /// Exchange a refresh token for new tokens.
    Refresh {
        #[arg(long = "refresh_token", alias = "refresh-token")]
        refresh_token: String,
    },
    /// End the session of a refresh token.
    Logout {
        #[arg(long = "refresh_token", alias = "refresh-token")]
        refresh_token: String,
    },
    /// Ask Keycloak whether a token is active.
    Introspect {
        #[arg(long)]
        token: String,
    },
    /// Verify a token's signature, expiry and audience locally.
    Validate {
        #[arg(long)]
        token: String,
        /// Expected audience; the client id by default.
        #[arg(long)]
        audience: Option<String>,
    },
    /// Print the userinfo claims of an access token.
    UserInfo {
        #[arg(long)]
        token: String,
    },
    /// Check whether a token carries a role.
    HasRole {
        #[arg(long)]
        token: String,
        #[arg(long)]
        role: String,
        /// Look at the client's roles instead of the realm's.
        #[arg(long)]
        client: bool,
    },
    /// Print the realm's OpenID Connect discovery document.
    WellKnown,
    /// Create a user from a JSON user representation.
    CreateUser {
        #[arg(long)]
        data: String,
    },
    /// Print a user.
    GetUser {
        #[arg(long = "user_id", alias = "user-id")]
        user_id: String,
    },
    /// Overwrite fields of a user.
    UpdateUser {
        #[arg(long = "user_id", alias = "user-id")]
        user_id: String,
        #[arg(long)]
        data: String,
    },
    /// Delete a user.
    DeleteUser {
        #[arg(long = "user_id", alias = "user-id")]
        user_id: String,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Look up one user by uid, email or phone number.
    GetUser {
        #[arg(long, group = "lookup")]
        uid: Option<String>,
        #[arg(long, group = "lookup")]
        email: Option<String>,
        #[arg(long = "phone_number", alias = "phone-number", group = "lookup")]
        phone_number: Option<String>,
    },
    /// List one page of users.
    ListUsers {
        #[arg(long = "max_results", alias = "max-results", default_value_t = 1000)]
        max_results: u32,
        #[arg(long = "page_token", alias = "page-token")]
        page_token: Option<String>,
    },
}

pub async fn run_auth(ctx: &Context, cmd: AuthCommand) -> Result<()> {
    match cmd {
        AuthCommand::Firebase { creds, action } => run_firebase_auth(ctx, creds, action).await,
        AuthCommand::Keycloak { creds, action } => run_keycloak(ctx, creds, action).await,
    }
}

async fn run_keycloak(ctx: &Context, creds: KeycloakCreds, action: KeycloakAction) -> Result<()> {
    let keycloak = creds.resolve(ctx)?;
    match action {
        KeycloakAction::Login {
            username,
            user_password,
        } => {
            let password = match user_password {
                Some(p) => zeroize::Zeroizing::new(p),
                None => prompt_password(&format!("Password for {}: ", username))?,
            };
            let tokens = keycloak
                .authenticate(&username, &password)
                .await
                .context("Sign-in failed")?;
            print_json(&tokens)
        }
        KeycloakAction::Refresh { refresh_token } => {
            let tokens = keycloak
                .refresh_token(&refresh_token)
                .await
                .context("Token refresh failed")?;
            print_json(&tokens)
        }
        KeycloakAction::Logout { refresh_token } => {
            keycloak.logout(&refresh_token).await.context("Logout failed")?;
            println!("Logged out.");
            Ok(())
        }
        KeycloakAction::Introspect { token } => {
            let result = keycloak
                .introspect_token(&token)
                .await
                .context("Token introspection failed")?;
            print_json(&result)
        }
        KeycloakAction::Validate { token, audience } => {
            let claims = keycloak
                .validate_token(&token, audience.as_deref())
                .await
                .context("Token is not valid")?;
            print_json(&claims)
        }
        KeycloakAction::UserInfo { token } => {
            let info = keycloak
                .user_info(&token)
                .await
                .context("Failed to read user info")?;
            print_json(&info)
        }
        KeycloakAction::WellKnown => {
            let config = keycloak
                .well_known()
                .await
                .context("Failed to read discovery document")?;
            print_json(&config)
        }
        KeycloakAction::CreateUser { data } => {
            let user = parse_object(&data)?;
            let id = keycloak
                .create_user(&user)
                .await
                .context("Failed to create user")?;
            println!("{}", id);
            Ok(())
        }
        KeycloakAction::GetUser { user_id } => {
            let user = keycloak
                .get_user(&user_id)
                .await
                .context("Failed to read user")?;
            print_json(&user)
        }
        KeycloakAction::UpdateUser { user_id, data } => {
            let fields = parse_object(&data)?;
            keycloak
                .update_user(&user_id, &fields)
                .await
                .context("Failed to update user")?;
            println!("Updated {}", user_id);
            Ok(())
        }
        KeycloakAction::DeleteUser { user_id } => {
            keycloak
                .delete_user(&user_id)
                .await
                .context("Failed to delete user")?;
            println!("Deleted {}", user_id);
            Ok(())
        }
        KeycloakAction::HasRole {
            token,
            role,
            client,
        } => {
            let scope = if client { RoleScope::Client } else { RoleScope::Realm };
            println!("{}", keycloak.has_role(&token, &role, scope));
            if is_token_expired(&token) {
                eprintln!("Warning: the token has expired");
            }
            Ok(())
        }
    }
}

async fn run_firebase_auth(ctx: &Context, creds: FirebaseCreds, action: UserAction) -> Result<()> {
    let auth = FirebaseAuth::from_settings(&creds.resolve(ctx)?)?;

    match action {
        UserAction::GetUser {
            uid,
            email,
            phone_number,
        } => {
            let user = match (uid, email, phone_number) {
                (Some(uid), _, _) => auth.get_user_by_id(&uid).await,
                (_, Some(email), _) => auth.get_user_by_email(&email).await,
                (_, _, Some(phone)) => auth.get_user_by_phone_number(&phone).await,
                _ => Err(Error::InvalidInput(
                    "One of --uid, --email or --phone_number is required".to_string(),
                )),
            }
            .context("User lookup failed")?;
            print_json(&user)
        }
        UserAction::ListUsers {
            max_results,
            page_token,
        } => {
            let page = auth
                .list_users(max_results, page_token.as_deref())
                .await
                .context("Failed to list users")?;
            print_json(&page)
        }
    }
}

#[derive(Args)]
pub struct FirestoreArgs {
    #[command(flatten)]
    creds: FirebaseCreds,
    #[command(subcommand)]
    action: DocumentAction,
}

#[derive(Subcommand)]
pub enum DocumentAction {
    /// Print one document.
    Get { collection: String, id: String },
    /// Print every document in a collection.
    List { collection: String },
    /// Create or replace a document with a JSON object.
    Set {
        collection: String,
        id: String,
        #[arg(long)]
        data: String,
    },
    /// Overwrite the given top-level fields of a document.
    Update {
        collection: String,
        id: String,
        #[arg(long)]
        data: String,
    },
    /// Delete a document.
    Delete { collection: String, id: String },
}

fn document_json(doc: &Document) -> serde_json::Value {
    json!({
        "id": doc.id,
        "name": doc.name,
        "fields": doc.fields,
        "create_time": doc.create_time.map(|t| t.to_rfc3339()),
        "update_time": doc.update_time.map(|t| t.to_rfc3339()),
    })
}

pub async fn run_firestore(ctx: &Context, args: FirestoreArgs) -> Result<()> {
    let db = Firestore::from_settings(&args.creds.resolve(ctx)?)?;

    match args.action {
        DocumentAction::Get { collection, id } => {
            let doc = db
                .get_document(&collection, &id)
                .await
                .context("Failed to read document")?
                .ok_or_else(|| Error::NotFound(format!("Document {}/{}", collection, id)))?;
            print_json(&document_json(&doc))
        }
        DocumentAction::List { collection } => {
            let docs = db
                .list_documents(&collection)
                .await
                .context("Failed to list documents")?;
            let rendered: Vec<_> = docs.iter().map(document_json).collect();
            print_json(&rendered)
        }
        DocumentAction::Set {
            collection,
            id,
            data,
        } => {
            let data = parse_object(&data)?;
            let doc = db
                .set_document(&collection, &id, &data)
                .await
                .context("Failed to write document")?;
            print_json(&document_json(&doc))
        }
        DocumentAction::Update {
            collection,
            id,
            data,
        } => {
            let data = parse_object(&data)?;
            let doc = db
                .update_document(&collection, &id, &data)
                .await
                .context("Failed to update document")?;
            print_json(&document_json(&doc))
        }
        DocumentAction::Delete { collection, id } => {
            db.delete_document(&collection, &id)
                .await
                .context("Failed to delete document")?;
            println!("Deleted {}/{}", collection, id);
            Ok(())
        }
    }
}

#[derive(Args)]
pub struct PaymentArgs {
    #[arg(long = "api_key", alias = "api-key", env = "STRIPE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[command(subcommand)]
    action: PaymentAction,
}

#[derive(Subcommand)]
pub enum PaymentAction {
    /// Create a payment intent.
    CreateIntent {
        /// Amount in the currency's smallest unit.
        #[arg(long)]
        amount: i64,
        #[arg(long, default_value = "usd")]
        currency: String,
        #[arg(
            long = "payment_method_types",
            alias = "payment-method-types",
            value_delimiter = ',',
            default_value = "card"
        )]
        payment_method_types: Vec<String>,
        #[arg(long)]
        customer: Option<String>,
        /// Metadata as key=value, repeatable.
        #[arg(long, value_parser = parse_key_value)]
        metadata: Vec<(String, String)>,
    },
    /// Confirm a payment intent.
    ConfirmIntent {
        #[arg(long = "intent_id", alias = "intent-id")]
        intent_id: String,
        #[arg(long = "payment_method", alias = "payment-method")]
        payment_method: Option<String>,
    },
    /// Print a payment intent.
    GetIntent {
        #[arg(long = "intent_id", alias = "intent-id")]
        intent_id: String,
    },
    /// Refund part or all of a payment intent.
    Refund {
        #[arg(long = "intent_id", alias = "intent-id")]
        intent_id: String,
        #[arg(long)]
        amount: i64,
        /// duplicate, fraudulent or requested_by_customer.
        #[arg(long, default_value = "requested_by_customer")]
        reason: RefundReason,
    },
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

pub async fn run_payment(ctx: &Context, args: PaymentArgs) -> Result<()> {
    let settings = match ctx.settings("stripe", overrides([("api_key", args.api_key)]))? {
        ProviderSettings::Stripe(s) => s,
        other => anyhow::bail!("Unexpected settings for stripe: {}", other.section_name()),
    };
    let stripe = StripeClient::from_settings(&settings);

    match args.action {
        PaymentAction::CreateIntent {
            amount,
            currency,
            payment_method_types,
            customer,
            metadata,
        } => {
            let mut params = PaymentIntentParams::new(amount);
            params.currency = currency;
            params.payment_method_types = payment_method_types;
            params.customer = customer;
            params.metadata = metadata.into_iter().collect::<BTreeMap<_, _>>();
            let intent = stripe
                .create_payment_intent(&params)
                .await
                .context("Failed to create payment intent")?;
            print_json(&intent)
        }
        PaymentAction::ConfirmIntent {
            intent_id,
            payment_method,
        } => {
            let intent = stripe
                .confirm_payment_intent(&intent_id, payment_method.as_deref())
                .await
                .context("Failed to confirm payment intent")?;
            print_json(&intent)
        }
        PaymentAction::GetIntent { intent_id } => {
            let intent = stripe
                .get_payment_intent(&intent_id)
                .await
                .context("Failed to read payment intent")?;
            print_json(&intent)
        }
        PaymentAction::Refund {
            intent_id,
            amount,
            reason,
        } => {
            let refund = stripe
                .create_refund(&intent_id, amount, reason)
                .await
                .context("Failed to create refund")?;
            print_json(&refund)
        }
    }
}

#[derive(Args)]
pub struct UnsplashArgs {
    #[arg(
        long = "access_key",
        alias = "access-key",
        env = "UNSPLASH_ACCESS_KEY",
        hide_env_values = true
    )]
    access_key: Option<String>,
    #[command(subcommand)]
    action: PhotoAction,
}

#[derive(Subcommand)]
pub enum PhotoAction {
    /// Search photos, optionally downloading the results.
    Search {
        query: String,
        #[arg(long = "per_page", alias = "per-page", default_value_t = 10)]
        per_page: u32,
        /// Directory to download the results into.
        #[arg(long = "download_dir", alias = "download-dir")]
        download_dir: Option<PathBuf>,
        /// raw, full, regular, small or thumb.
        #[arg(long, default_value = "regular")]
        size: PhotoSize,
    },
    /// Random photos, optionally downloaded.
    Random {
        #[arg(long, default_value_t = 1)]
        count: u32,
        #[arg(long = "download_dir", alias = "download-dir")]
        download_dir: Option<PathBuf>,
        #[arg(long, default_value = "regular")]
        size: PhotoSize,
    },
}

fn unsplash_client(ctx: &Context, access_key: Option<String>) -> Result<UnsplashClient> {
    if let Some(key) = access_key {
        return Ok(UnsplashClient::new(SecretString::new(key)));
    }
    match ctx.settings("unsplash", Section::new())? {
        ProviderSettings::Unsplash(s) => Ok(UnsplashClient::from_settings(&s)),
        other => anyhow::bail!("Unexpected settings for unsplash: {}", other.section_name()),
    }
}

pub async fn run_unsplash(ctx: &Context, args: UnsplashArgs) -> Result<()> {
    let client = unsplash_client(ctx, args.access_key)?;

    match args.action {
        PhotoAction::Search {
            query,
            per_page,
            download_dir: Some(dir),
            size,
        } => {
            let paths = client
                .download_search(&query, per_page, size, &dir)
                .await
                .context("Failed to download search results")?;
            for path in &paths {
                println!("{}", path.display());
            }
            Ok(())
        }
        PhotoAction::Search {
            query,
            per_page,
            download_dir: None,
            ..
        } => {
            let results = client
                .search_photos(&query, per_page)
                .await
                .context("Photo search failed")?;
            println!("{} results ({} pages)", results.total, results.total_pages);
            for photo in &results.results {
                println!(
                    "{}  {:>5}x{:<5}  {}",
                    photo.id, photo.width, photo.height, photo.urls.regular
                );
            }
            Ok(())
        }
        PhotoAction::Random {
            count,
            download_dir,
            size,
        } => {
            let photos = client
                .random_photos(count)
                .await
                .context("Failed to fetch random photos")?;
            for photo in &photos {
                match &download_dir {
                    Some(dir) => {
                        let path = client.download_photo(photo, size, dir).await?;
                        println!("{}", path.display());
                    }
                    None => println!("{}  {}", photo.id, photo.urls.regular),
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flextk_config::settings::StripeSettings;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("order=42").unwrap(),
            ("order".to_string(), "42".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_stripe_key_from_flag_skips_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(Some(dir.path().join("none.enc")), None).unwrap();
        let settings = ctx
            .settings("stripe", overrides([("api_key", Some("sk_test_9".to_string()))]))
            .unwrap();
        assert_eq!(
            settings,
            ProviderSettings::Stripe(StripeSettings {
                api_key: "sk_test_9".into()
            })
        );
    }
}
