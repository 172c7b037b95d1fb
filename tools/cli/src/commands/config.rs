//! `flextk config ...`

use anyhow::{Context as _, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tracing::info;
use zeroize::Zeroizing;

use flextk_config::settings::{
    Bb2Settings, DriveSettings, FirebaseSettings, GcsSettings, KeycloakSettings, S3Settings,
    StripeSettings, UnsplashSettings,
};
use flextk_config::ProviderSettings;

use crate::context::{prompt_password, Context};

const REDACTED: &str = "********";

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Create the store or change its master password.
    SetPassword {
        /// New master password (prompted when absent).
        #[arg(long = "pass_key", alias = "pass-key")]
        pass_key: Option<String>,
        /// Current master password, required once a store exists.
        #[arg(long = "current_pass_key", alias = "current-pass-key")]
        current_pass_key: Option<String>,
    },

    /// Discard every stored section and start over with a new password.
    ResetPassword {
        #[arg(long = "pass_key", alias = "pass-key")]
        pass_key: Option<String>,
    },

    /// Store Google Cloud Storage settings.
    Gcs {
        #[arg(long = "bucket_name", alias = "bucket-name")]
        bucket_name: String,
        /// Service-account JSON key file.
        #[arg(long = "service_account", alias = "service-account")]
        service_account: PathBuf,
    },

    /// Store BackBlaze B2 settings.
    Bb2 {
        #[arg(long = "app_id", alias = "app-id")]
        app_id: String,
        #[arg(long = "app_key", alias = "app-key")]
        app_key: String,
        #[arg(long = "bucket_name", alias = "bucket-name")]
        bucket_name: Option<String>,
    },

    /// Store AWS S3 settings.
    S3 {
        #[arg(long = "access_key", alias = "access-key")]
        access_key: String,
        #[arg(long = "secret_key", alias = "secret-key")]
        secret_key: String,
        #[arg(long = "bucket_name", alias = "bucket-name")]
        bucket_name: String,
        #[arg(long)]
        region: String,
        /// S3-compatible endpoint URL.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Store Google Drive settings.
    Drive {
        #[arg(long = "service_account", alias = "service-account")]
        service_account: Option<PathBuf>,
        /// Folder used as the root of remote paths.
        #[arg(long = "folder_id", alias = "folder-id")]
        folder_id: Option<String>,
        #[arg(long = "client_id", alias = "client-id")]
        client_id: Option<String>,
        #[arg(long = "client_secret", alias = "client-secret")]
        client_secret: Option<String>,
        #[arg(long = "refresh_token", alias = "refresh-token")]
        refresh_token: Option<String>,
    },

    /// Store Unsplash API settings.
    Unsplash {
        #[arg(long = "app_id", alias = "app-id")]
        app_id: String,
        #[arg(long = "access_key", alias = "access-key")]
        access_key: String,
        #[arg(long = "secret_key", alias = "secret-key")]
        secret_key: String,
    },

    /// Store the Stripe API key.
    Stripe {
        #[arg(long = "api_key", alias = "api-key")]
        api_key: String,
    },

    /// Store the Firebase service account.
    Firebase {
        #[arg(long = "service_account", alias = "service-account")]
        service_account: PathBuf,
    },

    /// Store Keycloak realm and client settings.
    Keycloak {
        #[arg(long = "server_url", alias = "server-url")]
        server_url: String,
        #[arg(long = "realm_name", alias = "realm-name")]
        realm_name: String,
        #[arg(long = "client_id", alias = "client-id")]
        client_id: String,
        #[arg(long = "client_secret", alias = "client-secret")]
        client_secret: Option<String>,
        /// Admin account for user management.
        #[arg(long = "admin_username", alias = "admin-username")]
        admin_username: Option<String>,
        #[arg(long = "admin_password", alias = "admin-password")]
        admin_password: Option<String>,
    },

    /// Print a section with secrets redacted.
    Show {
        section: String,
    },

    /// List stored section names.
    Sections,

    /// Delete a section.
    Remove {
        section: String,
    },
}

pub async fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::SetPassword {
            pass_key,
            current_pass_key,
        } => cmd_set_password(ctx, pass_key, current_pass_key),
        ConfigCommand::ResetPassword { pass_key } => cmd_reset_password(ctx, pass_key),
        ConfigCommand::Gcs {
            bucket_name,
            service_account,
        } => cmd_store(
            ctx,
            ProviderSettings::Gcs(GcsSettings {
                bucket_name,
                service_account,
            }),
        ),
        ConfigCommand::Bb2 {
            app_id,
            app_key,
            bucket_name,
        } => cmd_store(
            ctx,
            ProviderSettings::Bb2(Bb2Settings {
                app_id,
                app_key: app_key.into(),
                bucket_name,
            }),
        ),
        ConfigCommand::S3 {
            access_key,
            secret_key,
            bucket_name,
            region,
            endpoint,
        } => cmd_store(
            ctx,
            ProviderSettings::S3(S3Settings {
                access_key,
                secret_key: secret_key.into(),
                bucket_name,
                region,
                endpoint,
            }),
        ),
        ConfigCommand::Drive {
            service_account,
            folder_id,
            client_id,
            client_secret,
            refresh_token,
        } => cmd_store(
            ctx,
            ProviderSettings::Drive(DriveSettings {
                service_account,
                folder_id,
                client_id,
                client_secret: client_secret.map(Into::into),
                refresh_token: refresh_token.map(Into::into),
            }),
        ),
        ConfigCommand::Unsplash {
            app_id,
            access_key,
            secret_key,
        } => cmd_store(
            ctx,
            ProviderSettings::Unsplash(UnsplashSettings {
                app_id,
                access_key: access_key.into(),
                secret_key: secret_key.into(),
            }),
        ),
        ConfigCommand::Stripe { api_key } => cmd_store(
            ctx,
            ProviderSettings::Stripe(StripeSettings {
                api_key: api_key.into(),
            }),
        ),
        ConfigCommand::Firebase { service_account } => cmd_store(
            ctx,
            ProviderSettings::Firebase(FirebaseSettings { service_account }),
        ),
        ConfigCommand::Keycloak {
            server_url,
            realm_name,
            client_id,
            client_secret,
            admin_username,
            admin_password,
        } => cmd_store(
            ctx,
            ProviderSettings::Keycloak(KeycloakSettings {
                server_url,
                realm_name,
                client_id,
                client_secret: client_secret.map(Into::into),
                admin_username,
                admin_password: admin_password.map(Into::into),
            }),
        ),
        ConfigCommand::Show { section } => cmd_show(ctx, &section),
        ConfigCommand::Sections => cmd_sections(ctx),
        ConfigCommand::Remove { section } => cmd_remove(ctx, &section),
    }
}

/// Ask twice for a new password.
fn prompt_new_password() -> Result<Zeroizing<String>> {
    let password = prompt_password("New master password: ")?;
    let confirm = prompt_password("Confirm master password: ")?;
    if *password != *confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}

fn cmd_set_password(
    ctx: &Context,
    pass_key: Option<String>,
    current_pass_key: Option<String>,
) -> Result<()> {
    let new_password = match pass_key {
        Some(p) => Zeroizing::new(p),
        None => prompt_new_password()?,
    };

    let current = match current_pass_key.map(Zeroizing::new) {
        Some(p) => Some(p),
        None if ctx.store.exists() => Some(ctx.password()?),
        None => None,
    };

    ctx.store
        .set_password(
            new_password.as_bytes(),
            current.as_ref().map(|p| p.as_bytes()),
        )
        .context("Failed to set password")?;

    println!("Master password set.");
    println!("  Store: {}", ctx.store.path().display());
    Ok(())
}

fn cmd_reset_password(ctx: &Context, pass_key: Option<String>) -> Result<()> {
    let new_password = match pass_key {
        Some(p) => Zeroizing::new(p),
        None => prompt_new_password()?,
    };

    ctx.store
        .reset_password(new_password.as_bytes())
        .context("Failed to reset password")?;

    println!("Configuration reset; all stored sections were removed.");
    Ok(())
}

fn cmd_store(ctx: &Context, settings: ProviderSettings) -> Result<()> {
    settings.validate()?;
    let name = settings.section_name();
    let section = settings.to_section()?;

    let password = ctx.password()?;
    ctx.store
        .write(name, section, password.as_bytes())
        .with_context(|| format!("Failed to save '{}' settings", name))?;

    info!("Saved '{}' settings", name);
    println!("Saved {} settings.", name);
    Ok(())
}

fn cmd_show(ctx: &Context, section: &str) -> Result<()> {
    let password = ctx.password()?;
    let values = ctx
        .store
        .read(section, password.as_bytes())
        .with_context(|| format!("Failed to read section '{}'", section))?;

    let secrets = ProviderSettings::secret_fields(section);
    println!("[{}]", section);
    for (key, value) in &values {
        if secrets.contains(&key.as_str()) {
            println!("{}: {}", key, REDACTED);
        } else {
            println!("{}: {}", key, value);
        }
    }
    Ok(())
}

fn cmd_sections(ctx: &Context) -> Result<()> {
    let password = ctx.password()?;
    let sections = ctx
        .store
        .sections(password.as_bytes())
        .context("Failed to read configuration")?;

    if sections.is_empty() {
        println!("No sections stored.");
    }
    for name in sections {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_remove(ctx: &Context, section: &str) -> Result<()> {
    let password = ctx.password()?;
    ctx.store
        .remove_section(section, password.as_bytes())
        .with_context(|| format!("Failed to remove section '{}'", section))?;

    println!("Removed {}.", section);
    Ok(())
}
