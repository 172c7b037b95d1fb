//! Typed provider settings.
//!
//! Sections are stored as loose key/value maps; this module is the single
//! place where they are checked against the shape each provider needs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use flextk_common::{Error, Result, SecretString};

use crate::value::{Section, SettingValue};

/// Google Cloud Storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcsSettings {
    pub bucket_name: String,
    /// Path to a service-account JSON key file.
    pub service_account: PathBuf,
}

/// BackBlaze B2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bb2Settings {
    pub app_id: String,
    pub app_key: SecretString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
}

/// AWS S3 or an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Settings {
    pub access_key: String,
    pub secret_key: SecretString,
    pub bucket_name: String,
    pub region: String,
    /// Custom endpoint, e.g. a MinIO server. Virtual-hosted AWS URLs are
    /// used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Google Drive. Either a service account or an OAuth client with a
/// refresh token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriveSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<PathBuf>,
    /// Folder that acts as the root for remote paths; `root` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SecretString>,
}

/// Unsplash API application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsplashSettings {
    pub app_id: String,
    pub access_key: SecretString,
    pub secret_key: SecretString,
}

/// Stripe secret or restricted key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeSettings {
    pub api_key: SecretString,
}

/// Firebase project, shared by Firestore and Firebase Auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirebaseSettings {
    pub service_account: PathBuf,
}

/// Keycloak realm and client. The admin pair is only needed for user
/// management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeycloakSettings {
    pub server_url: String,
    pub realm_name: String,
    pub client_id: String,
    /// Secret of a confidential client; public clients have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<SecretString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<SecretString>,
}

/// Settings for one provider section, validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    Gcs(GcsSettings),
    Bb2(Bb2Settings),
    S3(S3Settings),
    Drive(DriveSettings),
    Unsplash(UnsplashSettings),
    Stripe(StripeSettings),
    Firebase(FirebaseSettings),
    Keycloak(KeycloakSettings),
}

impl ProviderSettings {
    /// All section names with a typed schema.
    pub const SECTIONS: &'static [&'static str] = &[
        "gcs", "bb2", "s3", "drive", "unsplash", "stripe", "firebase", "keycloak",
    ];

    /// Name of the store section these settings live in.
    pub fn section_name(&self) -> &'static str {
        match self {
            ProviderSettings::Gcs(_) => "gcs",
            ProviderSettings::Bb2(_) => "bb2",
            ProviderSettings::S3(_) => "s3",
            ProviderSettings::Drive(_) => "drive",
            ProviderSettings::Unsplash(_) => "unsplash",
            ProviderSettings::Stripe(_) => "stripe",
            ProviderSettings::Firebase(_) => "firebase",
            ProviderSettings::Keycloak(_) => "keycloak",
        }
    }

    /// Keys whose values must not be printed.
    pub fn secret_fields(section: &str) -> &'static [&'static str] {
        match section {
            "bb2" => &["app_key"],
            "s3" => &["secret_key"],
            "drive" => &["client_secret", "refresh_token"],
            "unsplash" => &["access_key", "secret_key"],
            "stripe" => &["api_key"],
            "keycloak" => &["client_secret", "admin_password"],
            _ => &[],
        }
    }

    /// Parse and validate a stored section.
    ///
    /// # Errors
    /// - `NotFound` if `name` has no typed schema
    /// - `InvalidInput` if required keys are missing or malformed
    pub fn from_section(name: &str, section: &Section) -> Result<Self> {
        let settings = match name {
            "gcs" => ProviderSettings::Gcs(decode(name, section)?),
            "bb2" => ProviderSettings::Bb2(decode(name, section)?),
            "s3" => ProviderSettings::S3(decode(name, section)?),
            "drive" => ProviderSettings::Drive(decode(name, section)?),
            "unsplash" => ProviderSettings::Unsplash(decode(name, section)?),
            "stripe" => ProviderSettings::Stripe(decode(name, section)?),
            "firebase" => ProviderSettings::Firebase(decode(name, section)?),
            "keycloak" => ProviderSettings::Keycloak(decode(name, section)?),
            other => {
                return Err(Error::NotFound(format!(
                    "No provider schema for section '{}'",
                    other
                )))
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Flatten into a store section. Unset optional keys are omitted.
    pub fn to_section(&self) -> Result<Section> {
        match self {
            ProviderSettings::Gcs(s) => encode(s),
            ProviderSettings::Bb2(s) => encode(s),
            ProviderSettings::S3(s) => encode(s),
            ProviderSettings::Drive(s) => encode(s),
            ProviderSettings::Unsplash(s) => encode(s),
            ProviderSettings::Stripe(s) => encode(s),
            ProviderSettings::Firebase(s) => encode(s),
            ProviderSettings::Keycloak(s) => encode(s),
        }
    }

    /// Check field contents beyond their presence.
    ///
    /// # Errors
    /// - `InvalidInput` describing the first offending field
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderSettings::Gcs(s) => {
                require("bucket_name", &s.bucket_name)?;
                service_account_path(&s.service_account)
            }
            ProviderSettings::Bb2(s) => {
                require("app_id", &s.app_id)?;
                require("app_key", s.app_key.expose())
            }
            ProviderSettings::S3(s) => {
                require("access_key", &s.access_key)?;
                require("secret_key", s.secret_key.expose())?;
                require("bucket_name", &s.bucket_name)?;
                require("region", &s.region)
            }
            ProviderSettings::Drive(s) => {
                if let Some(path) = &s.service_account {
                    return service_account_path(path);
                }
                match (&s.client_id, &s.client_secret, &s.refresh_token) {
                    (Some(id), Some(secret), Some(token))
                        if !id.is_empty() && !secret.is_empty() && !token.is_empty() =>
                    {
                        Ok(())
                    }
                    _ => Err(Error::InvalidInput(
                        "drive needs either service_account or client_id, client_secret and refresh_token"
                            .to_string(),
                    )),
                }
            }
            ProviderSettings::Unsplash(s) => {
                require("app_id", &s.app_id)?;
                require("access_key", s.access_key.expose())?;
                require("secret_key", s.secret_key.expose())
            }
            ProviderSettings::Stripe(s) => require("api_key", s.api_key.expose()),
            ProviderSettings::Firebase(s) => service_account_path(&s.service_account),
            ProviderSettings::Keycloak(s) => {
                require("server_url", &s.server_url)?;
                if !(s.server_url.starts_with("https://") || s.server_url.starts_with("http://")) {
                    return Err(Error::InvalidInput(format!(
                        "server_url must be an http(s) URL: {}",
                        s.server_url
                    )));
                }
                require("realm_name", &s.realm_name)?;
                require("client_id", &s.client_id)?;
                match (&s.admin_username, &s.admin_password) {
                    (Some(_), None) | (None, Some(_)) => Err(Error::InvalidInput(
                        "admin_username and admin_password go together".to_string(),
                    )),
                    _ => Ok(()),
                }
            }
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, section: &Section) -> Result<T> {
    let value = serde_json::to_value(section).map_err(|e| Error::Serialization(e.to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidInput(format!("{} settings: {}", name, e)))
}

fn encode<T: Serialize>(settings: &T) -> Result<Section> {
    let value = serde_json::to_value(settings).map_err(|e| Error::Serialization(e.to_string()))?;
    let object = match value {
        serde_json::Value::Object(map) => map,
        _ => {
            return Err(Error::Serialization(
                "settings did not serialize to an object".to_string(),
            ))
        }
    };

    let mut section = Section::new();
    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        let setting: SettingValue =
            serde_json::from_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        section.insert(key, setting);
    }
    Ok(section)
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} cannot be empty", field)));
    }
    Ok(())
}

fn service_account_path(path: &Path) -> Result<()> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Err(Error::InvalidInput(format!(
            "service_account must be a .json file: {}",
            path.display()
        )));
    }
    if !path.exists() {
        warn!(
            "Service account file {} does not exist yet; it is read when the provider is used",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcs_from_section() {
        let mut section = Section::new();
        section.insert("bucket_name".to_string(), "b".into());
        section.insert("service_account".to_string(), "sa.json".into());

        let settings = ProviderSettings::from_section("gcs", &section).unwrap();
        assert_eq!(
            settings,
            ProviderSettings::Gcs(GcsSettings {
                bucket_name: "b".to_string(),
                service_account: PathBuf::from("sa.json"),
            })
        );
        assert_eq!(settings.to_section().unwrap(), section);
    }

    #[test]
    fn test_gcs_requires_json_key_file() {
        let settings = ProviderSettings::Gcs(GcsSettings {
            bucket_name: "b".to_string(),
            service_account: PathBuf::from("key.pem"),
        });
        assert!(matches!(settings.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_missing_field_is_invalid_input() {
        let mut section = Section::new();
        section.insert("app_id".to_string(), "id".into());

        let result = ProviderSettings::from_section("bb2", &section);
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("app_key")));
    }

    #[test]
    fn test_optional_keys_omitted() {
        let settings = ProviderSettings::Bb2(Bb2Settings {
            app_id: "id".to_string(),
            app_key: "key".into(),
            bucket_name: None,
        });
        let section = settings.to_section().unwrap();
        assert_eq!(section.len(), 2);
        assert!(!section.contains_key("bucket_name"));
    }

    #[test]
    fn test_drive_requires_some_credentials() {
        let settings = ProviderSettings::Drive(DriveSettings {
            folder_id: Some("abc".to_string()),
            ..Default::default()
        });
        assert!(settings.validate().is_err());

        let settings = ProviderSettings::Drive(DriveSettings {
            client_id: Some("cid".to_string()),
            client_secret: Some("secret".into()),
            refresh_token: Some("token".into()),
            ..Default::default()
        });
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_unknown_section_has_no_schema() {
        let result = ProviderSettings::from_section("ftp", &Section::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_secret_fields_hidden_from_debug() {
        let settings = StripeSettings {
            api_key: "sk_test_abc".into(),
        };
        assert!(!format!("{:?}", settings).contains("sk_test_abc"));
        assert_eq!(ProviderSettings::secret_fields("stripe"), &["api_key"]);
    }

    #[test]
    fn test_keycloak_section() {
        let mut section = Section::new();
        section.insert("server_url".to_string(), "https://sso.example.com".into());
        section.insert("realm_name".to_string(), "media".into());
        section.insert("client_id".to_string(), "flextk".into());

        let settings = ProviderSettings::from_section("keycloak", &section).unwrap();
        assert_eq!(settings.to_section().unwrap(), section);

        section.insert("admin_username".to_string(), "root".into());
        let result = ProviderSettings::from_section("keycloak", &section);
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("admin_password")));

        section.insert("server_url".to_string(), "sso.example.com".into());
        section.insert("admin_password".to_string(), "pw".into());
        let result = ProviderSettings::from_section("keycloak", &section);
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("server_url")));
    }
}
