//! The password-protected configuration store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use flextk_common::{Error, Result};
use flextk_crypto::{ConfigKey, KdfParams};

use crate::envelope::{self, Header};
use crate::staged::StagedFile;
use crate::value::Section;

/// Environment variable that overrides the default store location.
pub const CONFIG_ENV_VAR: &str = "FLEXTK_CONFIG";

/// Directory under the platform config dir that holds the store.
const CONFIG_DIRNAME: &str = "flex_tk";

/// Store file name.
const CONFIG_FILENAME: &str = "config.enc";

/// Default store location: `$FLEXTK_CONFIG`, else
/// `<config_dir>/flex_tk/config.enc`.
///
/// # Errors
/// - `InvalidInput` if the platform has no config directory
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let base = dirs::config_dir().ok_or_else(|| {
        Error::InvalidInput("Could not determine the user config directory".to_string())
    })?;
    Ok(base.join(CONFIG_DIRNAME).join(CONFIG_FILENAME))
}

/// Decrypted contents of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(default)]
    pub sections: BTreeMap<String, Section>,
}

/// An unlocked store: the header and key stay around so a mutation can be
/// written back without running the KDF a second time.
struct Unlocked {
    header: Header,
    key: ConfigKey,
    config: StoredConfig,
}

/// Handle to the encrypted configuration file.
///
/// Every operation takes the master password explicitly; nothing decrypted
/// outlives the call that needed it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    kdf_params: KdfParams,
}

impl ConfigStore {
    /// Store backed by the file at `path`, using interactive KDF parameters
    /// for newly created or rotated files.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kdf_params: KdfParams::interactive(),
        }
    }

    /// Store at [`default_config_path`].
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_config_path()?))
    }

    /// Override the KDF parameters used when a new key is established.
    /// Existing files keep the parameters recorded in their header until
    /// the next password change.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a store file has been created.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Establish or rotate the master password.
    ///
    /// # Preconditions
    /// - `new_password` must not be empty
    /// - If a store already exists, `current_password` must decrypt it
    ///
    /// # Postconditions
    /// - The store is sealed under `new_password` with a fresh salt
    /// - All existing sections are preserved
    ///
    /// # Errors
    /// - `Auth` if the new password is empty
    /// - `Auth` if a store exists and `current_password` is missing or
    ///   does not decrypt it
    pub fn set_password(&self, new_password: &[u8], current_password: Option<&[u8]>) -> Result<()> {
        ensure_password(new_password)?;

        let config = match self.read_blob()? {
            None => {
                info!("Creating configuration store at {}", self.path.display());
                StoredConfig::default()
            }
            Some(blob) => {
                let current = current_password.ok_or_else(|| {
                    Error::Auth(
                        "A password is already set; the current password is required to change it"
                            .to_string(),
                    )
                })?;
                let unlocked = unlock(&blob, current).map_err(|e| match e {
                    Error::Decryption(_) => Error::Auth(
                        "Current password does not decrypt the existing store".to_string(),
                    ),
                    other => other,
                })?;
                info!("Rotating configuration store password");
                unlocked.config
            }
        };

        let header = Header::generate(self.kdf_params);
        let key = header.derive(new_password)?;
        self.persist(&header, &key, &config)
    }

    /// Replace the store with an empty one sealed under `new_password`.
    ///
    /// This is the recovery path for a forgotten password: every section is
    /// discarded.
    pub fn reset_password(&self, new_password: &[u8]) -> Result<()> {
        ensure_password(new_password)?;
        info!("Resetting configuration store; all sections are discarded");

        let header = Header::generate(self.kdf_params);
        let key = header.derive(new_password)?;
        self.persist(&header, &key, &StoredConfig::default())
    }

    /// Merge `values` into `section` and write the store back atomically.
    ///
    /// Keys present in `values` overwrite existing keys; keys absent from
    /// `values` are kept.
    ///
    /// # Errors
    /// - `Auth` if no store exists yet or the password is empty
    /// - `Decryption` if the password is wrong or the file is corrupt
    /// - `InvalidInput` for a malformed section name or value
    pub fn write(&self, section: &str, values: Section, password: &[u8]) -> Result<()> {
        validate_section_name(section)?;
        for (key, value) in &values {
            value.validate(key)?;
        }

        let mut unlocked = self.unlock(password)?;
        unlocked
            .config
            .sections
            .entry(section.to_string())
            .or_default()
            .extend(values);

        debug!("Writing section '{}'", section);
        self.persist(&unlocked.header, &unlocked.key, &unlocked.config)
    }

    /// Decrypt the store and return one section.
    ///
    /// # Errors
    /// - `Auth` if no store exists yet or the password is empty
    /// - `Decryption` if the password is wrong or the file is corrupt
    /// - `NotFound` if the section is absent
    pub fn read(&self, section: &str, password: &[u8]) -> Result<Section> {
        let unlocked = self.unlock(password)?;
        let mut config = unlocked.config;
        config
            .sections
            .remove(section)
            .ok_or_else(|| Error::NotFound(format!("Configuration section '{}'", section)))
    }

    /// Decrypt the whole store.
    pub fn load(&self, password: &[u8]) -> Result<StoredConfig> {
        Ok(self.unlock(password)?.config)
    }

    /// Names of all stored sections.
    pub fn sections(&self, password: &[u8]) -> Result<Vec<String>> {
        Ok(self.load(password)?.sections.into_keys().collect())
    }

    /// Delete a section.
    ///
    /// # Errors
    /// - `NotFound` if the section is absent
    pub fn remove_section(&self, section: &str, password: &[u8]) -> Result<()> {
        let mut unlocked = self.unlock(password)?;
        if unlocked.config.sections.remove(section).is_none() {
            return Err(Error::NotFound(format!(
                "Configuration section '{}'",
                section
            )));
        }
        self.persist(&unlocked.header, &unlocked.key, &unlocked.config)
    }

    fn unlock(&self, password: &[u8]) -> Result<Unlocked> {
        ensure_password(password)?;
        let blob = self.read_blob()?.ok_or_else(|| {
            Error::Auth(
                "Password has not been set; run `flextk config set-password` first".to_string(),
            )
        })?;
        unlock(&blob, password)
    }

    fn read_blob(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, header: &Header, key: &ConfigKey, config: &StoredConfig) -> Result<()> {
        let plaintext = zeroize::Zeroizing::new(
            serde_json::to_vec(config).map_err(|e| Error::Serialization(e.to_string()))?,
        );
        let blob = envelope::seal(header, key, &plaintext)?;
        StagedFile::create(&self.path, &blob)?.commit()
    }
}

fn unlock(blob: &[u8], password: &[u8]) -> Result<Unlocked> {
    let header = Header::parse(blob)?;
    let key = header.derive(password)?;
    let plaintext = envelope::open_with_key(&header, &key, blob)?;
    let config: StoredConfig = serde_json::from_slice(plaintext.as_bytes())
        .map_err(|e| Error::Decryption(format!("Store payload is malformed: {}", e)))?;
    Ok(Unlocked {
        header,
        key,
        config,
    })
}

fn ensure_password(password: &[u8]) -> Result<()> {
    if password.is_empty() {
        return Err(Error::Auth("Password cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_section_name(section: &str) -> Result<()> {
    let valid = !section.is_empty()
        && section
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(Error::InvalidInput(format!(
            "Invalid section name '{}'",
            section
        )));
    }
    Ok(())
}
