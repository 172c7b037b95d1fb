//! Per-invocation state: the configuration store and how credentials are
//! looked up.

use anyhow::{Context as _, Result};
use std::path::PathBuf;
use tracing::debug;
use zeroize::Zeroizing;

use flextk_config::{ConfigStore, ProviderSettings, Section, SettingValue};

pub struct Context {
    pub store: ConfigStore,
    password: Option<String>,
}

impl Context {
    pub fn new(config: Option<PathBuf>, password: Option<String>) -> Result<Self> {
        let store = match config {
            Some(path) => ConfigStore::new(path),
            None => ConfigStore::open_default().context("Failed to locate configuration file")?,
        };
        debug!("Using configuration at {}", store.path().display());
        Ok(Self { store, password })
    }

    /// The `--password` flag or `FLEXTK_PASSWORD`, if either was given.
    pub fn given_password(&self) -> Option<Zeroizing<String>> {
        self.password.clone().map(Zeroizing::new)
    }

    /// Master password from the flag, the environment, or a prompt.
    pub fn password(&self) -> Result<Zeroizing<String>> {
        match self.given_password() {
            Some(password) => Ok(password),
            None => prompt_password("Master password: "),
        }
    }

    /// Typed settings for `section`.
    ///
    /// Values from flags and the environment are used on their own when they
    /// are complete; otherwise they are laid over the stored section.
    pub fn settings(&self, section: &str, overrides: Section) -> Result<ProviderSettings> {
        if !overrides.is_empty() {
            if let Ok(settings) = ProviderSettings::from_section(section, &overrides) {
                debug!("Using {} credentials from flags and environment", section);
                return Ok(settings);
            }
        }

        let password = self.password()?;
        let mut stored = self
            .store
            .read(section, password.as_bytes())
            .with_context(|| format!("Failed to read '{}' credentials", section))?;
        stored.extend(overrides);
        ProviderSettings::from_section(section, &stored)
            .with_context(|| format!("Invalid '{}' configuration", section))
    }
}

pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(prompt)
        .map(Zeroizing::new)
        .context("Failed to read password")
}

/// Collect the flags that were given into a section.
pub fn overrides<'a>(values: impl IntoIterator<Item = (&'a str, Option<String>)>) -> Section {
    values
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), SettingValue::Text(v))))
        .collect()
}
