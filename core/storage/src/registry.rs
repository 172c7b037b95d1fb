//! Provider registry for resolving stores from configuration sections.

use std::collections::HashMap;
use std::sync::Arc;

use flextk_common::{Error, Result};
use flextk_config::{ProviderSettings, Section};

use crate::provider::ObjectStore;

/// Factory function type for creating stores from a stored section.
pub type ProviderFactory = Box<dyn Fn(&Section) -> Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Registry for object store factories, keyed by section name.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Errors
    /// - `AlreadyExists` if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a store from the section stored under `name`.
    ///
    /// # Errors
    /// - `NotFound` if no provider is registered under `name`
    /// - `InvalidInput` if the section does not match the provider's schema
    pub fn resolve(&self, name: &str, section: &Section) -> Result<Arc<dyn ObjectStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(section)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn settings_for(name: &str, section: &Section) -> Result<ProviderSettings> {
    ProviderSettings::from_section(name, section)
}

/// Create a registry with every built-in backend.
pub fn create_default_registry() -> ProviderRegistry {
    let mut factories: HashMap<String, ProviderFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_section| Ok(Arc::new(crate::memory::MemoryStore::new()))),
    );

    factories.insert(
        "gcs".to_string(),
        Box::new(|section| match settings_for("gcs", section)? {
            ProviderSettings::Gcs(s) => Ok(Arc::new(crate::gcs::GcsStore::from_settings(&s)?)),
            _ => Err(Error::InvalidInput("gcs section expected".to_string())),
        }),
    );

    factories.insert(
        "bb2".to_string(),
        Box::new(|section| match settings_for("bb2", section)? {
            ProviderSettings::Bb2(s) => Ok(Arc::new(crate::b2::B2Store::from_settings(&s))),
            _ => Err(Error::InvalidInput("bb2 section expected".to_string())),
        }),
    );

    factories.insert(
        "s3".to_string(),
        Box::new(|section| match settings_for("s3", section)? {
            ProviderSettings::S3(s) => Ok(Arc::new(crate::s3::S3Store::from_settings(&s))),
            _ => Err(Error::InvalidInput("s3 section expected".to_string())),
        }),
    );

    factories.insert(
        "drive".to_string(),
        Box::new(|section| match settings_for("drive", section)? {
            ProviderSettings::Drive(s) => {
                Ok(Arc::new(crate::gdrive::DriveStore::from_settings(&s)?))
            }
            _ => Err(Error::InvalidInput("drive section expected".to_string())),
        }),
    );

    ProviderRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use flextk_config::SettingValue;

    fn section(pairs: &[(&str, &str)]) -> Section {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), SettingValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ProviderRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", &Section::new()).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ProviderRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = create_default_registry();
        let result = registry.resolve("ftp", &Section::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_default_providers() {
        assert_eq!(
            create_default_registry().providers(),
            vec!["bb2", "drive", "gcs", "memory", "s3"]
        );
    }

    #[test]
    fn test_resolve_from_sections() {
        let registry = create_default_registry();

        let b2 = registry
            .resolve(
                "bb2",
                &section(&[("app_id", "id"), ("app_key", "key"), ("bucket_name", "bkt")]),
            )
            .unwrap();
        assert_eq!((b2.name(), b2.bucket()), ("bb2", "bkt"));

        let s3 = registry
            .resolve(
                "s3",
                &section(&[
                    ("access_key", "AK"),
                    ("secret_key", "SK"),
                    ("bucket_name", "data"),
                    ("region", "eu-west-1"),
                ]),
            )
            .unwrap();
        assert_eq!((s3.name(), s3.bucket()), ("s3", "data"));

        let key_file = concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../auth/testdata/service_account.json"
        );
        let gcs = registry
            .resolve(
                "gcs",
                &section(&[("bucket_name", "media"), ("service_account", key_file)]),
            )
            .unwrap();
        assert_eq!((gcs.name(), gcs.bucket()), ("gcs", "media"));

        let drive = registry
            .resolve("drive", &section(&[("service_account", key_file), ("folder_id", "F1")]))
            .unwrap();
        assert_eq!((drive.name(), drive.bucket()), ("drive", "F1"));
    }

    #[test]
    fn test_incomplete_section_is_invalid_input() {
        let registry = create_default_registry();
        let result = registry.resolve("s3", &section(&[("access_key", "AK")]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
