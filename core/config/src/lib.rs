//! Encrypted local configuration store for flextk.
//!
//! Provider credentials live in a single file sealed with a key derived
//! from a master password. The store is opened once per CLI invocation:
//! decrypted into memory, mutated, and written back atomically.
//!
//! # Concurrency
//! The store assumes a single writer. Two processes writing at the same
//! time race and the last rename wins; no file lock is taken.

pub mod envelope;
pub mod settings;
pub mod staged;
pub mod store;
pub mod value;

pub use envelope::{Header, HEADER_LEN, MAGIC};
pub use settings::ProviderSettings;
pub use staged::StagedFile;
pub use store::{default_config_path, ConfigStore, StoredConfig, CONFIG_ENV_VAR};
pub use value::{Section, SettingValue};
