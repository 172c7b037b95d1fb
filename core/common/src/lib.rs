//! Common utilities and types shared across flextk crates.
//!
//! Every library crate in the workspace reports failures through the
//! [`Error`] taxonomy defined here, so the CLI can map any failure to a
//! stable exit code.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ObjectPath, SecretString, SensitiveBytes};
