//! Common error types for flextk.

use thiserror::Error;

/// Top-level error type for flextk operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing password or provider credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The configuration store could not be decrypted.
    ///
    /// Raised for a wrong password as well as for a corrupt or tampered
    /// file; the two cases are indistinguishable by construction.
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Missing configuration section or remote resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote API rejected the request or answered with something we
    /// could not interpret.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An external conversion binary failed or is not installed.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Process exit code reported by the CLI for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Auth(_) => 2,
            Error::Decryption(_) => 3,
            Error::NotFound(_) => 4,
            Error::Provider(_) => 5,
            Error::Conversion(_) => 6,
            Error::InvalidInput(_) => 7,
            Error::Io(_) | Error::Serialization(_) | Error::AlreadyExists(_) => 1,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
