//! Credentials for Google-backed adapters.
//!
//! GCS, Drive, Firestore and Firebase Auth all authenticate with a short
//! lived bearer token. This crate turns a service-account key file or an
//! OAuth refresh token into such tokens and caches them until shortly
//! before they expire. It also holds the response handling shared by all
//! REST adapters.

pub mod http;
pub mod jwt;
pub mod oauth;
pub mod service_account;
pub mod token;

pub use oauth::RefreshTokenSource;
pub use service_account::{ServiceAccount, ServiceAccountSource};
pub use token::{AccessToken, StaticToken, TokenCache, TokenSource};

/// OAuth scopes used by the adapters.
pub mod scopes {
    pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";
    pub const DEVSTORAGE_READ_WRITE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
    pub const DRIVE: &str = "https://www.googleapis.com/auth/drive";
    pub const DATASTORE: &str = "https://www.googleapis.com/auth/datastore";
    pub const IDENTITY_TOOLKIT: &str = "https://www.googleapis.com/auth/identitytoolkit";
}
