//! Google Drive backend.
//!
//! [`DriveClient`] wraps the Drive v3 REST calls; [`DriveStore`] maps object
//! keys onto nested folders below a root folder.

pub mod client;
pub mod provider;

pub use client::{DriveClient, DriveFile};
pub use provider::DriveStore;
