//! Object storage adapters for flextk.
//!
//! Each backend implements [`ObjectStore`], a narrow upload / download /
//! list / delete surface over a single bucket (or Drive folder). Backends
//! are constructed from validated configuration sections through the
//! [`ProviderRegistry`].
//!
//! # Design Principles
//! - No global clients: every store owns its HTTP client and credentials
//! - Base URLs are injectable so adapters can be exercised against a mock
//! - Provider failures map onto the shared error taxonomy; nothing retries

pub mod b2;
pub mod gcs;
pub mod gdrive;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod s3;

pub use b2::{B2Bucket, B2BucketType, B2Store};
pub use gcs::{GcsBucket, GcsStore};
pub use gdrive::{DriveClient, DriveStore};
pub use memory::MemoryStore;
pub use provider::{guess_content_type, BucketFile, ByteStream, ObjectStore};
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use s3::S3Store;
