//! Cryptographic primitives for the flextk configuration store.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption with associated data using XChaCha20-Poly1305
//! - Key material that is zeroized on drop
//!
//! Nothing here is a new construction; the store composes these two
//! standard primitives and relies on the Poly1305 tag as its only
//! integrity check.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{ConfigKey, Salt, KEY_LENGTH, SALT_LENGTH};
