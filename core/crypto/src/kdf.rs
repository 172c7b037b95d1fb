//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{ConfigKey, Salt, KEY_LENGTH};
use flextk_common::{Error, Result};

/// Largest memory cost accepted from a stored header, in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Largest iteration count accepted from a stored header.
pub const MAX_TIME_COST: u32 = 64;

/// Largest lane count accepted from a stored header.
pub const MAX_PARALLELISM: u32 = 64;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// The store derives a key once per CLI invocation, so this targets
    /// well under a second on a laptop.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained machines.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Check that the parameters are within the range we are willing to
    /// run. Headers read from disk go through this before any derivation,
    /// so a corrupted file cannot request an unbounded allocation.
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any parameter is zero or above its cap
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF parallelism {} out of range",
                self.parallelism
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(Error::InvalidInput(format!(
                "KDF time cost {} out of range",
                self.time_cost
            )));
        }
        if self.memory_cost < 8 * self.parallelism || self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost {} KiB out of range",
                self.memory_cost
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a configuration key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must pass [`KdfParams::validate`]
///
/// # Postconditions
/// - Returns a ConfigKey derived from the password
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if password is empty
/// - Returns error if Argon2id parameters are invalid
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<ConfigKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::InvalidInput(format!("Key derivation failed: {}", e)))?;

    Ok(ConfigKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let password = b"test-password-123";
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(password, &salt, &fast()).unwrap();
        let key2 = derive_key(password, &salt, &fast()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_salt() {
        let password = b"test-password-123";
        let salt1 = Salt::from_bytes([1u8; 32]);
        let salt2 = Salt::from_bytes([2u8; 32]);

        let key1 = derive_key(password, &salt1, &fast()).unwrap();
        let key2 = derive_key(password, &salt2, &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_different_password() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(b"password1", &salt, &fast()).unwrap();
        let key2 = derive_key(b"password2", &salt, &fast()).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derive_key_empty_password_fails() {
        let salt = Salt::generate();
        assert!(derive_key(b"", &salt, &fast()).is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_memory() {
        let params = KdfParams {
            memory_cost: MAX_MEMORY_COST + 1,
            time_cost: 1,
            parallelism: 1,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_lanes() {
        let params = KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 0,
        };
        assert!(matches!(params.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_presets_are_valid() {
        KdfParams::interactive().validate().unwrap();
        KdfParams::moderate().validate().unwrap();
    }
}
