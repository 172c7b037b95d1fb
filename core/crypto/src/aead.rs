//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Callers bind
//! their cleartext header to the ciphertext through the associated data.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::ConfigKey;
use flextk_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns nonce || ciphertext || tag
/// - The nonce is randomly generated
/// - The output length is plaintext length + NONCE_SIZE + TAG_SIZE
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &ConfigKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| Error::InvalidInput(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext using XChaCha20-Poly1305.
///
/// # Preconditions
/// - `ciphertext` format: nonce || encrypted_data || tag
/// - `aad` must be the same associated data passed to [`encrypt`]
///
/// # Errors
/// - Returns `Decryption` if the input is too short
/// - Returns `Decryption` if authentication fails (wrong key, tampered
///   data or mismatched associated data)
pub fn decrypt(key: &ConfigKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted,
                aad,
            },
        )
        .map_err(|_| Error::Decryption("Authentication tag mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    fn key(byte: u8) -> ConfigKey {
        ConfigKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = b"{\"gcs\":{}}";

        let ciphertext = encrypt(&key(42), plaintext, b"header").unwrap();
        let decrypted = decrypt(&key(42), &ciphertext, b"header").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let plaintext = b"Test message";
        let ciphertext = encrypt(&key(42), plaintext, b"").unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let ct1 = encrypt(&key(42), b"same", b"").unwrap();
        let ct2 = encrypt(&key(42), b"same", b"").unwrap();

        assert_ne!(&ct1[..NONCE_SIZE], &ct2[..NONCE_SIZE]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(&key(1), b"Secret data", b"").unwrap();
        let result = decrypt(&key(2), &ciphertext, b"");

        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut ciphertext = encrypt(&key(42), b"Important data", b"").unwrap();
        ciphertext[NONCE_SIZE + 5] ^= 0xFF;

        assert!(decrypt(&key(42), &ciphertext, b"").is_err());
    }

    #[test]
    fn test_mismatched_associated_data_fails() {
        let ciphertext = encrypt(&key(42), b"payload", b"header-v1").unwrap();
        let result = decrypt(&key(42), &ciphertext, b"header-v2");

        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_truncated_input_fails() {
        let result = decrypt(&key(42), &[0u8; NONCE_SIZE + TAG_SIZE - 1], b"");
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_empty_plaintext() {
        let ciphertext = encrypt(&key(42), b"", b"aad").unwrap();
        let decrypted = decrypt(&key(42), &ciphertext, b"aad").unwrap();

        assert!(decrypted.is_empty());
    }
}
