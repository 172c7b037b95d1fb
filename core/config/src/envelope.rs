//! Binary layout of the configuration file.
//!
//! ```text
//! offset  size  field
//! 0       8     magic "FLEXTK01"
//! 8       4     kdf memory cost, KiB (u32 LE)
//! 12      4     kdf time cost (u32 LE)
//! 16      4     kdf parallelism (u32 LE)
//! 20      32    salt
//! 52      24    nonce
//! 76      ..    ciphertext || 16-byte tag
//! ```
//!
//! The 52-byte header is passed as associated data, so flipping any header
//! byte fails authentication just like flipping a ciphertext byte.

use flextk_common::{Error, Result, SensitiveBytes};
use flextk_crypto::{derive_key, ConfigKey, KdfParams, Salt, NONCE_SIZE, SALT_LENGTH, TAG_SIZE};

/// File magic, which doubles as the format version.
pub const MAGIC: &[u8; 8] = b"FLEXTK01";

/// Size of the cleartext header.
pub const HEADER_LEN: usize = MAGIC.len() + 12 + SALT_LENGTH;

/// Cleartext header: everything needed to re-derive the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kdf: KdfParams,
    pub salt: Salt,
}

impl Header {
    /// Header with a freshly generated salt.
    pub fn generate(kdf: KdfParams) -> Self {
        Self {
            kdf,
            salt: Salt::generate(),
        }
    }

    /// Encode the header in its on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(MAGIC);
        out[8..12].copy_from_slice(&self.kdf.memory_cost.to_le_bytes());
        out[12..16].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        out[16..20].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        out[20..].copy_from_slice(self.salt.as_bytes());
        out
    }

    /// Parse the header from the start of a stored blob.
    ///
    /// # Errors
    /// - `Decryption` if the blob is too short, the magic is wrong, or the
    ///   KDF parameters are outside the accepted range
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < HEADER_LEN + NONCE_SIZE + TAG_SIZE {
            return Err(Error::Decryption(
                "Configuration file is truncated".to_string(),
            ));
        }
        if &blob[..8] != MAGIC {
            return Err(Error::Decryption(
                "Not a flextk configuration file".to_string(),
            ));
        }

        let kdf = KdfParams {
            memory_cost: read_u32(&blob[8..12]),
            time_cost: read_u32(&blob[12..16]),
            parallelism: read_u32(&blob[16..20]),
        };
        kdf.validate()
            .map_err(|e| Error::Decryption(format!("Unsupported header: {}", e)))?;

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(&blob[20..HEADER_LEN]);

        Ok(Self {
            kdf,
            salt: Salt::from_bytes(salt),
        })
    }

    /// Derive the sealing key for this header.
    pub fn derive(&self, password: &[u8]) -> Result<ConfigKey> {
        derive_key(password, &self.salt, &self.kdf)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

/// Seal `plaintext` under `key`, producing the complete file contents.
pub fn seal(header: &Header, key: &ConfigKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let head = header.to_bytes();
    let sealed = flextk_crypto::encrypt(key, plaintext, &head)?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(&head);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a stored blob with an already-derived key.
///
/// # Errors
/// - `Decryption` on any authentication failure
pub fn open_with_key(header: &Header, key: &ConfigKey, blob: &[u8]) -> Result<SensitiveBytes> {
    let head = header.to_bytes();
    let plaintext = flextk_crypto::decrypt(key, &blob[HEADER_LEN..], &head)?;
    Ok(SensitiveBytes::new(plaintext))
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
    fn test_header_layout() {
        let header = Header {
            kdf: fast(),
            salt: Salt::from_bytes([9u8; SALT_LENGTH]),
        };
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[..8], b"FLEXTK01");
        assert_eq!(&bytes[8..12], &1024u32.to_le_bytes());
        assert_eq!(&bytes[20..], &[9u8; SALT_LENGTH]);
    }

    #[test]
    fn test_seal_then_open() {
        let header = Header::generate(fast());
        let key = header.derive(b"pw").unwrap();
        let blob = seal(&header, &key, b"{}").unwrap();

        let parsed = Header::parse(&blob).unwrap();
        assert_eq!(parsed, header);

        let plain = open_with_key(&parsed, &parsed.derive(b"pw").unwrap(), &blob).unwrap();
        assert_eq!(plain.as_bytes(), b"{}");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let header = Header::generate(fast());
        let key = header.derive(b"pw").unwrap();
        let mut blob = seal(&header, &key, b"{}").unwrap();
        blob[0] = b'X';

        assert!(matches!(Header::parse(&blob), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(
            Header::parse(&[0u8; HEADER_LEN]),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_absurd_kdf_params_rejected_before_derivation() {
        let header = Header::generate(fast());
        let key = header.derive(b"pw").unwrap();
        let mut blob = seal(&header, &key, b"{}").unwrap();
        blob[8..12].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(Header::parse(&blob), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_salt_fails_authentication() {
        let header = Header::generate(fast());
        let key = header.derive(b"pw").unwrap();
        let mut blob = seal(&header, &key, b"{}").unwrap();
        blob[30] ^= 0x01;

        // The header still parses; the key derived from it no longer opens
        // the payload.
        let parsed = Header::parse(&blob).unwrap();
        let result = open_with_key(&parsed, &parsed.derive(b"pw").unwrap(), &blob);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }
}
