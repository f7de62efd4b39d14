//! Hierarchical key derivation: deployment master key -> per-user master key
//! -> per-secret data key, plus a stable fingerprint of the master key used
//! to detect rotation.

use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::constants::{
    DATA_KEY_ITERATIONS, KEY_BYTES, MASTER_KEY_HEX_CHARS, USER_KEY_ITERATIONS, USER_SALT_PREFIX,
};
use crate::error::CryptoError;

/// The deployment-wide master key. Held only by the process that constructs
/// a [`crate::aead::EncryptionService`]; never persisted.
pub struct MasterKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl MasterKey {
    /// Parse a 64-character lowercase-hex master key.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        if hex_str.len() != MASTER_KEY_HEX_CHARS || !hex_str.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(CryptoError::InvalidMasterKey);
        }
        let decoded = hex::decode(hex_str).map_err(|_| CryptoError::InvalidMasterKey)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self {
            bytes: Zeroizing::new(bytes),
        })
    }

    /// Lowercase-hex SHA-256 of the master key bytes. Stable across
    /// processes for the same key; used only to detect rotation, never as a
    /// credential.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes.as_slice());
        hex::encode(digest)
    }

    /// Derive the per-user master key for `user_id`.
    ///
    /// Fails with [`CryptoError::InvalidUserId`] if `user_id` is empty or
    /// entirely whitespace. Deterministic in `(master key, user_id)`.
    pub fn derive_user_master_key(&self, user_id: &str) -> Result<UserMasterKey, CryptoError> {
        if user_id.trim().is_empty() {
            return Err(CryptoError::InvalidUserId);
        }

        let mut salt = Vec::with_capacity(USER_SALT_PREFIX.len() + user_id.len());
        salt.extend_from_slice(USER_SALT_PREFIX.as_bytes());
        salt.extend_from_slice(user_id.as_bytes());

        let mut out = [0u8; KEY_BYTES];
        pbkdf2_hmac::<Sha256>(self.bytes.as_slice(), &salt, USER_KEY_ITERATIONS, &mut out);

        Ok(UserMasterKey {
            bytes: Zeroizing::new(out),
        })
    }
}

/// A per-user key derived from the deployment master key and a user id.
/// Lives for the lifetime of one user's [`crate::aead::EncryptionService`].
pub struct UserMasterKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl UserMasterKey {
    /// Build a `UserMasterKey` directly from raw bytes. Used when replaying
    /// a previously derived key (e.g. the old key during rotation) without
    /// re-deriving it from a master key the caller no longer holds.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Derive the per-secret data encryption key for a given random salt.
    /// Deterministic in `(user master key, salt)`.
    pub fn derive_data_encryption_key(&self, salt: &[u8]) -> DataKey {
        let mut out = [0u8; KEY_BYTES];
        pbkdf2_hmac::<Sha256>(self.bytes.as_slice(), salt, DATA_KEY_ITERATIONS, &mut out);
        DataKey {
            bytes: Zeroizing::new(out),
        }
    }
}

/// A per-secret data encryption key. Derived just-in-time and zeroed
/// immediately after the AEAD call that consumes it.
pub struct DataKey {
    bytes: Zeroizing<[u8; 32]>,
}

impl DataKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_hex(&hex::encode([byte; 32])).unwrap()
    }

    #[test]
    fn rejects_short_or_non_hex_keys() {
        assert!(MasterKey::from_hex("abc").is_err());
        assert!(MasterKey::from_hex(&"z".repeat(64)).is_err());
        assert!(MasterKey::from_hex(&"a".repeat(63)).is_err());
    }

    #[test]
    fn fingerprint_is_deterministic_and_stable_length() {
        let k = key(0xaa);
        let fp1 = k.fingerprint();
        let fp2 = k.fingerprint();
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 64);
        assert!(fp1.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn different_master_keys_fingerprint_differently() {
        assert_ne!(key(0x01).fingerprint(), key(0x02).fingerprint());
    }

    #[test]
    fn rejects_empty_or_whitespace_user_id() {
        let k = key(0x01);
        assert!(k.derive_user_master_key("").is_err());
        assert!(k.derive_user_master_key("   ").is_err());
        assert!(k.derive_user_master_key("\t\n").is_err());
    }

    #[test]
    fn derivation_is_deterministic() {
        let k = key(0x01);
        let umk1 = k.derive_user_master_key("user-1").unwrap();
        let umk2 = k.derive_user_master_key("user-1").unwrap();
        let salt = [7u8; 16];
        let dek1 = umk1.derive_data_encryption_key(&salt);
        let dek2 = umk2.derive_data_encryption_key(&salt);
        assert_eq!(dek1.as_bytes(), dek2.as_bytes());
    }

    #[test]
    fn different_users_derive_different_keys() {
        let k = key(0x01);
        let umk_a = k.derive_user_master_key("user-a").unwrap();
        let umk_b = k.derive_user_master_key("user-b").unwrap();
        let salt = [7u8; 16];
        assert_ne!(
            umk_a.derive_data_encryption_key(&salt).as_bytes(),
            umk_b.derive_data_encryption_key(&salt).as_bytes()
        );
    }

    #[test]
    fn different_salts_derive_different_data_keys() {
        let k = key(0x01);
        let umk = k.derive_user_master_key("user-1").unwrap();
        let dek1 = umk.derive_data_encryption_key(&[1u8; 16]);
        let dek2 = umk.derive_data_encryption_key(&[2u8; 16]);
        assert_ne!(dek1.as_bytes(), dek2.as_bytes());
    }
}
