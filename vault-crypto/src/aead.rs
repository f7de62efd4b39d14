//! AEAD: XChaCha20-Poly1305, plus the non-reversible display preview.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use getrandom::getrandom;
use zeroize::Zeroize;

use crate::constants::{NONCE_BYTES, SALT_BYTES};
use crate::error::CryptoError;
use crate::kdf::UserMasterKey;

/// Output of sealing a secret value: everything that needs to be persisted
/// to read it back, aside from the user master key.
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_BYTES],
    pub salt: [u8; SALT_BYTES],
    pub key_preview: String,
}

/// Seals and opens secret values for one user. Owns that user's master key
/// for its lifetime; every data key it derives is ephemeral and zeroed
/// immediately after use.
pub struct EncryptionService {
    user_master_key: UserMasterKey,
}

impl EncryptionService {
    pub fn new(user_master_key: UserMasterKey) -> Self {
        Self { user_master_key }
    }

    /// Encrypt `plaintext`, generating a fresh random salt (which selects a
    /// fresh data key) and a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<SealedSecret, CryptoError> {
        let salt = random_salt()?;
        let nonce = random_nonce()?;
        let data_key = self.user_master_key.derive_data_encryption_key(&salt);

        let mut buf = plaintext.as_bytes().to_vec();
        let ciphertext = seal(data_key.as_bytes(), &nonce, &buf)?;
        buf.zeroize();

        let key_preview = preview(plaintext);

        Ok(SealedSecret {
            ciphertext,
            nonce,
            salt,
            key_preview,
        })
    }

    /// Decrypt a previously sealed value. Re-derives the data key from the
    /// stored salt; fails with [`CryptoError::DecryptionFailed`] if the AEAD
    /// tag does not validate. No partial output is ever returned.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_BYTES],
        salt: &[u8; SALT_BYTES],
    ) -> Result<Vec<u8>, CryptoError> {
        let data_key = self.user_master_key.derive_data_encryption_key(salt);
        open(data_key.as_bytes(), nonce, ciphertext)
    }
}

/// Generate a random 16-byte salt (also the input to data-key derivation).
pub fn random_salt() -> Result<[u8; SALT_BYTES], CryptoError> {
    let mut salt = [0u8; SALT_BYTES];
    getrandom(&mut salt).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
    Ok(salt)
}

/// Generate a random 24-byte XChaCha20-Poly1305 nonce.
pub fn random_nonce() -> Result<[u8; NONCE_BYTES], CryptoError> {
    let mut nonce = [0u8; NONCE_BYTES];
    getrandom(&mut nonce).map_err(|e| CryptoError::EncodingError(e.to_string()))?;
    Ok(nonce)
}

fn seal(key: &[u8; 32], nonce: &[u8; NONCE_BYTES], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let n = XNonce::from_slice(nonce);
    cipher
        .encrypt(n, Payload { msg: plaintext, aad: b"" })
        .map_err(|_| CryptoError::EncodingError("seal failed".into()))
}

fn open(key: &[u8; 32], nonce: &[u8; NONCE_BYTES], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let n = XNonce::from_slice(nonce);
    cipher
        .decrypt(n, Payload { msg: ciphertext, aad: b"" })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Build the non-reversible display preview for a plaintext value.
///
/// If the value is 8 code units or shorter the preview is entirely mask
/// characters of the same length; otherwise it is the first 4 and last 4
/// code units with the middle masked. Counted in `char`s (Unicode scalar
/// values) rather than UTF-8 bytes, so multi-byte characters are never
/// split mid-codepoint.
pub fn preview(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    let len = chars.len();
    if len <= 8 {
        return "*".repeat(len);
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[len - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(len - 8))
}
