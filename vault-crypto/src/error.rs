//! Error types for key derivation and AEAD sealing.

use std::fmt;

/// Failures that can occur while deriving keys or sealing/opening secrets.
#[derive(Debug)]
pub enum CryptoError {
    /// The deployment master key is not exactly 64 lowercase hex characters.
    InvalidMasterKey,
    /// The user id used to derive a per-user key was empty or all whitespace.
    InvalidUserId,
    /// The AEAD authentication tag did not validate. No plaintext is returned.
    DecryptionFailed,
    /// A lower-level encoding failure (RNG exhaustion, wrong key/nonce length).
    EncodingError(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMasterKey => write!(f, "master key must be 64 hex characters"),
            Self::InvalidUserId => write!(f, "user id must not be empty or all whitespace"),
            Self::DecryptionFailed => write!(f, "decryption failed: authentication tag mismatch"),
            Self::EncodingError(msg) => write!(f, "encoding error: {msg}"),
        }
    }
}

impl std::error::Error for CryptoError {}
