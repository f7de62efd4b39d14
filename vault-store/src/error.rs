//! Error taxonomy for the secrets store.
//!
//! User errors (`ValidationFailed`, `NotFound`, `Expired`) are recovered at
//! the caller boundary and are not logged beyond a debug trace. System
//! errors (`CorruptRecord`, `DecryptionFailed`, `StorageFailure`) are
//! logged and surfaced as opaque failures — they never leak key material or
//! plaintext. `InvalidMasterKey`/`InvalidUserId` are fatal to construction.

use std::fmt;

use vault_crypto::CryptoError;

#[derive(Debug)]
pub enum StoreError {
    InvalidMasterKey,
    InvalidUserId,
    ValidationFailed(String),
    NotFound,
    Expired,
    CorruptRecord(String),
    DecryptionFailed,
    StorageFailure(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMasterKey => write!(f, "invalid master key"),
            Self::InvalidUserId => write!(f, "invalid user id"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::NotFound => write!(f, "not found"),
            Self::Expired => write!(f, "secret expired"),
            Self::CorruptRecord(msg) => write!(f, "corrupt record: {msg}"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::StorageFailure(msg) => write!(f, "storage failure: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidMasterKey => Self::InvalidMasterKey,
            CryptoError::InvalidUserId => Self::InvalidUserId,
            CryptoError::DecryptionFailed => Self::DecryptionFailed,
            CryptoError::EncodingError(msg) => Self::StorageFailure(msg),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::StorageFailure(e.to_string())
    }
}
