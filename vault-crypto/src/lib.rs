//! # vault-crypto
//!
//! Hierarchical key derivation and AEAD sealing for the per-user secrets
//! vault: deployment master key -> per-user master key -> per-secret data
//! key, sealed with XChaCha20-Poly1305.
//!
//! ## Quick start
//!
//! ```
//! use vault_crypto::{EncryptionService, MasterKey};
//!
//! let master = MasterKey::from_hex(&"a".repeat(64)).unwrap();
//! let umk = master.derive_user_master_key("user-1").unwrap();
//! let svc = EncryptionService::new(umk);
//!
//! let sealed = svc.encrypt("ghp_1234567890").unwrap();
//! let plaintext = svc.decrypt(&sealed.ciphertext, &sealed.nonce, &sealed.salt).unwrap();
//! assert_eq!(plaintext, b"ghp_1234567890");
//! ```
//!
//! ## What's NOT provided
//!
//! - Storage of any kind (see `vault-store`).
//! - Access control, quotas, or audit logging.
//! - Hardware-backed key custody.

mod aead;
pub mod constants;
mod error;
mod kdf;

pub use aead::{preview, random_nonce, random_salt, EncryptionService, SealedSecret};
pub use error::CryptoError;
pub use kdf::{DataKey, MasterKey, UserMasterKey};
