//! Fixed sizes and tunables for the derivation and AEAD layers.

/// Raw deployment master key length, in bytes.
pub const MASTER_KEY_BYTES: usize = 32;

/// Deployment master key as presented at the process boundary: lowercase hex.
pub const MASTER_KEY_HEX_CHARS: usize = MASTER_KEY_BYTES * 2;

/// PBKDF2-HMAC-SHA256 iterations for deriving a per-user master key from the
/// deployment master key. High, because this is the line of defense against
/// brute-forcing the master key through a leaked per-user derivation.
pub const USER_KEY_ITERATIONS: u32 = 100_000;

/// PBKDF2-HMAC-SHA256 iterations for deriving a per-secret data key from an
/// already high-entropy user master key. Lower is acceptable here.
pub const DATA_KEY_ITERATIONS: u32 = 10_000;

/// Salt length for data-key derivation, in bytes.
pub const SALT_BYTES: usize = 16;

/// XChaCha20-Poly1305 nonce length, in bytes.
pub const NONCE_BYTES: usize = 24;

/// Derived key length, in bytes (both UMK and DEK).
pub const KEY_BYTES: usize = 32;

/// Prefix mixed into the per-user derivation salt, so a leaked user id alone
/// cannot be replayed against an unrelated KDF context.
pub const USER_SALT_PREFIX: &str = "vibesdk:user:";
