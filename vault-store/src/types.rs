//! Core types: secret identifiers, classification, records, and requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Secret identifier
// ---------------------------------------------------------------------------

/// Unique identifier for a secret, opaque to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretId(Uuid);

impl SecretId {
    /// Allocate a new random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id previously returned by `generate` or stored in the
    /// database. Used at the caller boundary, where ids arrive as strings.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Secret classification
// ---------------------------------------------------------------------------

/// Closed set of secret kinds. `Custom` carries no additional validation
/// beyond the shared size limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    ApiKey,
    Token,
    Password,
    Config,
    Custom,
}

impl SecretType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Token => "token",
            Self::Password => "password",
            Self::Config => "config",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api_key" => Some(Self::ApiKey),
            "token" => Some(Self::Token),
            "password" => Some(Self::Password),
            "config" => Some(Self::Config),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Secret record (storage-layer representation)
// ---------------------------------------------------------------------------

/// The full row as persisted by the Storage Layer, including the encrypted
/// payload. Never handed to a caller directly — projected to
/// [`SecretMetadata`] first.
#[derive(Clone, Debug)]
pub struct SecretRecord {
    pub id: SecretId,
    pub name: String,
    pub secret_type: SecretType,
    pub provider: Option<String>,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
    pub salt: [u8; 16],
    pub key_preview: String,
    pub metadata: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub is_active: bool,
    pub key_fingerprint: String,
}

impl SecretRecord {
    /// Project to the non-secret fields exposed to callers.
    pub fn to_metadata(&self) -> SecretMetadata {
        SecretMetadata {
            id: self.id,
            name: self.name.clone(),
            secret_type: self.secret_type,
            provider: self.provider.clone(),
            key_preview: self.key_preview.clone(),
            metadata: self
                .metadata
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
            is_active: self.is_active,
        }
    }

    /// `true` if `expires_at` is set and in the past relative to `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

// ---------------------------------------------------------------------------
// Caller-facing projections
// ---------------------------------------------------------------------------

/// Everything about a secret except its plaintext value or cryptographic
/// material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub id: SecretId,
    pub name: String,
    pub secret_type: SecretType,
    pub provider: Option<String>,
    pub key_preview: String,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub is_active: bool,
}

/// Result of a successful `get`: the decrypted value plus the (now updated)
/// metadata.
#[derive(Clone, Debug)]
pub struct SecretWithValue {
    pub value: String,
    pub metadata: SecretMetadata,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Input to `SecretsStore::store`.
#[derive(Clone, Debug)]
pub struct StoreSecretRequest {
    pub name: String,
    pub secret_type: SecretType,
    pub provider: Option<String>,
    pub value: String,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input to `SecretsStore::update`.
///
/// `metadata` and `expires_at` are double-`Option`: the outer `None` means
/// "leave unchanged", `Some(None)` means "clear", `Some(Some(v))` means
/// "set to `v`".
#[derive(Clone, Debug, Default)]
pub struct UpdateSecretRequest {
    pub name: Option<String>,
    pub value: Option<String>,
    pub metadata: Option<Option<serde_json::Value>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl UpdateSecretRequest {
    /// A patch with no observable column changes.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.value.is_none()
            && self.metadata.is_none()
            && self.expires_at.is_none()
    }
}

// ---------------------------------------------------------------------------
// Key rotation
// ---------------------------------------------------------------------------

/// Exactly one row per store; tracks the master key currently in effect.
#[derive(Clone, Debug)]
pub struct RotationMetadata {
    pub current_key_fingerprint: String,
    pub last_rotation_at: DateTime<Utc>,
    pub rotation_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing view of rotation state and progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyRotationInfo {
    pub current_key_fingerprint: String,
    pub last_rotation_at: DateTime<Utc>,
    pub rotation_count: u64,
    pub total_secrets: usize,
    pub secrets_rotated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_type_round_trips_through_str() {
        for t in [
            SecretType::ApiKey,
            SecretType::Token,
            SecretType::Password,
            SecretType::Config,
            SecretType::Custom,
        ] {
            assert_eq!(SecretType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SecretType::parse("bogus"), None);
    }

    #[test]
    fn update_request_empty_detection() {
        assert!(UpdateSecretRequest::default().is_empty());
        let patch = UpdateSecretRequest {
            expires_at: Some(None),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
