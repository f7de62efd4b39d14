//! [`SecretsStore`]: the single-writer-per-user lifecycle owner that sits on
//! top of a [`StorageBackend`] and a [`MasterKey`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use vault_crypto::{EncryptionService, MasterKey};

use crate::constants::{MAX_METADATA_BYTES, MAX_NAME_BYTES, MAX_VALUE_BYTES, REAPER_INTERVAL};
use crate::error::StoreError;
use crate::storage::StorageBackend;
use crate::types::{
    KeyRotationInfo, RotationMetadata, SecretId, SecretMetadata, SecretRecord, SecretWithValue,
    StoreSecretRequest, UpdateSecretRequest,
};

/// Owns the deployment master key and a `StorageBackend`, and serializes
/// all mutating operations for a given user behind a per-user lock so that
/// concurrent callers never race a rotation against a write.
pub struct SecretsStore {
    master_key: MasterKey,
    backend: Arc<dyn StorageBackend>,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SecretsStore {
    /// Construct a store. Fails only if the backend's schema cannot be
    /// prepared.
    pub async fn new(master_key: MasterKey, backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        backend.init_schema().await?;
        if backend.get_next_fire().await?.is_none() {
            let interval = chrono::Duration::seconds(REAPER_INTERVAL.as_secs() as i64);
            backend.schedule_next_fire(Utc::now() + interval).await?;
        }
        Ok(Self {
            master_key,
            backend,
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    /// `true` once the backend schema is ready. Always `true` after `new`
    /// returns successfully; exposed for callers composing readiness probes.
    pub fn is_ready(&self) -> bool {
        true
    }

    async fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn encryption_service(&self, user_id: &str) -> Result<EncryptionService, StoreError> {
        let umk = self.master_key.derive_user_master_key(user_id)?;
        Ok(EncryptionService::new(umk))
    }

    fn validate_name(name: &str) -> Result<(), StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::ValidationFailed("name must not be empty".into()));
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(StoreError::ValidationFailed(format!(
                "name exceeds {MAX_NAME_BYTES} bytes"
            )));
        }
        Ok(())
    }

    fn validate_value(value: &str) -> Result<(), StoreError> {
        if value.is_empty() {
            return Err(StoreError::ValidationFailed("value must not be empty".into()));
        }
        if value.len() > MAX_VALUE_BYTES {
            return Err(StoreError::ValidationFailed(format!(
                "value exceeds {MAX_VALUE_BYTES} bytes"
            )));
        }
        Ok(())
    }

    fn encode_metadata(metadata: &Option<serde_json::Value>) -> Result<Option<String>, StoreError> {
        let Some(value) = metadata else {
            return Ok(None);
        };
        let encoded = serde_json::to_string(value)
            .map_err(|e| StoreError::ValidationFailed(format!("metadata: {e}")))?;
        if encoded.len() > MAX_METADATA_BYTES {
            return Err(StoreError::ValidationFailed(format!(
                "metadata exceeds {MAX_METADATA_BYTES} bytes"
            )));
        }
        Ok(Some(encoded))
    }

    /// Store a new secret for `user_id`.
    pub async fn store(
        &self,
        user_id: &str,
        request: StoreSecretRequest,
    ) -> Result<SecretMetadata, StoreError> {
        if user_id.trim().is_empty() {
            return Err(StoreError::InvalidUserId);
        }
        Self::validate_name(&request.name)?;
        Self::validate_value(&request.value)?;
        let metadata = Self::encode_metadata(&request.metadata)?;

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let svc = self.encryption_service(user_id)?;
        let sealed = svc.encrypt(&request.value)?;
        let now = Utc::now();

        let record = SecretRecord {
            id: SecretId::generate(),
            name: request.name,
            secret_type: request.secret_type,
            provider: request.provider,
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            salt: sealed.salt,
            key_preview: sealed.key_preview,
            metadata,
            expires_at: request.expires_at,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
            is_active: true,
            key_fingerprint: self.master_key.fingerprint(),
        };

        self.ensure_rotation_metadata(user_id).await?;
        self.backend.insert_secret(user_id, record.clone()).await?;
        Ok(record.to_metadata())
    }

    /// Fetch a secret's decrypted value, bumping its access counters.
    /// Fails with `NotFound` if it does not exist or is soft-deleted, and
    /// with `Expired` if it is still active but past `expires_at`.
    pub async fn get(&self, user_id: &str, id: SecretId) -> Result<SecretWithValue, StoreError> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let record = self.backend.get_secret(user_id, id).await?.ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        if !record.is_active {
            return Err(StoreError::NotFound);
        }
        if record.is_expired_at(now) {
            return Err(StoreError::Expired);
        }

        let svc = self.encryption_service(user_id)?;
        let plaintext = svc.decrypt(&record.ciphertext, &record.nonce, &record.salt)?;
        let value = String::from_utf8(plaintext)
            .map_err(|_| StoreError::CorruptRecord("decrypted value is not utf-8".into()))?;

        self.backend.touch_access(user_id, id, now).await?;
        let mut metadata = record.to_metadata();
        metadata.last_accessed = now;
        metadata.access_count += 1;

        Ok(SecretWithValue { value, metadata })
    }

    /// List active, non-expired secret metadata for `user_id`.
    pub async fn list(&self, user_id: &str) -> Result<Vec<SecretMetadata>, StoreError> {
        let now = Utc::now();
        let records = self.backend.list_active(user_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| !r.is_expired_at(now))
            .map(|r| r.to_metadata())
            .collect())
    }

    /// Apply a patch to an existing secret. `request.value`, when present,
    /// is re-encrypted under a fresh salt and nonce.
    pub async fn update(
        &self,
        user_id: &str,
        id: SecretId,
        request: UpdateSecretRequest,
    ) -> Result<SecretMetadata, StoreError> {
        if request.is_empty() {
            return Err(StoreError::ValidationFailed("update has no fields set".into()));
        }
        if let Some(name) = &request.name {
            Self::validate_name(name)?;
        }
        if let Some(value) = &request.value {
            Self::validate_value(value)?;
        }
        let metadata_patch = match &request.metadata {
            Some(m) => Some(Self::encode_metadata(m)?),
            None => None,
        };

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .backend
            .get_secret(user_id, id)
            .await?
            .filter(|r| r.is_active)
            .ok_or(StoreError::NotFound)?;

        if let Some(name) = request.name {
            record.name = name;
        }
        if let Some(value) = request.value {
            let svc = self.encryption_service(user_id)?;
            let sealed = svc.encrypt(&value)?;
            record.ciphertext = sealed.ciphertext;
            record.nonce = sealed.nonce;
            record.salt = sealed.salt;
            record.key_preview = sealed.key_preview;
            record.key_fingerprint = self.master_key.fingerprint();
        }
        if let Some(metadata) = metadata_patch {
            record.metadata = metadata;
        }
        if let Some(expires_at) = request.expires_at {
            record.expires_at = expires_at;
        }
        record.updated_at = Utc::now();

        self.backend.replace_secret(user_id, record.clone()).await?;
        Ok(record.to_metadata())
    }

    /// Soft-delete a secret. Idempotent-ish: returns `NotFound` if it is
    /// already inactive or never existed.
    pub async fn delete(&self, user_id: &str, id: SecretId) -> Result<(), StoreError> {
        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let deleted = self.backend.soft_delete(user_id, id, Utc::now()).await?;
        if deleted {
            Ok(())
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Current rotation state and progress for `user_id`.
    pub async fn key_rotation_info(&self, user_id: &str) -> Result<KeyRotationInfo, StoreError> {
        let meta = self
            .backend
            .get_rotation_metadata(user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let current_fp = self.master_key.fingerprint();
        let total = self.backend.count_active(user_id).await?;
        let rotated = if meta.current_key_fingerprint == current_fp {
            total
        } else {
            self.backend
                .list_active(user_id)
                .await?
                .iter()
                .filter(|r| r.key_fingerprint == current_fp)
                .count()
        };

        Ok(KeyRotationInfo {
            current_key_fingerprint: meta.current_key_fingerprint,
            last_rotation_at: meta.last_rotation_at,
            rotation_count: meta.rotation_count,
            total_secrets: total,
            secrets_rotated: rotated,
        })
    }

    async fn ensure_rotation_metadata(&self, user_id: &str) -> Result<(), StoreError> {
        if self.backend.get_rotation_metadata(user_id).await?.is_none() {
            let now = Utc::now();
            self.backend
                .put_rotation_metadata(
                    user_id,
                    RotationMetadata {
                        current_key_fingerprint: self.master_key.fingerprint(),
                        last_rotation_at: now,
                        rotation_count: 0,
                        created_at: now,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Atomically rotate all of `user_id`'s secrets from the key that
    /// produced `old_master_key_hex` to the store's current master key.
    ///
    /// Every active secret is decrypted under the old user master key and
    /// re-encrypted under the new one in memory first; the re-encrypted rows
    /// and the new rotation metadata are then committed as a single atomic
    /// batch, so a crash mid-rotation can never leave the backend holding a
    /// mix of old- and new-fingerprint rows. A row that fails to decrypt or
    /// re-encrypt is left out of the batch entirely and keeps its prior
    /// on-disk state, reported as drift by
    /// [`SecretsStore::key_rotation_info`] rather than losing track of it.
    /// Re-running rotation with the same old key resumes the remaining rows.
    pub async fn rotate_keys(
        &self,
        user_id: &str,
        old_master_key_hex: &str,
    ) -> Result<KeyRotationInfo, StoreError> {
        let old_master = MasterKey::from_hex(old_master_key_hex)?;
        let old_umk = old_master.derive_user_master_key(user_id)?;
        let old_svc = EncryptionService::new(old_umk);
        let new_svc = self.encryption_service(user_id)?;
        let new_fp = self.master_key.fingerprint();

        let lock = self.lock_for(user_id).await;
        let _guard = lock.lock().await;

        let records = self.backend.list_active(user_id).await?;
        let stale: Vec<SecretRecord> = records
            .into_iter()
            .filter(|r| r.key_fingerprint != new_fp)
            .collect();

        let mut rotated = Vec::new();
        let mut failed: Vec<(SecretId, vault_crypto::CryptoError)> = Vec::new();
        for mut record in stale {
            match old_svc.decrypt(&record.ciphertext, &record.nonce, &record.salt) {
                Ok(plaintext) => {
                    let plaintext = String::from_utf8_lossy(&plaintext).into_owned();
                    match new_svc.encrypt(&plaintext) {
                        Ok(sealed) => {
                            record.ciphertext = sealed.ciphertext;
                            record.nonce = sealed.nonce;
                            record.salt = sealed.salt;
                            record.key_fingerprint = new_fp.clone();
                            record.updated_at = Utc::now();
                            rotated.push(record);
                        }
                        Err(e) => failed.push((record.id, e.into())),
                    }
                }
                Err(e) => failed.push((record.id, e.into())),
            }
        }

        let now = Utc::now();
        let prior = self
            .backend
            .get_rotation_metadata(user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let rotated_count = rotated.len();
        self.backend
            .apply_rotation(
                user_id,
                rotated,
                RotationMetadata {
                    current_key_fingerprint: new_fp,
                    last_rotation_at: now,
                    rotation_count: prior.rotation_count + 1,
                    created_at: prior.created_at,
                },
            )
            .await?;

        if !failed.is_empty() {
            tracing::warn!(
                user_id,
                failed = failed.len(),
                rotated = rotated_count,
                "key rotation left some secrets on the old key"
            );
        }

        self.key_rotation_info(user_id).await
    }
}
