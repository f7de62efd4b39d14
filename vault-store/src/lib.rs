//! # vault-store
//!
//! Lifecycle owner for per-user encrypted secrets: validated CRUD over a
//! [`storage::StorageBackend`], online key rotation, and a periodic
//! maintenance loop for expiry and tombstone reaping. Cryptography itself
//! lives in `vault-crypto`; this crate only ever sees ciphertext at rest.

pub mod constants;
mod error;
pub mod maintenance;
mod store;
pub mod storage;
mod types;

pub use error::StoreError;
pub use maintenance::{advance_maintenance, MaintenanceReport, MaintenanceRunner};
pub use store::SecretsStore;
pub use storage::{InMemoryBackend, SqliteBackend, StorageBackend};
pub use types::{
    KeyRotationInfo, RotationMetadata, SecretId, SecretMetadata, SecretRecord, SecretType,
    SecretWithValue, StoreSecretRequest, UpdateSecretRequest,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vault_crypto::MasterKey;

    use super::*;

    fn master() -> MasterKey {
        MasterKey::from_hex(&"7".repeat(64)).unwrap()
    }

    async fn store() -> SecretsStore {
        SecretsStore::new(master(), Arc::new(InMemoryBackend::new()))
            .await
            .unwrap()
    }

    fn basic_request(name: &str, value: &str) -> StoreSecretRequest {
        StoreSecretRequest {
            name: name.to_string(),
            secret_type: SecretType::ApiKey,
            provider: Some("github".into()),
            value: value.to_string(),
            metadata: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn store_then_get_round_trips_plaintext() {
        let store = store().await;
        let saved = store.store("alice", basic_request("gh-token", "ghp_abc123")).await.unwrap();
        assert_eq!(saved.key_preview, "ghp_**c123");

        let fetched = store.get("alice", saved.id).await.unwrap();
        assert_eq!(fetched.value, "ghp_abc123");
        assert_eq!(fetched.metadata.access_count, 1);
    }

    #[tokio::test]
    async fn duplicate_active_name_is_allowed() {
        let store = store().await;
        let first = store.store("alice", basic_request("dup", "v1")).await.unwrap();
        let second = store.store("alice", basic_request("dup", "v2")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.list("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let store = store().await;
        let first = store.store("alice", basic_request("a", "v1")).await.unwrap();
        let second = store.store("alice", basic_request("b", "v2")).await.unwrap();

        let listed = store.list("alice").await.unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let store = store().await;
        let alice_secret = store.store("alice", basic_request("shared-name", "alice-value")).await.unwrap();
        store.store("bob", basic_request("shared-name", "bob-value")).await.unwrap();

        let err = store.get("bob", alice_secret.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = store().await;
        let saved = store.store("alice", basic_request("n", "v")).await.unwrap();
        store.delete("alice", saved.id).await.unwrap();
        assert!(matches!(store.get("alice", saved.id).await.unwrap_err(), StoreError::NotFound));
        assert!(matches!(store.delete("alice", saved.id).await.unwrap_err(), StoreError::NotFound));
    }

    #[tokio::test]
    async fn expired_secret_is_reported_expired_before_sweep() {
        let store = store().await;
        let past = chrono::Utc::now() - chrono::Duration::seconds(1);
        let mut req = basic_request("n", "v");
        req.expires_at = Some(past);
        let saved = store.store("alice", req).await.unwrap();
        assert!(matches!(store.get("alice", saved.id).await.unwrap_err(), StoreError::Expired));
    }

    #[tokio::test]
    async fn update_rotates_ciphertext_for_new_value() {
        let store = store().await;
        let saved = store.store("alice", basic_request("n", "first")).await.unwrap();
        let before = store.get("alice", saved.id).await.unwrap();

        let patch = UpdateSecretRequest {
            value: Some("second".into()),
            ..Default::default()
        };
        store.update("alice", saved.id, patch).await.unwrap();
        let after = store.get("alice", saved.id).await.unwrap();

        assert_eq!(after.value, "second");
        assert_ne!(before.metadata.key_preview, after.metadata.key_preview);
    }

    #[tokio::test]
    async fn update_clear_expiry_with_double_option() {
        let store = store().await;
        let mut req = basic_request("n", "v");
        req.expires_at = Some(chrono::Utc::now() + chrono::Duration::days(1));
        let saved = store.store("alice", req).await.unwrap();

        let patch = UpdateSecretRequest {
            expires_at: Some(None),
            ..Default::default()
        };
        let updated = store.update("alice", saved.id, patch).await.unwrap();
        assert!(updated.expires_at.is_none());
    }

    #[tokio::test]
    async fn rotate_keys_moves_secrets_to_new_fingerprint() {
        let backend = Arc::new(InMemoryBackend::new());
        let old_master = MasterKey::from_hex(&"1".repeat(64)).unwrap();
        let old_fp = old_master.fingerprint();

        let store_old = SecretsStore::new(old_master, backend.clone()).await.unwrap();
        let saved = store_old.store("alice", basic_request("n", "secret-value")).await.unwrap();
        drop(store_old);

        let new_master = MasterKey::from_hex(&"2".repeat(64)).unwrap();
        let new_fp = new_master.fingerprint();
        let store_new = SecretsStore::new(new_master, backend.clone()).await.unwrap();

        let info_before = store_new.key_rotation_info("alice").await.unwrap();
        assert_eq!(info_before.current_key_fingerprint, old_fp);
        assert_eq!(info_before.secrets_rotated, 0);

        let info_after = store_new.rotate_keys("alice", &"1".repeat(64)).await.unwrap();
        assert_eq!(info_after.current_key_fingerprint, new_fp);
        assert_eq!(info_after.secrets_rotated, 1);
        assert_eq!(info_after.total_secrets, 1);

        let fetched = store_new.get("alice", saved.id).await.unwrap();
        assert_eq!(fetched.value, "secret-value");
    }

    #[tokio::test]
    async fn maintenance_sweep_reflected_in_list() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = SecretsStore::new(master(), backend.clone()).await.unwrap();
        let mut req = basic_request("n", "v");
        req.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        store.store("alice", req).await.unwrap();

        assert_eq!(store.list("alice").await.unwrap().len(), 0);

        advance_maintenance(
            backend.as_ref(),
            chrono::Utc::now(),
            constants::DEFAULT_TOMBSTONE_RETENTION,
            constants::REAPER_INTERVAL,
        )
        .await
        .unwrap();

        assert_eq!(store.list("alice").await.unwrap().len(), 0);
    }
}
