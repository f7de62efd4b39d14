//! End-to-end scenarios against a `SecretsStore` over an `InMemoryBackend`.

use std::sync::Arc;

use vault_crypto::MasterKey;
use vault_store::storage::{InMemoryBackend, StorageBackend};
use vault_store::{SecretType, SecretsStore, StoreError, StoreSecretRequest, UpdateSecretRequest};

fn master(byte: char) -> MasterKey {
    MasterKey::from_hex(&byte.to_string().repeat(64)).unwrap()
}

fn request(name: &str, secret_type: SecretType, value: &str) -> StoreSecretRequest {
    StoreSecretRequest {
        name: name.to_string(),
        secret_type,
        provider: None,
        value: value.to_string(),
        metadata: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn s1_store_then_get_round_trips_and_previews() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SecretsStore::new(master('a'), backend).await.unwrap();

    let saved = store
        .store("u1", request("GitHub Token", SecretType::Token, "ghp_1234567890"))
        .await
        .unwrap();
    assert_eq!(saved.access_count, 0);
    assert!(saved.is_active);
    assert_eq!(saved.key_preview, "ghp_******7890");

    let fetched = store.get("u1", saved.id).await.unwrap();
    assert_eq!(fetched.value, "ghp_1234567890");
    assert_eq!(fetched.metadata.access_count, 1);
}

#[tokio::test]
async fn s2_validation_rejects_without_persisting() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SecretsStore::new(master('a'), backend).await.unwrap();

    let cases = [
        request("", SecretType::Token, "v"),
        request("n", SecretType::Token, ""),
        request(&"x".repeat(201), SecretType::Token, "v"),
        request("n", SecretType::Token, &"x".repeat(50 * 1024 + 1)),
    ];

    for case in cases {
        let err = store.store("u1", case).await.unwrap_err();
        assert!(matches!(err, StoreError::ValidationFailed(_)));
    }

    assert_eq!(store.list("u1").await.unwrap().len(), 0);
}

#[tokio::test]
async fn s3_already_expired_secret_is_unreachable() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SecretsStore::new(master('a'), backend).await.unwrap();

    let mut req = request("n", SecretType::Token, "v");
    req.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1000));
    let saved = store.store("u1", req).await.unwrap();

    assert!(matches!(store.get("u1", saved.id).await.unwrap_err(), StoreError::Expired));
}

#[tokio::test]
async fn s4_tampered_ciphertext_surfaces_decryption_failed() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SecretsStore::new(master('a'), backend.clone()).await.unwrap();

    let saved = store.store("u1", request("n", SecretType::Token, "v")).await.unwrap();

    let mut record = backend.get_secret("u1", saved.id).await.unwrap().unwrap();
    record.ciphertext[0] ^= 0x01;
    backend.replace_secret("u1", record).await.unwrap();

    assert!(matches!(
        store.get("u1", saved.id).await.unwrap_err(),
        StoreError::DecryptionFailed
    ));
}

#[tokio::test]
async fn s5_rotation_happy_path_re_encrypts_every_row() {
    let backend = Arc::new(InMemoryBackend::new());
    let old_key = master('1');

    let store_old = SecretsStore::new(old_key, backend.clone()).await.unwrap();
    let first = store_old
        .store("u1", request("a", SecretType::Token, "value-a"))
        .await
        .unwrap();
    let second = store_old
        .store("u1", request("b", SecretType::Token, "value-b"))
        .await
        .unwrap();
    drop(store_old);

    let new_key = master('2');
    let new_fp = new_key.fingerprint();
    let store_new = SecretsStore::new(new_key, backend.clone()).await.unwrap();

    let info = store_new.rotate_keys("u1", &"1".repeat(64)).await.unwrap();
    assert_eq!(info.rotation_count, 1);
    assert_eq!(info.current_key_fingerprint, new_fp);
    assert_eq!(info.secrets_rotated, 2);
    assert_eq!(info.total_secrets, 2);

    assert_eq!(store_new.get("u1", first.id).await.unwrap().value, "value-a");
    assert_eq!(store_new.get("u1", second.id).await.unwrap().value, "value-b");
}

#[tokio::test]
async fn s6_partial_rotation_leaves_the_good_row_readable() {
    let backend = Arc::new(InMemoryBackend::new());
    let old_key = master('1');

    let store_old = SecretsStore::new(old_key, backend.clone()).await.unwrap();
    let good = store_old
        .store("u1", request("good", SecretType::Token, "good-value"))
        .await
        .unwrap();
    let bad = store_old
        .store("u1", request("bad", SecretType::Token, "bad-value"))
        .await
        .unwrap();
    drop(store_old);

    let mut corrupted = backend.get_secret("u1", bad.id).await.unwrap().unwrap();
    corrupted.ciphertext[0] ^= 0x01;
    backend.replace_secret("u1", corrupted).await.unwrap();

    let new_key = master('2');
    let store_new = SecretsStore::new(new_key, backend.clone()).await.unwrap();

    let info = store_new.rotate_keys("u1", &"1".repeat(64)).await.unwrap();
    assert_eq!(info.rotation_count, 1);
    assert_eq!(info.secrets_rotated, 1);
    assert_eq!(info.total_secrets, 2);

    assert_eq!(store_new.get("u1", good.id).await.unwrap().value, "good-value");
    assert!(matches!(
        store_new.get("u1", bad.id).await.unwrap_err(),
        StoreError::DecryptionFailed
    ));
}

#[tokio::test]
async fn update_with_no_fields_is_rejected() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = SecretsStore::new(master('a'), backend).await.unwrap();
    let saved = store.store("u1", request("n", SecretType::Token, "v")).await.unwrap();

    let err = store
        .update("u1", saved.id, UpdateSecretRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ValidationFailed(_)));
}
