//! Storage Layer: the [`StorageBackend`] trait plus two implementations, an
//! in-memory one for tests and a SQLite-backed one for real deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::types::{RotationMetadata, SecretId, SecretRecord, SecretType};

/// Durable state the store needs and does not implement itself: row
/// persistence, indices, and the single maintenance timer. Implementors must
/// be safe to share across the single-writer-per-user actors that sit above
/// them; `SqliteBackend` relies on SQLite's own transaction serialization,
/// `InMemoryBackend` on an internal mutex.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn init_schema(&self) -> Result<(), StoreError>;

    async fn insert_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError>;

    async fn get_secret(
        &self,
        user_id: &str,
        id: SecretId,
    ) -> Result<Option<SecretRecord>, StoreError>;

    /// Active rows for `user_id`, ordered by `created_at` descending.
    async fn list_active(&self, user_id: &str) -> Result<Vec<SecretRecord>, StoreError>;

    async fn replace_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError>;

    async fn touch_access(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn soft_delete(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Hard-delete rows soft-deleted before `cutoff`. Returns the count
    /// removed.
    async fn reap_tombstones(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Soft-delete all active rows whose `expires_at` is before `now`.
    /// Returns the count expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get_rotation_metadata(
        &self,
        user_id: &str,
    ) -> Result<Option<RotationMetadata>, StoreError>;

    async fn put_rotation_metadata(
        &self,
        user_id: &str,
        meta: RotationMetadata,
    ) -> Result<(), StoreError>;

    /// Apply every row in `rotated` plus the new rotation metadata as a
    /// single atomic commit: either all of it becomes visible or none of
    /// it does. Rows that failed to re-encrypt are simply absent from
    /// `rotated` and keep their prior on-disk state untouched.
    async fn apply_rotation(
        &self,
        user_id: &str,
        rotated: Vec<SecretRecord>,
        metadata: RotationMetadata,
    ) -> Result<(), StoreError>;

    /// The next scheduled maintenance fire time, if one has been set.
    async fn get_next_fire(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Schedule the next maintenance fire time, replacing any prior one.
    async fn schedule_next_fire(&self, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn count_active(&self, user_id: &str) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    secrets: HashMap<(String, SecretId), SecretRecord>,
    rotation: HashMap<String, RotationMetadata>,
    next_fire: Option<DateTime<Utc>>,
}

/// Single-process, non-persistent backend for tests and local experiments.
pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .secrets
            .insert((user_id.to_string(), record.id), record);
        Ok(())
    }

    async fn get_secret(
        &self,
        user_id: &str,
        id: SecretId,
    ) -> Result<Option<SecretRecord>, StoreError> {
        Ok(self
            .lock()
            .secrets
            .get(&(user_id.to_string(), id))
            .cloned())
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<SecretRecord>, StoreError> {
        let mut out: Vec<SecretRecord> = self
            .lock()
            .secrets
            .iter()
            .filter(|((u, _), r)| u == user_id && r.is_active)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn replace_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .secrets
            .insert((user_id.to_string(), record.id), record);
        Ok(())
    }

    async fn touch_access(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(r) = state.secrets.get_mut(&(user_id.to_string(), id)) {
            r.last_accessed = at;
            r.access_count += 1;
        }
        Ok(())
    }

    async fn soft_delete(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.secrets.get_mut(&(user_id.to_string(), id)) {
            Some(r) if r.is_active => {
                r.is_active = false;
                r.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reap_tombstones(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let before = state.secrets.len();
        state
            .secrets
            .retain(|_, r| r.is_active || r.updated_at >= cutoff);
        Ok((before - state.secrets.len()) as u64)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let mut count = 0u64;
        for r in state.secrets.values_mut() {
            if r.is_active && r.is_expired_at(now) {
                r.is_active = false;
                r.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_rotation_metadata(
        &self,
        user_id: &str,
    ) -> Result<Option<RotationMetadata>, StoreError> {
        Ok(self.lock().rotation.get(user_id).cloned())
    }

    async fn put_rotation_metadata(
        &self,
        user_id: &str,
        meta: RotationMetadata,
    ) -> Result<(), StoreError> {
        self.lock().rotation.insert(user_id.to_string(), meta);
        Ok(())
    }

    async fn apply_rotation(
        &self,
        user_id: &str,
        rotated: Vec<SecretRecord>,
        metadata: RotationMetadata,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        for record in rotated {
            state
                .secrets
                .insert((user_id.to_string(), record.id), record);
        }
        state.rotation.insert(user_id.to_string(), metadata);
        Ok(())
    }

    async fn get_next_fire(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.lock().next_fire)
    }

    async fn schedule_next_fire(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.lock().next_fire = Some(at);
        Ok(())
    }

    async fn count_active(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .secrets
            .iter()
            .filter(|((u, _), r)| u == user_id && r.is_active)
            .count())
    }
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

/// Persistent backend over a SQLite database, reached through `sqlx`'s
/// async runtime-tokio-rustls driver. Schema is created idempotently by
/// [`SqliteBackend::init_schema`].
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Raw column shape for a `secrets` row, before the string/byte fields are
/// validated into [`SecretRecord`]'s fixed-size types.
#[derive(sqlx::FromRow)]
struct SecretRow {
    id: String,
    name: String,
    secret_type: String,
    provider: Option<String>,
    ciphertext: Vec<u8>,
    nonce: Vec<u8>,
    salt: Vec<u8>,
    key_preview: String,
    metadata: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: i64,
    is_active: bool,
    key_fingerprint: String,
}

impl TryFrom<SecretRow> for SecretRecord {
    type Error = StoreError;

    fn try_from(r: SecretRow) -> Result<Self, StoreError> {
        let id = SecretId::parse(&r.id)
            .ok_or_else(|| StoreError::CorruptRecord("malformed secret id".into()))?;
        let secret_type = SecretType::parse(&r.secret_type)
            .ok_or_else(|| StoreError::CorruptRecord("unknown secret_type".into()))?;
        let nonce: [u8; 24] = r
            .nonce
            .try_into()
            .map_err(|_| StoreError::CorruptRecord("nonce length mismatch".into()))?;
        let salt: [u8; 16] = r
            .salt
            .try_into()
            .map_err(|_| StoreError::CorruptRecord("salt length mismatch".into()))?;
        Ok(SecretRecord {
            id,
            name: r.name,
            secret_type,
            provider: r.provider,
            ciphertext: r.ciphertext,
            nonce,
            salt,
            key_preview: r.key_preview,
            metadata: r.metadata,
            expires_at: r.expires_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
            last_accessed: r.last_accessed,
            access_count: r.access_count.max(0) as u64,
            is_active: r.is_active,
            key_fingerprint: r.key_fingerprint,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                secret_type TEXT NOT NULL,
                provider TEXT,
                ciphertext BLOB NOT NULL,
                nonce BLOB NOT NULL,
                salt BLOB NOT NULL,
                key_preview TEXT NOT NULL,
                metadata TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                key_fingerprint TEXT NOT NULL,
                PRIMARY KEY (user_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_secrets_user_active
                ON secrets (user_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_secrets_expiry
                ON secrets (is_active, expires_at) WHERE expires_at IS NOT NULL;
            CREATE TABLE IF NOT EXISTS key_rotation_metadata (
                user_id TEXT PRIMARY KEY,
                current_key_fingerprint TEXT NOT NULL,
                last_rotation_at TEXT NOT NULL,
                rotation_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS maintenance_timer (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                next_fire_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO secrets (
                user_id, id, name, secret_type, provider, ciphertext, nonce, salt,
                key_preview, metadata, expires_at, created_at, updated_at,
                last_accessed, access_count, is_active, key_fingerprint
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(record.secret_type.as_str())
        .bind(&record.provider)
        .bind(&record.ciphertext)
        .bind(record.nonce.as_slice())
        .bind(record.salt.as_slice())
        .bind(&record.key_preview)
        .bind(&record.metadata)
        .bind(record.expires_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.last_accessed)
        .bind(record.access_count as i64)
        .bind(record.is_active)
        .bind(&record.key_fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_secret(
        &self,
        user_id: &str,
        id: SecretId,
    ) -> Result<Option<SecretRecord>, StoreError> {
        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            SELECT id, name, secret_type, provider, ciphertext, nonce, salt,
                   key_preview, metadata, expires_at, created_at, updated_at,
                   last_accessed, access_count, is_active, key_fingerprint
            FROM secrets WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(user_id)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SecretRecord::try_from).transpose()
    }

    async fn list_active(&self, user_id: &str) -> Result<Vec<SecretRecord>, StoreError> {
        let rows = sqlx::query_as::<_, SecretRow>(
            r#"
            SELECT id, name, secret_type, provider, ciphertext, nonce, salt,
                   key_preview, metadata, expires_at, created_at, updated_at,
                   last_accessed, access_count, is_active, key_fingerprint
            FROM secrets WHERE user_id = ? AND is_active = 1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SecretRecord::try_from).collect()
    }

    async fn replace_secret(&self, user_id: &str, record: SecretRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE secrets SET
                name = ?, secret_type = ?, provider = ?, ciphertext = ?, nonce = ?,
                salt = ?, key_preview = ?, metadata = ?, expires_at = ?,
                updated_at = ?, last_accessed = ?, access_count = ?, is_active = ?,
                key_fingerprint = ?
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(&record.name)
        .bind(record.secret_type.as_str())
        .bind(&record.provider)
        .bind(&record.ciphertext)
        .bind(record.nonce.as_slice())
        .bind(record.salt.as_slice())
        .bind(&record.key_preview)
        .bind(&record.metadata)
        .bind(record.expires_at)
        .bind(record.updated_at)
        .bind(record.last_accessed)
        .bind(record.access_count as i64)
        .bind(record.is_active)
        .bind(&record.key_fingerprint)
        .bind(user_id)
        .bind(record.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_access(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE secrets SET last_accessed = ?, access_count = access_count + 1
            WHERE user_id = ? AND id = ?
            "#,
        )
        .bind(at)
        .bind(user_id)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete(
        &self,
        user_id: &str,
        id: SecretId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE secrets SET is_active = 0, updated_at = ?
            WHERE user_id = ? AND id = ? AND is_active = 1
            "#,
        )
        .bind(at)
        .bind(user_id)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reap_tombstones(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM secrets WHERE is_active = 0 AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE secrets SET is_active = 0, updated_at = ?
            WHERE is_active = 1 AND expires_at IS NOT NULL AND expires_at < ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_rotation_metadata(
        &self,
        user_id: &str,
    ) -> Result<Option<RotationMetadata>, StoreError> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>, i64, DateTime<Utc>)>(
            r#"
            SELECT current_key_fingerprint, last_rotation_at, rotation_count, created_at
            FROM key_rotation_metadata WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(fp, last, count, created)| RotationMetadata {
            current_key_fingerprint: fp,
            last_rotation_at: last,
            rotation_count: count.max(0) as u64,
            created_at: created,
        }))
    }

    async fn put_rotation_metadata(
        &self,
        user_id: &str,
        meta: RotationMetadata,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO key_rotation_metadata
                (user_id, current_key_fingerprint, last_rotation_at, rotation_count, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                current_key_fingerprint = excluded.current_key_fingerprint,
                last_rotation_at = excluded.last_rotation_at,
                rotation_count = excluded.rotation_count
            "#,
        )
        .bind(user_id)
        .bind(&meta.current_key_fingerprint)
        .bind(meta.last_rotation_at)
        .bind(meta.rotation_count as i64)
        .bind(meta.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_rotation(
        &self,
        user_id: &str,
        rotated: Vec<SecretRecord>,
        metadata: RotationMetadata,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for record in rotated {
            sqlx::query(
                r#"
                UPDATE secrets SET
                    name = ?, secret_type = ?, provider = ?, ciphertext = ?, nonce = ?,
                    salt = ?, key_preview = ?, metadata = ?, expires_at = ?,
                    updated_at = ?, last_accessed = ?, access_count = ?, is_active = ?,
                    key_fingerprint = ?
                WHERE user_id = ? AND id = ?
                "#,
            )
            .bind(&record.name)
            .bind(record.secret_type.as_str())
            .bind(&record.provider)
            .bind(&record.ciphertext)
            .bind(record.nonce.as_slice())
            .bind(record.salt.as_slice())
            .bind(&record.key_preview)
            .bind(&record.metadata)
            .bind(record.expires_at)
            .bind(record.updated_at)
            .bind(record.last_accessed)
            .bind(record.access_count as i64)
            .bind(record.is_active)
            .bind(&record.key_fingerprint)
            .bind(user_id)
            .bind(record.id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO key_rotation_metadata
                (user_id, current_key_fingerprint, last_rotation_at, rotation_count, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                current_key_fingerprint = excluded.current_key_fingerprint,
                last_rotation_at = excluded.last_rotation_at,
                rotation_count = excluded.rotation_count
            "#,
        )
        .bind(user_id)
        .bind(&metadata.current_key_fingerprint)
        .bind(metadata.last_rotation_at)
        .bind(metadata.rotation_count as i64)
        .bind(metadata.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_next_fire(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT next_fire_at FROM maintenance_timer WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(t,)| t))
    }

    async fn schedule_next_fire(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO maintenance_timer (id, next_fire_at) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET next_fire_at = excluded.next_fire_at
            "#,
        )
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_active(&self, user_id: &str) -> Result<usize, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM secrets WHERE user_id = ? AND is_active = 1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0.max(0) as usize)
    }
}
