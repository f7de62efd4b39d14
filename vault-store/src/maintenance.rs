//! Periodic maintenance: expiry sweep and tombstone reaping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_TOMBSTONE_RETENTION, REAPER_INTERVAL};
use crate::error::StoreError;
use crate::storage::StorageBackend;

/// Outcome of one maintenance pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: u64,
    pub reaped: u64,
}

/// Run one maintenance pass against `backend`: soft-delete secrets whose
/// `expires_at` has passed, then hard-delete tombstones older than
/// `tombstone_retention`, then schedule the next fire at `now + interval`.
/// Idempotent — safe to call again immediately.
pub async fn advance_maintenance(
    backend: &dyn StorageBackend,
    now: DateTime<Utc>,
    tombstone_retention: Duration,
    interval: Duration,
) -> Result<MaintenanceReport, StoreError> {
    let expired = backend.expire_due(now).await?;
    let cutoff = now
        - chrono::Duration::from_std(tombstone_retention)
            .map_err(|e| StoreError::StorageFailure(e.to_string()))?;
    let reaped = backend.reap_tombstones(cutoff).await?;
    let next_fire = now
        + chrono::Duration::from_std(interval)
            .map_err(|e| StoreError::StorageFailure(e.to_string()))?;
    backend.schedule_next_fire(next_fire).await?;

    if expired > 0 || reaped > 0 {
        tracing::info!(expired, reaped, "maintenance pass complete");
    }

    Ok(MaintenanceReport { expired, reaped })
}

/// Drives [`advance_maintenance`] on a fixed interval using a
/// `tokio::time::interval`. Dropping the runner stops the loop.
pub struct MaintenanceRunner {
    backend: Arc<dyn StorageBackend>,
    interval: Duration,
    tombstone_retention: Duration,
}

impl MaintenanceRunner {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            interval: REAPER_INTERVAL,
            tombstone_retention: DEFAULT_TOMBSTONE_RETENTION,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    /// Run forever, firing every `interval`. Intended to be spawned onto a
    /// dedicated task: `tokio::spawn(runner.run())`.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(e) = advance_maintenance(self.backend.as_ref(), now, self.tombstone_retention, self.interval).await {
                tracing::error!(error = %e, "maintenance pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use crate::types::{SecretId, SecretRecord, SecretType};

    fn record(id: SecretId, is_active: bool, expires_at: Option<DateTime<Utc>>, updated_at: DateTime<Utc>) -> SecretRecord {
        SecretRecord {
            id,
            name: "n".into(),
            secret_type: SecretType::Token,
            provider: None,
            ciphertext: vec![1, 2, 3],
            nonce: [0u8; 24],
            salt: [0u8; 16],
            key_preview: "****".into(),
            metadata: None,
            expires_at,
            created_at: updated_at,
            updated_at,
            last_accessed: updated_at,
            access_count: 0,
            is_active,
            key_fingerprint: "fp".into(),
        }
    }

    #[tokio::test]
    async fn expires_due_secrets_and_reaps_old_tombstones() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();

        let expiring = SecretId::generate();
        backend
            .insert_secret("u1", record(expiring, true, Some(now - chrono::Duration::seconds(1)), now - chrono::Duration::days(1)))
            .await
            .unwrap();

        let old_tombstone = SecretId::generate();
        backend
            .insert_secret(
                "u1",
                record(old_tombstone, false, None, now - chrono::Duration::days(200)),
            )
            .await
            .unwrap();

        let fresh_tombstone = SecretId::generate();
        backend
            .insert_secret("u1", record(fresh_tombstone, false, None, now - chrono::Duration::days(1)))
            .await
            .unwrap();

        let report = advance_maintenance(&backend, now, DEFAULT_TOMBSTONE_RETENTION, REAPER_INTERVAL)
            .await
            .unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.reaped, 1);

        assert!(backend.get_secret("u1", expiring).await.unwrap().unwrap().is_active == false);
        assert!(backend.get_secret("u1", old_tombstone).await.unwrap().is_none());
        assert!(backend.get_secret("u1", fresh_tombstone).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        advance_maintenance(&backend, now, DEFAULT_TOMBSTONE_RETENTION, REAPER_INTERVAL).await.unwrap();
        let report = advance_maintenance(&backend, now, DEFAULT_TOMBSTONE_RETENTION, REAPER_INTERVAL).await.unwrap();
        assert_eq!(report, MaintenanceReport::default());
    }
}
