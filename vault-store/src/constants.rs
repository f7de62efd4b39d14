//! Validation limits and maintenance tunables.

/// Maximum `name` length, in bytes.
pub const MAX_NAME_BYTES: usize = 200;

/// Maximum secret value length, in bytes (50 KiB).
pub const MAX_VALUE_BYTES: usize = 50 * 1024;

/// Maximum encoded `metadata` length, in bytes (10 KiB).
pub const MAX_METADATA_BYTES: usize = 10 * 1024;

/// How often the maintenance loop fires.
pub const REAPER_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Default tombstone retention before hard delete.
pub const DEFAULT_TOMBSTONE_RETENTION: std::time::Duration =
    std::time::Duration::from_secs(90 * 86400);
