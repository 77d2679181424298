//! SQLite-backed key/value store for the client's persisted local state:
//! per-day scheduled-notification id sets, the last-sent location sample,
//! provider preference flags, the driver role and the active trip id.

use crate::providers::geolocation::GeoFix;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use thiserror::Error;

/// Well-known store keys.
pub mod keys {
    pub const GPS_ENABLED: &str = "gps_enabled";
    pub const PROVIDER_PRIMARY: &str = "location_provider_primary";
    pub const PROVIDER_SECONDARY: &str = "location_provider_secondary";
    pub const LAST_LOCATION: &str = "last_location";
    pub const DRIVER_ROLE: &str = "user_role";
    pub const ACTIVE_TRIP_ID: &str = "driver_trip_id";

    /// Key of the scheduled-notification id set for one calendar day
    /// (`day` formatted as YYYYMMDD).
    pub fn scheduled_ids(day: &str) -> String {
        format!("scheduled_ids_{}", day)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Local key/value store.
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (or create) the store at the given file path.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        Self::connect(&format!("sqlite:{}?mode=rwc", path)).await
    }

    /// Open an in-memory store, used by tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(url: &str) -> Result<Self, StorageError> {
        // Single connection: a second pooled connection would see its own
        // private database for in-memory stores.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Boolean preference flag; absent keys and read errors count as false.
    pub async fn flag(&self, key: &str) -> bool {
        matches!(self.get(key).await, Ok(Some(v)) if v == "true")
    }

    pub async fn set_flag(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.set(key, if value { "true" } else { "false" }).await
    }

    /// Load a comma-joined id set.
    pub async fn id_set(&self, key: &str) -> Result<HashSet<i64>, StorageError> {
        let stored = self.get(key).await?.unwrap_or_default();
        Ok(stored
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect())
    }

    /// Add an id to a comma-joined id set, preserving existing members.
    pub async fn add_id(&self, key: &str, id: i64) -> Result<(), StorageError> {
        let mut ids = self.id_set(key).await?;
        ids.insert(id);
        let mut joined: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        joined.sort();
        self.set(key, &joined.join(",")).await
    }

    pub async fn last_location(&self) -> Result<Option<GeoFix>, StorageError> {
        let stored = self.get(keys::LAST_LOCATION).await?;
        Ok(stored.and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn set_last_location(&self, fix: &GeoFix) -> Result<(), StorageError> {
        let json =
            serde_json::to_string(fix).map_err(|e| StorageError::Database(e.to_string()))?;
        self.set(keys::LAST_LOCATION, &json).await
    }
}
