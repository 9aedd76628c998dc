//! Durable storage for the pipeline (SQLite)
//!
//! All repositories share one [`Database`] handle. The schema covers the
//! work queue, provider credentials, campaign scheduling state and the
//! published-post index used for discovery dedup.
//!
//! Repositories follow the trait + SQLite + in-memory mock pattern so
//! business logic can be tested without touching disk.

pub mod campaigns;
pub mod keys;
pub mod queue;

pub use campaigns::CampaignRepository;
pub use keys::KeyRepository;
pub use queue::{
    BatchOutcome, EnqueueOutcome, MemoryQueueStore, NewQueueItem, QueueCounts, QueueStore,
    SharedQueueStore, SqliteQueueStore,
};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Shared SQLite database handle.
///
/// Uses a `Mutex<Connection>` for thread-safety; WAL mode keeps readers and
/// the single writer from blocking each other across processes.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite database initialized");
        Ok(Arc::new(db))
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_schema()?;
        Ok(Arc::new(db))
    }

    /// Lock the underlying connection
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                source_url TEXT NOT NULL,
                source_type TEXT NOT NULL,
                title TEXT NOT NULL,
                excerpt TEXT,
                source_data TEXT NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 50,
                status TEXT NOT NULL DEFAULT 'pending',
                discovered_at TEXT NOT NULL,
                claimed_at TEXT,
                processed_at TEXT,
                result_post_id TEXT,
                error_message TEXT,
                UNIQUE(campaign_id, source_url)
            );

            CREATE INDEX IF NOT EXISTS idx_queue_items_status
                ON queue_items(status, priority DESC, discovered_at ASC);

            CREATE INDEX IF NOT EXISTS idx_queue_items_campaign
                ON queue_items(campaign_id);

            CREATE TABLE IF NOT EXISTS provider_keys (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                encrypted_secret TEXT NOT NULL,
                label TEXT NOT NULL,
                daily_quota INTEGER NOT NULL DEFAULT 0,
                monthly_quota INTEGER NOT NULL DEFAULT 0,
                requests_today INTEGER NOT NULL DEFAULT 0,
                requests_month INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                last_used_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_provider_keys_provider
                ON provider_keys(provider, status);

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                sources TEXT NOT NULL DEFAULT '[]',
                discovery_interval_mins INTEGER NOT NULL DEFAULT 60,
                backend TEXT,
                model TEXT,
                rotation_strategy TEXT NOT NULL DEFAULT 'round_robin',
                rotation_state TEXT,
                consecutive_error_count INTEGER NOT NULL DEFAULT 0,
                discovery_in_progress INTEGER NOT NULL DEFAULT 0,
                last_discovery_started TEXT,
                last_discovery_finished TEXT,
                last_status TEXT,
                last_item_count INTEGER,
                exclude_keywords TEXT NOT NULL DEFAULT '[]',
                allow_domains TEXT NOT NULL DEFAULT '[]',
                block_domains TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS published_posts (
                campaign_id TEXT NOT NULL,
                source_url TEXT NOT NULL,
                post_id TEXT NOT NULL,
                published_at TEXT NOT NULL,
                PRIMARY KEY (campaign_id, source_url)
            );

            CREATE TABLE IF NOT EXISTS pipeline_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    /// Save a pipeline state value (counter reset markers, sweeps)
    pub fn save_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        let now = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO pipeline_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![key, value, now],
        )
        .context("Failed to save pipeline state")?;

        Ok(())
    }

    /// Load a pipeline state value
    pub fn load_state(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM pipeline_state WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load pipeline state")?;

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let db = Database::in_memory().unwrap();
        // Idempotent
        db.create_schema().unwrap();
    }

    #[test]
    fn test_pipeline_state() {
        let db = Database::in_memory().unwrap();

        db.save_state("daily_reset_on", "2026-08-30").unwrap();
        assert_eq!(
            db.load_state("daily_reset_on").unwrap(),
            Some("2026-08-30".to_string())
        );

        db.save_state("daily_reset_on", "2026-08-31").unwrap();
        assert_eq!(
            db.load_state("daily_reset_on").unwrap(),
            Some("2026-08-31".to_string())
        );

        assert!(db.load_state("missing").unwrap().is_none());
    }
}
