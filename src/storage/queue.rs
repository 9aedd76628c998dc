//! Persistent work queue with per-campaign deduplication
//!
//! The queue is the crash-recovery backbone of the pipeline: discovered items
//! land here, the processor claims them one at a time, and a maintenance
//! sweep reclaims items left in `processing` by a crashed worker.
//!
//! Duplicate discovery of the same (campaign_id, source_url) is a skip, not
//! an error; the UNIQUE constraint is the source of truth.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::models::{ItemStatus, QueueItem, SourceType, DEFAULT_PRIORITY};
use crate::storage::Database;

/// Item to be enqueued, before an id and timestamps are assigned
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub campaign_id: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub title: String,
    pub excerpt: Option<String>,
    pub source_data: serde_json::Value,
    pub priority: u8,
}

impl NewQueueItem {
    pub fn new(
        campaign_id: impl Into<String>,
        source_url: impl Into<String>,
        source_type: SourceType,
        title: impl Into<String>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            source_url: source_url.into(),
            source_type,
            title: title.into(),
            excerpt: None,
            source_data: serde_json::Value::Object(Default::default()),
            priority: DEFAULT_PRIORITY,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.campaign_id.trim().is_empty() {
            anyhow::bail!("campaign_id must not be empty");
        }
        if self.source_url.trim().is_empty() {
            anyhow::bail!("source_url must not be empty");
        }
        Ok(())
    }
}

/// Result of a single enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Item inserted, with its new id
    Added(String),
    /// (campaign_id, source_url) already present, a benign no-op
    Skipped,
}

/// Result of a batch enqueue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Per-status item counts
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Repository for queue operations.
///
/// Storage failures surface to the caller; the queue never retries
/// internally; retry belongs to the discovery/processing loops.
pub trait QueueStore: Send + Sync {
    /// Insert one item; duplicates on (campaign_id, source_url) are skipped
    fn enqueue(&self, item: &NewQueueItem) -> Result<EnqueueOutcome>;

    /// Insert many items independently; one bad item never fails the batch
    fn enqueue_batch(&self, items: &[NewQueueItem]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for item in items {
            match self.enqueue(item) {
                Ok(EnqueueOutcome::Added(_)) => outcome.added += 1,
                Ok(EnqueueOutcome::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    tracing::warn!(url = %item.source_url, error = %e, "Enqueue failed, skipping item");
                    outcome.skipped += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Up to `limit` pending items, priority descending then oldest first.
    /// Does not claim; callers must `claim` each item before working on it.
    fn dequeue_next(&self, limit: usize, campaign_id: Option<&str>) -> Result<Vec<QueueItem>>;

    /// Atomically transition pending → processing. Returns false if the item
    /// was not pending (already claimed, finished, or missing).
    fn claim(&self, item_id: &str) -> Result<bool>;

    /// Terminal transition processing → completed
    fn complete(&self, item_id: &str, result_post_id: &str) -> Result<()>;

    /// Terminal transition processing → failed
    fn fail(&self, item_id: &str, error: &str) -> Result<()>;

    /// Reset items stuck in `processing` longer than `older_than` back to
    /// `pending`, clearing the claim time. Returns the number reclaimed.
    fn reclaim_stuck(&self, older_than: Duration) -> Result<usize>;

    /// Delete completed/failed items older than `older_than`
    fn purge_completed(&self, older_than: Duration) -> Result<usize>;

    /// Delete every item belonging to a campaign
    fn delete_for_campaign(&self, campaign_id: &str) -> Result<usize>;

    /// Whether (campaign_id, url) is already queued in any status
    fn contains(&self, campaign_id: &str, url: &str) -> Result<bool>;

    /// Whether a post was already published for (campaign_id, url)
    fn is_published(&self, campaign_id: &str, url: &str) -> Result<bool>;

    /// Record a published post for discovery dedup
    fn record_published(&self, campaign_id: &str, url: &str, post_id: &str) -> Result<()>;

    /// Fetch one item by id
    fn get(&self, item_id: &str) -> Result<Option<QueueItem>>;

    /// Per-status counts
    fn counts(&self) -> Result<QueueCounts>;
}

/// Thread-safe shared queue store
pub type SharedQueueStore = Arc<dyn QueueStore>;

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`QueueStore`]
pub struct SqliteQueueStore {
    db: Arc<Database>,
}

impl SqliteQueueStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        let source_type: String = row.get(3)?;
        let status: String = row.get(8)?;
        let source_data: String = row.get(6)?;

        Ok(QueueItem {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            source_url: row.get(2)?,
            source_type: SourceType::from_str_opt(&source_type).unwrap_or(SourceType::Feed),
            title: row.get(4)?,
            excerpt: row.get(5)?,
            source_data: serde_json::from_str(&source_data)
                .unwrap_or(serde_json::Value::Object(Default::default())),
            priority: row.get::<_, i64>(7)? as u8,
            status: ItemStatus::from_str(&status).unwrap_or(ItemStatus::Failed),
            discovered_at: parse_ts(row.get::<_, String>(9)?),
            claimed_at: row.get::<_, Option<String>>(10)?.map(parse_ts),
            processed_at: row.get::<_, Option<String>>(11)?.map(parse_ts),
            result_post_id: row.get(12)?,
            error_message: row.get(13)?,
        })
    }
}

const ITEM_COLUMNS: &str = "id, campaign_id, source_url, source_type, title, excerpt, source_data, \
                            priority, status, discovered_at, claimed_at, processed_at, \
                            result_post_id, error_message";

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl QueueStore for SqliteQueueStore {
    fn enqueue(&self, item: &NewQueueItem) -> Result<EnqueueOutcome> {
        item.validate()?;

        let conn = self.db.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let source_data = serde_json::to_string(&item.source_data)?;

        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO queue_items
                    (id, campaign_id, source_url, source_type, title, excerpt,
                     source_data, priority, status, discovered_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
                "#,
                params![
                    id,
                    item.campaign_id,
                    item.source_url,
                    item.source_type.as_str(),
                    item.title,
                    item.excerpt,
                    source_data,
                    item.priority as i64,
                    now,
                ],
            )
            .context("Failed to enqueue item")?;

        if inserted == 0 {
            Ok(EnqueueOutcome::Skipped)
        } else {
            Ok(EnqueueOutcome::Added(id))
        }
    }

    fn dequeue_next(&self, limit: usize, campaign_id: Option<&str>) -> Result<Vec<QueueItem>> {
        let conn = self.db.conn();

        let (sql, has_campaign) = match campaign_id {
            Some(_) => (
                format!(
                    "SELECT {ITEM_COLUMNS} FROM queue_items
                     WHERE status = 'pending' AND campaign_id = ?1
                     ORDER BY priority DESC, discovered_at ASC
                     LIMIT ?2"
                ),
                true,
            ),
            None => (
                format!(
                    "SELECT {ITEM_COLUMNS} FROM queue_items
                     WHERE status = 'pending'
                     ORDER BY priority DESC, discovered_at ASC
                     LIMIT ?1"
                ),
                false,
            ),
        };

        let mut stmt = conn.prepare(&sql).context("Failed to prepare dequeue")?;

        let rows = if has_campaign {
            stmt.query_map(params![campaign_id.unwrap(), limit as i64], Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map(params![limit as i64], Self::row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(rows)
    }

    fn claim(&self, item_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        // Conditional update makes the claim atomic: only one caller can win
        // the pending → processing transition.
        let updated = conn
            .execute(
                "UPDATE queue_items SET status = 'processing', claimed_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![item_id, now],
            )
            .context("Failed to claim item")?;

        Ok(updated == 1)
    }

    fn complete(&self, item_id: &str, result_post_id: &str) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE queue_items
                 SET status = 'completed', processed_at = ?2, result_post_id = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![item_id, now, result_post_id],
            )
            .context("Failed to complete item")?;

        if updated == 0 {
            anyhow::bail!("Item {item_id} is not in processing state");
        }
        Ok(())
    }

    fn fail(&self, item_id: &str, error: &str) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                "UPDATE queue_items
                 SET status = 'failed', processed_at = ?2, error_message = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![item_id, now, error],
            )
            .context("Failed to mark item failed")?;

        if updated == 0 {
            anyhow::bail!("Item {item_id} is not in processing state");
        }
        Ok(())
    }

    fn reclaim_stuck(&self, older_than: Duration) -> Result<usize> {
        let conn = self.db.conn();
        let cutoff = (Utc::now() - chrono::Duration::from_std(older_than)?).to_rfc3339();

        let reclaimed = conn
            .execute(
                "UPDATE queue_items SET status = 'pending', claimed_at = NULL
                 WHERE status = 'processing' AND claimed_at < ?1",
                params![cutoff],
            )
            .context("Failed to reclaim stuck items")?;

        if reclaimed > 0 {
            tracing::warn!(count = reclaimed, "Reclaimed stuck queue items");
        }
        Ok(reclaimed)
    }

    fn purge_completed(&self, older_than: Duration) -> Result<usize> {
        let conn = self.db.conn();
        let cutoff = (Utc::now() - chrono::Duration::from_std(older_than)?).to_rfc3339();

        let purged = conn
            .execute(
                "DELETE FROM queue_items
                 WHERE status IN ('completed', 'failed') AND processed_at < ?1",
                params![cutoff],
            )
            .context("Failed to purge completed items")?;

        Ok(purged)
    }

    fn delete_for_campaign(&self, campaign_id: &str) -> Result<usize> {
        let conn = self.db.conn();
        let deleted = conn
            .execute(
                "DELETE FROM queue_items WHERE campaign_id = ?1",
                params![campaign_id],
            )
            .context("Failed to delete campaign items")?;

        conn.execute(
            "DELETE FROM published_posts WHERE campaign_id = ?1",
            params![campaign_id],
        )?;

        Ok(deleted)
    }

    fn contains(&self, campaign_id: &str, url: &str) -> Result<bool> {
        let conn = self.db.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM queue_items
                 WHERE campaign_id = ?1 AND source_url = ?2)",
                params![campaign_id, url],
                |row| row.get(0),
            )
            .context("Failed to check queue membership")?;

        Ok(exists)
    }

    fn is_published(&self, campaign_id: &str, url: &str) -> Result<bool> {
        let conn = self.db.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM published_posts
                 WHERE campaign_id = ?1 AND source_url = ?2)",
                params![campaign_id, url],
                |row| row.get(0),
            )
            .context("Failed to check published index")?;

        Ok(exists)
    }

    fn record_published(&self, campaign_id: &str, url: &str, post_id: &str) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO published_posts (campaign_id, source_url, post_id, published_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(campaign_id, source_url) DO UPDATE SET
                post_id = excluded.post_id,
                published_at = excluded.published_at
            "#,
            params![campaign_id, url, post_id, now],
        )
        .context("Failed to record published post")?;

        Ok(())
    }

    fn get(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let conn = self.db.conn();
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM queue_items WHERE id = ?1"),
                params![item_id],
                Self::row_to_item,
            )
            .optional()
            .context("Failed to get queue item")?;

        Ok(item)
    }

    fn counts(&self) -> Result<QueueCounts> {
        let conn = self.db.conn();
        let mut counts = QueueCounts::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM queue_items GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match ItemStatus::from_str(&status).unwrap_or(ItemStatus::Failed) {
                ItemStatus::Pending => counts.pending = count,
                ItemStatus::Processing => counts.processing = count,
                ItemStatus::Completed => counts.completed = count,
                ItemStatus::Failed => counts.failed = count,
            }
        }

        Ok(counts)
    }
}

// ============================================================================
// In-memory Implementation (for testing)
// ============================================================================

/// In-memory [`QueueStore`] used by unit tests and the dry-run CLI path
pub struct MemoryQueueStore {
    items: RwLock<HashMap<String, QueueItem>>,
    published: RwLock<HashMap<(String, String), String>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            published: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&self, item: &NewQueueItem) -> Result<EnqueueOutcome> {
        item.validate()?;

        let mut items = self.items.write().unwrap();
        let duplicate = items
            .values()
            .any(|i| i.campaign_id == item.campaign_id && i.source_url == item.source_url);
        if duplicate {
            return Ok(EnqueueOutcome::Skipped);
        }

        let id = Uuid::new_v4().to_string();
        items.insert(
            id.clone(),
            QueueItem {
                id: id.clone(),
                campaign_id: item.campaign_id.clone(),
                source_url: item.source_url.clone(),
                source_type: item.source_type,
                title: item.title.clone(),
                excerpt: item.excerpt.clone(),
                source_data: item.source_data.clone(),
                priority: item.priority,
                status: ItemStatus::Pending,
                discovered_at: Utc::now(),
                claimed_at: None,
                processed_at: None,
                result_post_id: None,
                error_message: None,
            },
        );

        Ok(EnqueueOutcome::Added(id))
    }

    fn dequeue_next(&self, limit: usize, campaign_id: Option<&str>) -> Result<Vec<QueueItem>> {
        let items = self.items.read().unwrap();
        let mut pending: Vec<_> = items
            .values()
            .filter(|i| i.status == ItemStatus::Pending)
            .filter(|i| campaign_id.map(|c| i.campaign_id == c).unwrap_or(true))
            .cloned()
            .collect();

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.discovered_at.cmp(&b.discovered_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    fn claim(&self, item_id: &str) -> Result<bool> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == ItemStatus::Pending => {
                item.status = ItemStatus::Processing;
                item.claimed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn complete(&self, item_id: &str, result_post_id: &str) -> Result<()> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == ItemStatus::Processing => {
                item.status = ItemStatus::Completed;
                item.processed_at = Some(Utc::now());
                item.result_post_id = Some(result_post_id.to_string());
                Ok(())
            }
            _ => anyhow::bail!("Item {item_id} is not in processing state"),
        }
    }

    fn fail(&self, item_id: &str, error: &str) -> Result<()> {
        let mut items = self.items.write().unwrap();
        match items.get_mut(item_id) {
            Some(item) if item.status == ItemStatus::Processing => {
                item.status = ItemStatus::Failed;
                item.processed_at = Some(Utc::now());
                item.error_message = Some(error.to_string());
                Ok(())
            }
            _ => anyhow::bail!("Item {item_id} is not in processing state"),
        }
    }

    fn reclaim_stuck(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let mut items = self.items.write().unwrap();
        let mut reclaimed = 0;

        for item in items.values_mut() {
            if item.status == ItemStatus::Processing
                && item.claimed_at.map(|t| t < cutoff).unwrap_or(false)
            {
                item.status = ItemStatus::Pending;
                item.claimed_at = None;
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    fn purge_completed(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than)?;
        let mut items = self.items.write().unwrap();
        let before = items.len();

        items.retain(|_, i| {
            !(matches!(i.status, ItemStatus::Completed | ItemStatus::Failed)
                && i.processed_at.map(|t| t < cutoff).unwrap_or(false))
        });

        Ok(before - items.len())
    }

    fn delete_for_campaign(&self, campaign_id: &str) -> Result<usize> {
        let mut items = self.items.write().unwrap();
        let before = items.len();
        items.retain(|_, i| i.campaign_id != campaign_id);

        let mut published = self.published.write().unwrap();
        published.retain(|(cid, _), _| cid != campaign_id);

        Ok(before - items.len())
    }

    fn contains(&self, campaign_id: &str, url: &str) -> Result<bool> {
        let items = self.items.read().unwrap();
        Ok(items
            .values()
            .any(|i| i.campaign_id == campaign_id && i.source_url == url))
    }

    fn is_published(&self, campaign_id: &str, url: &str) -> Result<bool> {
        let published = self.published.read().unwrap();
        Ok(published.contains_key(&(campaign_id.to_string(), url.to_string())))
    }

    fn record_published(&self, campaign_id: &str, url: &str, post_id: &str) -> Result<()> {
        let mut published = self.published.write().unwrap();
        published.insert(
            (campaign_id.to_string(), url.to_string()),
            post_id.to_string(),
        );
        Ok(())
    }

    fn get(&self, item_id: &str) -> Result<Option<QueueItem>> {
        let items = self.items.read().unwrap();
        Ok(items.get(item_id).cloned())
    }

    fn counts(&self) -> Result<QueueCounts> {
        let items = self.items.read().unwrap();
        let mut counts = QueueCounts::default();
        for item in items.values() {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

// ============================================================================
// Tests
// ============================================================================
