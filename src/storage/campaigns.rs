//! Campaign configuration reads and scheduling-state writeback
//!
//! Campaign identity CRUD lives with an external collaborator; this
//! repository only reads campaign configuration and writes back the
//! scheduling fields the pipeline owns: discovery timestamps, the
//! in-progress flag, last run status/counts, the consecutive-error counter
//! and the serialized rotation state.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::models::{Campaign, CampaignStatus, Provider, SourceConfig};
use crate::storage::Database;

/// Repository for campaign configuration and scheduling state
pub struct CampaignRepository {
    db: Arc<Database>,
}

const CAMPAIGN_COLUMNS: &str = "id, name, status, sources, discovery_interval_mins, backend, \
                                model, rotation_strategy, consecutive_error_count, \
                                discovery_in_progress, last_discovery_started, \
                                last_discovery_finished, last_status, last_item_count, \
                                exclude_keywords, allow_domains, block_domains";

impl CampaignRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
        let status: String = row.get(2)?;
        let sources: String = row.get(3)?;
        let backend: Option<String> = row.get(5)?;
        let exclude: String = row.get(14)?;
        let allow: String = row.get(15)?;
        let block: String = row.get(16)?;

        Ok(Campaign {
            id: row.get(0)?,
            name: row.get(1)?,
            status: CampaignStatus::from_str(&status).unwrap_or(CampaignStatus::Paused),
            sources: serde_json::from_str::<Vec<SourceConfig>>(&sources).unwrap_or_default(),
            discovery_interval_mins: row.get(4)?,
            backend: backend.as_deref().and_then(Provider::from_str_opt),
            model: row.get(6)?,
            rotation_strategy: row.get(7)?,
            consecutive_error_count: row.get(8)?,
            discovery_in_progress: row.get::<_, i64>(9)? != 0,
            last_discovery_started: row.get::<_, Option<String>>(10)?.and_then(parse_ts),
            last_discovery_finished: row.get::<_, Option<String>>(11)?.and_then(parse_ts),
            last_status: row.get(12)?,
            last_item_count: row.get(13)?,
            exclude_keywords: serde_json::from_str(&exclude).unwrap_or_default(),
            allow_domains: serde_json::from_str(&allow).unwrap_or_default(),
            block_domains: serde_json::from_str(&block).unwrap_or_default(),
        })
    }

    /// Fetch one campaign by id
    pub fn get(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let conn = self.db.conn();
        let campaign = conn
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![campaign_id],
                Self::row_to_campaign,
            )
            .optional()
            .context("Failed to get campaign")?;

        Ok(campaign)
    }

    /// List all active campaigns
    pub fn list_active(&self) -> Result<Vec<Campaign>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = 'active' ORDER BY id"
        ))?;

        let campaigns = stmt
            .query_map([], Self::row_to_campaign)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list active campaigns")?;

        Ok(campaigns)
    }

    /// Insert or replace a campaign row. This is the seam the external
    /// campaign-management collaborator writes through; tests and the
    /// seeding CLI use it directly.
    pub fn upsert(&self, campaign: &Campaign) -> Result<()> {
        let conn = self.db.conn();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO campaigns
                (id, name, status, sources, discovery_interval_mins, backend, model,
                 rotation_strategy, consecutive_error_count, discovery_in_progress,
                 last_discovery_started, last_discovery_finished, last_status,
                 last_item_count, exclude_keywords, allow_domains, block_domains)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                campaign.id,
                campaign.name,
                campaign.status.as_str(),
                serde_json::to_string(&campaign.sources)?,
                campaign.discovery_interval_mins,
                campaign.backend.map(|b| b.as_str()),
                campaign.model,
                campaign.rotation_strategy,
                campaign.consecutive_error_count,
                campaign.discovery_in_progress as i64,
                campaign.last_discovery_started.map(|t| t.to_rfc3339()),
                campaign.last_discovery_finished.map(|t| t.to_rfc3339()),
                campaign.last_status,
                campaign.last_item_count,
                serde_json::to_string(&campaign.exclude_keywords)?,
                serde_json::to_string(&campaign.allow_domains)?,
                serde_json::to_string(&campaign.block_domains)?,
            ],
        )
        .context("Failed to upsert campaign")?;

        Ok(())
    }

    /// Mark a discovery run as started: sets the in-progress flag and the
    /// start timestamp in one statement.
    pub fn mark_discovery_started(&self, campaign_id: &str) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE campaigns
             SET discovery_in_progress = 1, last_discovery_started = ?2
             WHERE id = ?1",
            params![campaign_id, now],
        )?;

        if updated == 0 {
            anyhow::bail!("Campaign {campaign_id} not found");
        }
        Ok(())
    }

    /// Record a successful discovery run: clears the flag, stores counts,
    /// and resets the consecutive-error counter.
    pub fn mark_discovery_succeeded(&self, campaign_id: &str, item_count: i64) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE campaigns
             SET discovery_in_progress = 0,
                 last_discovery_finished = ?2,
                 last_status = 'success',
                 last_item_count = ?3,
                 consecutive_error_count = 0
             WHERE id = ?1",
            params![campaign_id, now, item_count],
        )
        .context("Failed to record discovery success")?;

        Ok(())
    }

    /// Record a failed discovery run and return the new consecutive-error
    /// count so the orchestrator can decide whether to auto-pause.
    pub fn mark_discovery_failed(&self, campaign_id: &str, error: &str) -> Result<i64> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE campaigns
             SET discovery_in_progress = 0,
                 last_discovery_finished = ?2,
                 last_status = ?3,
                 consecutive_error_count = consecutive_error_count + 1
             WHERE id = ?1",
            params![campaign_id, now, format!("error: {error}")],
        )
        .context("Failed to record discovery failure")?;

        let count: i64 = conn.query_row(
            "SELECT consecutive_error_count FROM campaigns WHERE id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Set campaign status (used for auto-pause)
    pub fn set_status(&self, campaign_id: &str, status: CampaignStatus) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE campaigns SET status = ?2 WHERE id = ?1",
            params![campaign_id, status.as_str()],
        )
        .context("Failed to set campaign status")?;

        Ok(())
    }

    /// Clear in-progress flags left behind by crashed discovery runs older
    /// than the threshold. Returns the number of campaigns repaired.
    pub fn reset_stuck_discoveries(&self, older_than: Duration) -> Result<usize> {
        let conn = self.db.conn();
        let cutoff = (Utc::now() - chrono::Duration::from_std(older_than)?).to_rfc3339();

        let reset = conn
            .execute(
                "UPDATE campaigns SET discovery_in_progress = 0
                 WHERE discovery_in_progress = 1 AND last_discovery_started < ?1",
                params![cutoff],
            )
            .context("Failed to reset stuck discoveries")?;

        if reset > 0 {
            tracing::warn!(count = reset, "Cleared stale discovery-in-progress flags");
        }
        Ok(reset)
    }

    /// Load the serialized rotation state for a campaign, if any
    pub fn load_rotation_state(&self, campaign_id: &str) -> Result<Option<String>> {
        let conn = self.db.conn();
        let state: Option<Option<String>> = conn
            .query_row(
                "SELECT rotation_state FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load rotation state")?;

        Ok(state.flatten())
    }

    /// Persist the serialized rotation state for a campaign
    pub fn save_rotation_state(&self, campaign_id: &str, state_json: &str) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "UPDATE campaigns SET rotation_state = ?2 WHERE id = ?1",
            params![campaign_id, state_json],
        )
        .context("Failed to save rotation state")?;

        Ok(())
    }

    /// Whether any campaign's rotation state references the given key id.
    /// Keys may only be deleted when unreferenced.
    pub fn any_referencing_key(&self, key_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let pattern = format!("%\"{key_id}\"%");
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM campaigns WHERE rotation_state LIKE ?1)",
                params![pattern],
                |row| row.get(0),
            )
            .context("Failed to check key references")?;

        Ok(exists)
    }
}

fn parse_ts(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
