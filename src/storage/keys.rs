//! Provider key rows: CRUD plus atomic usage accounting

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::models::{KeyStatus, Provider, ProviderKey};
use crate::storage::Database;

pub struct KeyRepository {
    db: Arc<Database>,
}

const KEY_COLUMNS: &str = "id, provider, encrypted_secret, label, daily_quota, monthly_quota, \
                           requests_today, requests_month, tokens_used, status, last_used_at";

impl KeyRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderKey> {
        let provider: String = row.get(1)?;
        let status: String = row.get(9)?;

        Ok(ProviderKey {
            id: row.get(0)?,
            provider: Provider::from_str_opt(&provider).unwrap_or(Provider::OpenAi),
            encrypted_secret: row.get(2)?,
            label: row.get(3)?,
            daily_quota: row.get(4)?,
            monthly_quota: row.get(5)?,
            requests_today: row.get(6)?,
            requests_month: row.get(7)?,
            tokens_used: row.get(8)?,
            status: KeyStatus::from_str(&status).unwrap_or(KeyStatus::Inactive),
            last_used_at: row.get::<_, Option<String>>(10)?.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
        })
    }

    pub fn insert(&self, key: &ProviderKey) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            r#"
            INSERT INTO provider_keys
                (id, provider, encrypted_secret, label, daily_quota, monthly_quota,
                 requests_today, requests_month, tokens_used, status, last_used_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                key.id,
                key.provider.as_str(),
                key.encrypted_secret,
                key.label,
                key.daily_quota,
                key.monthly_quota,
                key.requests_today,
                key.requests_month,
                key.tokens_used,
                key.status.as_str(),
                key.last_used_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert provider key")?;

        Ok(())
    }

    pub fn get(&self, key_id: &str) -> Result<Option<ProviderKey>> {
        let conn = self.db.conn();
        let key = conn
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM provider_keys WHERE id = ?1"),
                params![key_id],
                Self::row_to_key,
            )
            .optional()
            .context("Failed to get provider key")?;

        Ok(key)
    }

    /// All keys for a provider, or every key when provider is None.
    /// Ordered by creation so rotation indices are stable.
    pub fn list(&self, provider: Option<Provider>) -> Result<Vec<ProviderKey>> {
        let conn = self.db.conn();

        let keys = match provider {
            Some(p) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {KEY_COLUMNS} FROM provider_keys
                     WHERE provider = ?1 ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map(params![p.as_str()], Self::row_to_key)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {KEY_COLUMNS} FROM provider_keys ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map([], Self::row_to_key)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            }
        }
        .context("Failed to list provider keys")?;

        Ok(keys)
    }

    pub fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<()> {
        let conn = self.db.conn();
        let updated = conn.execute(
            "UPDATE provider_keys SET status = ?2 WHERE id = ?1",
            params![key_id, status.as_str()],
        )?;

        if updated == 0 {
            anyhow::bail!("Provider key {key_id} not found");
        }
        Ok(())
    }

    /// Bump usage counters in one statement after a successful call
    pub fn record_usage(&self, key_id: &str, tokens: i64) -> Result<()> {
        let conn = self.db.conn();
        let now = Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE provider_keys
             SET requests_today = requests_today + 1,
                 requests_month = requests_month + 1,
                 tokens_used = tokens_used + ?2,
                 last_used_at = ?3
             WHERE id = ?1",
            params![key_id, tokens, now],
        )?;

        if updated == 0 {
            anyhow::bail!("Provider key {key_id} not found");
        }
        Ok(())
    }

    /// Reset all daily request counters; idempotent, run at day boundary
    pub fn reset_daily_counters(&self) -> Result<usize> {
        let conn = self.db.conn();
        let reset = conn
            .execute(
                "UPDATE provider_keys SET requests_today = 0 WHERE requests_today != 0",
                [],
            )
            .context("Failed to reset daily counters")?;

        Ok(reset)
    }

    /// Reset all monthly request counters; idempotent, run at month boundary
    pub fn reset_monthly_counters(&self) -> Result<usize> {
        let conn = self.db.conn();
        let reset = conn
            .execute(
                "UPDATE provider_keys SET requests_month = 0 WHERE requests_month != 0",
                [],
            )
            .context("Failed to reset monthly counters")?;

        Ok(reset)
    }

    /// Delete a key row. Reference checks against campaign rotation state
    /// happen in the key store facade before calling this.
    pub fn delete(&self, key_id: &str) -> Result<bool> {
        let conn = self.db.conn();
        let deleted = conn
            .execute("DELETE FROM provider_keys WHERE id = ?1", params![key_id])
            .context("Failed to delete provider key")?;

        Ok(deleted > 0)
    }
}
