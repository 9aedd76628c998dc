// Core data structures for the presswork pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source a queue item was discovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// RSS/Atom feed
    Feed,
    /// XML sitemap
    Sitemap,
    /// Video platform API
    Video,
    /// Marketplace listing API
    Marketplace,
    /// News search through the provider fallback chain
    NewsSearch,
}

impl SourceType {
    pub fn all() -> Vec<Self> {
        vec![
            Self::Feed,
            Self::Sitemap,
            Self::Video,
            Self::Marketplace,
            Self::NewsSearch,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Sitemap => "sitemap",
            Self::Video => "video",
            Self::Marketplace => "marketplace",
            Self::NewsSearch => "news_search",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "feed" | "rss" => Some(Self::Feed),
            "sitemap" => Some(Self::Sitemap),
            "video" => Some(Self::Video),
            "marketplace" => Some(Self::Marketplace),
            "news_search" | "news" => Some(Self::NewsSearch),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            _ => Self::Failed,
        })
    }
}

/// Default priority assigned to discovered items
pub const DEFAULT_PRIORITY: u8 = 50;

/// One discovered unit of work, persisted in the queue table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub campaign_id: String,
    pub source_url: String,
    pub source_type: SourceType,
    pub title: String,
    pub excerpt: Option<String>,
    /// Arbitrary source payload (video id, price, raw search hit, ...)
    pub source_data: serde_json::Value,
    /// 0-100, higher is dequeued first
    pub priority: u8,
    pub status: ItemStatus,
    pub discovered_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result_post_id: Option<String>,
    pub error_message: Option<String>,
}

/// Candidate item as produced by a discoverer, before dedup and scoring
#[derive(Debug, Clone)]
pub struct DiscoveredItem {
    pub url: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub source_type: SourceType,
    pub source_data: serde_json::Value,
}

impl DiscoveredItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            excerpt: None,
            published_at: None,
            source_type,
            source_data: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Generation backend or data provider a credential belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI-compatible chat completion backend
    OpenAi,
    /// Local Ollama backend
    Ollama,
    /// NewsData search API (credentialed)
    NewsData,
    /// GDELT document API (no credential required)
    Gdelt,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::NewsData => "newsdata",
            Self::Gdelt => "gdelt",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            "newsdata" => Some(Self::NewsData),
            "gdelt" => Some(Self::Gdelt),
            _ => None,
        }
    }

    /// Whether this provider can be called without a stored credential
    pub fn credential_free(&self) -> bool {
        matches!(self, Self::Gdelt | Self::Ollama)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operational state of a stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Inactive,
    Error,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for KeyStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => Self::Active,
            "inactive" => Self::Inactive,
            _ => Self::Error,
        })
    }
}

/// A stored credential for one backend or data provider.
///
/// The secret is encrypted at rest; quota counters are maintained by the
/// key store and reset at period boundaries by the maintenance job.
#[derive(Debug, Clone)]
pub struct ProviderKey {
    pub id: String,
    pub provider: Provider,
    /// base64(salt || nonce || ciphertext)
    pub encrypted_secret: String,
    pub label: String,
    /// 0 means unlimited
    pub daily_quota: i64,
    /// 0 means unlimited
    pub monthly_quota: i64,
    pub requests_today: i64,
    pub requests_month: i64,
    pub tokens_used: i64,
    pub status: KeyStatus,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProviderKey {
    /// Key is selectable: active and within both quotas
    pub fn is_eligible(&self) -> bool {
        if self.status != KeyStatus::Active {
            return false;
        }
        if self.daily_quota > 0 && self.requests_today >= self.daily_quota {
            return false;
        }
        if self.monthly_quota > 0 && self.requests_month >= self.monthly_quota {
            return false;
        }
        true
    }
}

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => Self::Active,
            "archived" => Self::Archived,
            _ => Self::Paused,
        })
    }
}

/// One configured discovery source inside a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_type: SourceType,
    /// Feed/sitemap/API endpoint URL; unused for news search
    #[serde(default)]
    pub url: Option<String>,
    /// Search query for news search sources
    #[serde(default)]
    pub query: Option<String>,
    /// Explicit priority override; wins over recency-boosted scoring
    #[serde(default)]
    pub priority_override: Option<u8>,
}

/// Campaign configuration as read from (and partially written back to) the
/// durable store. Campaign identity CRUD belongs to an external collaborator;
/// the pipeline only reads configuration and writes scheduling state.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub sources: Vec<SourceConfig>,
    pub discovery_interval_mins: i64,
    /// Generation backend for rewrite calls
    pub backend: Option<Provider>,
    pub model: Option<String>,
    pub rotation_strategy: String,
    pub consecutive_error_count: i64,
    pub discovery_in_progress: bool,
    pub last_discovery_started: Option<DateTime<Utc>>,
    pub last_discovery_finished: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub last_item_count: Option<i64>,
    /// Items whose title contains any of these are dropped before enqueue
    pub exclude_keywords: Vec<String>,
    /// When non-empty, only these hosts pass the filter
    pub allow_domains: Vec<String>,
    pub block_domains: Vec<String>,
}

impl Campaign {
    /// Whether a discovery run is due for this campaign
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_discovery_started {
            None => true,
            Some(started) => {
                started + chrono::Duration::minutes(self.discovery_interval_mins) <= now
            }
        }
    }
}

/// Finished article handed to the publishing collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedArticle {
    pub campaign_id: String,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub metadata: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl FinishedArticle {
    /// Content hash for duplicate detection downstream
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
