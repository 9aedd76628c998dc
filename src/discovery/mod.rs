//! Content discovery: per-source discoverers and the orchestrator that
//! schedules them, filters their output and feeds the queue.

pub mod feed;
pub mod marketplace;
pub mod news;
pub mod orchestrator;
pub mod sitemap;
pub mod video;

use async_trait::async_trait;
use thiserror::Error;

pub use feed::FeedDiscoverer;
pub use marketplace::MarketplaceDiscoverer;
pub use news::NewsSearchDiscoverer;
pub use orchestrator::{DiscoveryOrchestrator, DiscoveryOutcome, DiscoveryTotals};
pub use sitemap::SitemapDiscoverer;
pub use video::VideoDiscoverer;

use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};
use crate::utils::FetchError;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Source misconfigured: {0}")]
    InvalidSource(String),

    #[error("Source payload malformed: {0}")]
    Malformed(String),

    #[error("No discoverer registered for source type {}", .0.as_str())]
    NoDiscoverer(SourceType),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl DiscoveryError {
    /// Transient failures that do not indicate a broken configuration
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Storage(_) => true,
            Self::InvalidSource(_) | Self::Malformed(_) | Self::NoDiscoverer(_) => false,
        }
    }
}

/// One source-type-specific discovery backend
#[async_trait]
pub trait Discoverer: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Produce candidate items from one configured source. Filtering and
    /// dedup happen in the orchestrator, not here.
    async fn discover(
        &self,
        campaign: &Campaign,
        source: &SourceConfig,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError>;
}

/// Pull the source URL out of a config, which several discoverers need
pub(crate) fn require_url(source: &SourceConfig) -> Result<&str, DiscoveryError> {
    source
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| DiscoveryError::InvalidSource("source has no URL configured".into()))
}
