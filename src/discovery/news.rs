//! News search discovery via the provider fallback chain.

use async_trait::async_trait;
use std::sync::Arc;

use crate::discovery::{Discoverer, DiscoveryError};
use crate::models::{Campaign, DiscoveredItem, SourceConfig, SourceType};
use crate::providers::{FallbackChain, SearchQuery};

pub struct NewsSearchDiscoverer {
    chain: Arc<FallbackChain>,
}

impl NewsSearchDiscoverer {
    pub fn new(chain: Arc<FallbackChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl Discoverer for NewsSearchDiscoverer {
    fn source_type(&self) -> SourceType {
        SourceType::NewsSearch
    }

    async fn discover(
        &self,
        campaign: &Campaign,
        source: &SourceConfig,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
        let query = source
            .query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                DiscoveryError::InvalidSource("news search source has no query".into())
            })?;

        let hits = self
            .chain
            .get_results(&campaign.id, &SearchQuery::new(query))
            .await;

        let items = hits
            .into_iter()
            .map(|hit| {
                let mut item = DiscoveredItem::new(hit.url, hit.title, SourceType::NewsSearch);
                item.excerpt = hit.excerpt;
                item.published_at = hit.published_at;
                item.source_data = hit.raw;
                item
            })
            .collect();

        Ok(items)
    }
}
