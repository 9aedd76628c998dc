//! Discovery orchestration: scheduling, filtering, scoring and enqueue.
//!
//! Source discoverers only produce candidate items; everything generic
//! lives here. One `discover` call walks a campaign's sources, applies the
//! filter pipeline (URL/title validity, keyword and domain filters, dedup
//! against the queue and published content), scores priorities and
//! enqueues the survivors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::discovery::{Discoverer, DiscoveryError};
use crate::models::{Campaign, CampaignStatus, DiscoveredItem, SourceType, DEFAULT_PRIORITY};
use crate::storage::{CampaignRepository, NewQueueItem, SharedQueueStore};

/// Consecutive discovery failures before a campaign is auto-paused
pub const AUTO_PAUSE_THRESHOLD: i64 = 5;

/// Priority boost for items published within the last 24 hours
const RECENCY_BOOST: u8 = 20;

/// Outcome of one discovery attempt for one campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// The run happened
    Completed {
        found: usize,
        enqueued: usize,
        skipped: usize,
    },
    /// Interval not elapsed yet, or a run is already in progress
    NotDue,
    /// Campaign is paused or archived
    Inactive,
}

/// Aggregate result of a `discover_all` sweep
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryTotals {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items_found: usize,
    pub items_enqueued: usize,
}

pub struct DiscoveryOrchestrator {
    discoverers: HashMap<SourceType, Arc<dyn Discoverer>>,
    queue: SharedQueueStore,
    campaigns: Arc<CampaignRepository>,
}

impl DiscoveryOrchestrator {
    pub fn new(queue: SharedQueueStore, campaigns: Arc<CampaignRepository>) -> Self {
        Self {
            discoverers: HashMap::new(),
            queue,
            campaigns,
        }
    }

    pub fn register(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverers.insert(discoverer.source_type(), discoverer);
        self
    }

    /// Run discovery for one campaign if it is active and due.
    ///
    /// A run fails only when every source errors; partial source failures
    /// are logged and the surviving items still flow through.
    pub async fn discover(&self, campaign: &Campaign) -> Result<DiscoveryOutcome, DiscoveryError> {
        if campaign.status != CampaignStatus::Active {
            return Ok(DiscoveryOutcome::Inactive);
        }
        if campaign.discovery_in_progress || !campaign.is_due(Utc::now()) {
            return Ok(DiscoveryOutcome::NotDue);
        }

        self.campaigns
            .mark_discovery_started(&campaign.id)
            .map_err(|e| DiscoveryError::Storage(e.to_string()))?;

        match self.run_sources(campaign).await {
            Ok(items) => {
                let found = items.len();
                let queue_items = self.filter_and_score(campaign, items);
                let outcome = self
                    .queue
                    .enqueue_batch(&queue_items)
                    .map_err(|e| DiscoveryError::Storage(e.to_string()))?;

                self.campaigns
                    .mark_discovery_succeeded(&campaign.id, outcome.added as i64)
                    .map_err(|e| DiscoveryError::Storage(e.to_string()))?;

                let skipped = found - queue_items.len() + outcome.skipped;
                crate::metrics::record_items_discovered(found as u64);
                crate::metrics::record_items_enqueued(outcome.added as u64);
                tracing::info!(
                    campaign_id = %campaign.id,
                    found,
                    enqueued = outcome.added,
                    skipped,
                    "Discovery run completed"
                );

                Ok(DiscoveryOutcome::Completed {
                    found,
                    enqueued: outcome.added,
                    skipped,
                })
            }
            Err(e) => {
                self.handle_failure(campaign, &e);
                Err(e)
            }
        }
    }

    /// Sweep all active campaigns; individual failures never abort the batch
    pub async fn discover_all(&self) -> DiscoveryTotals {
        let campaigns = match self.campaigns.list_active() {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list active campaigns");
                return DiscoveryTotals::default();
            }
        };

        let mut totals = DiscoveryTotals::default();
        for campaign in &campaigns {
            match self.discover(campaign).await {
                Ok(DiscoveryOutcome::Completed { found, enqueued, .. }) => {
                    totals.succeeded += 1;
                    totals.items_found += found;
                    totals.items_enqueued += enqueued;
                }
                Ok(DiscoveryOutcome::NotDue) | Ok(DiscoveryOutcome::Inactive) => {
                    totals.skipped += 1;
                }
                Err(e) => {
                    totals.failed += 1;
                    tracing::error!(campaign_id = %campaign.id, error = %e, "Discovery run failed");
                }
            }
        }

        tracing::info!(
            succeeded = totals.succeeded,
            failed = totals.failed,
            skipped = totals.skipped,
            enqueued = totals.items_enqueued,
            "Discovery sweep finished"
        );
        totals
    }

    /// Clear in-progress flags left behind by crashed runs
    pub fn reset_stuck(&self, older_than: Duration) -> Result<usize, DiscoveryError> {
        self.campaigns
            .reset_stuck_discoveries(older_than)
            .map_err(|e| DiscoveryError::Storage(e.to_string()))
    }

    async fn run_sources(
        &self,
        campaign: &Campaign,
    ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
        if campaign.sources.is_empty() {
            return Err(DiscoveryError::InvalidSource(
                "campaign has no sources configured".into(),
            ));
        }

        let mut items = Vec::new();
        let mut last_error = None;
        let mut any_succeeded = false;

        for source in &campaign.sources {
            let discoverer = match self.discoverers.get(&source.source_type) {
                Some(discoverer) => discoverer,
                None => {
                    last_error = Some(DiscoveryError::NoDiscoverer(source.source_type));
                    continue;
                }
            };

            match discoverer.discover(campaign, source).await {
                Ok(mut found) => {
                    any_succeeded = true;
                    items.append(&mut found);
                }
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        source_type = source.source_type.as_str(),
                        error = %e,
                        "Source discovery failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if any_succeeded {
            Ok(items)
        } else {
            Err(last_error.unwrap_or_else(|| {
                DiscoveryError::InvalidSource("no source produced a result".into())
            }))
        }
    }

    /// Drop invalid, filtered and duplicate items; attach priorities
    fn filter_and_score(&self, campaign: &Campaign, items: Vec<DiscoveredItem>) -> Vec<NewQueueItem> {
        let mut kept = Vec::new();

        for item in items {
            if item.title.trim().is_empty() {
                continue;
            }
            let host = match url::Url::parse(&item.url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                    parsed.host_str().map(|h| h.to_lowercase())
                }
                _ => continue,
            };

            if self.keyword_excluded(campaign, &item.title) {
                continue;
            }
            if !self.domain_allowed(campaign, host.as_deref()) {
                continue;
            }
            if self.is_duplicate(campaign, &item.url) {
                continue;
            }

            let source_config = campaign
                .sources
                .iter()
                .find(|s| s.source_type == item.source_type);

            let mut queued = NewQueueItem::new(
                campaign.id.clone(),
                item.url,
                item.source_type,
                item.title,
            );
            queued.excerpt = item.excerpt;
            queued.source_data = item.source_data;
            queued.priority = score_priority(
                source_config.and_then(|s| s.priority_override),
                item.published_at,
            );
            kept.push(queued);
        }

        kept
    }

    fn keyword_excluded(&self, campaign: &Campaign, title: &str) -> bool {
        let lower = title.to_lowercase();
        campaign
            .exclude_keywords
            .iter()
            .any(|kw| !kw.is_empty() && lower.contains(&kw.to_lowercase()))
    }

    fn domain_allowed(&self, campaign: &Campaign, host: Option<&str>) -> bool {
        let Some(host) = host else { return false };

        if campaign
            .block_domains
            .iter()
            .any(|d| host_matches(host, d))
        {
            return false;
        }
        if campaign.allow_domains.is_empty() {
            return true;
        }
        campaign
            .allow_domains
            .iter()
            .any(|d| host_matches(host, d))
    }

    fn is_duplicate(&self, campaign: &Campaign, url: &str) -> bool {
        let in_queue = self
            .queue
            .contains(&campaign.id, url)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, url, "Queue dedup check failed");
                false
            });
        if in_queue {
            return true;
        }
        self.queue.is_published(&campaign.id, url).unwrap_or(false)
    }

    fn handle_failure(&self, campaign: &Campaign, error: &DiscoveryError) {
        crate::metrics::record_discovery_failure();

        let count = match self
            .campaigns
            .mark_discovery_failed(&campaign.id, &error.to_string())
        {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(campaign_id = %campaign.id, error = %e, "Failed to record discovery failure");
                return;
            }
        };

        if count >= AUTO_PAUSE_THRESHOLD {
            tracing::warn!(
                campaign_id = %campaign.id,
                consecutive_failures = count,
                "Auto-pausing campaign after repeated discovery failures"
            );
            if let Err(e) = self.campaigns.set_status(&campaign.id, CampaignStatus::Paused) {
                tracing::error!(campaign_id = %campaign.id, error = %e, "Failed to pause campaign");
            }
        }
    }
}

/// Exact host match or subdomain of the configured domain
fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// An explicit source override wins; otherwise the base priority gets a
/// recency boost for items published in the last 24 hours.
fn score_priority(
    source_override: Option<u8>,
    published_at: Option<chrono::DateTime<Utc>>,
) -> u8 {
    if let Some(explicit) = source_override {
        return explicit.min(100);
    }

    let mut priority = DEFAULT_PRIORITY;
    if let Some(published) = published_at {
        if Utc::now() - published < chrono::Duration::hours(24) {
            priority = priority.saturating_add(RECENCY_BOOST);
        }
    }
    priority.min(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceConfig;
    use crate::storage::{Database, MemoryQueueStore, QueueStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubDiscoverer {
        source_type: SourceType,
        items: Vec<DiscoveredItem>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubDiscoverer {
        fn ok(source_type: SourceType, items: Vec<DiscoveredItem>) -> Arc<Self> {
            Arc::new(Self {
                source_type,
                items,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(source_type: SourceType) -> Arc<Self> {
            Arc::new(Self {
                source_type,
                items: vec![],
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Discoverer for StubDiscoverer {
        fn source_type(&self) -> SourceType {
            self.source_type
        }

        async fn discover(
            &self,
            _campaign: &Campaign,
            _source: &SourceConfig,
        ) -> Result<Vec<DiscoveredItem>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DiscoveryError::Malformed("scripted failure".into()));
            }
            Ok(self.items.clone())
        }
    }

    struct Fixture {
        orchestrator: DiscoveryOrchestrator,
        queue: Arc<MemoryQueueStore>,
        campaigns: Arc<CampaignRepository>,
    }

    fn fixture(discoverers: Vec<Arc<dyn Discoverer>>) -> Fixture {
        let queue = Arc::new(MemoryQueueStore::new());
        let campaigns = Arc::new(CampaignRepository::new(Database::in_memory().unwrap()));

        let mut orchestrator =
            DiscoveryOrchestrator::new(queue.clone() as SharedQueueStore, campaigns.clone());
        for d in discoverers {
            orchestrator = orchestrator.register(d);
        }

        Fixture {
            orchestrator,
            queue,
            campaigns,
        }
    }

    fn campaign(sources: Vec<SourceConfig>) -> Campaign {
        Campaign {
            id: "c1".into(),
            name: "c1".into(),
            status: CampaignStatus::Active,
            sources,
            discovery_interval_mins: 60,
            backend: None,
            model: None,
            rotation_strategy: "round_robin".into(),
            consecutive_error_count: 0,
            discovery_in_progress: false,
            last_discovery_started: None,
            last_discovery_finished: None,
            last_status: None,
            last_item_count: None,
            exclude_keywords: vec![],
            allow_domains: vec![],
            block_domains: vec![],
        }
    }

    fn feed_source() -> SourceConfig {
        SourceConfig {
            source_type: SourceType::Feed,
            url: Some("https://example.com/feed.xml".into()),
            query: None,
            priority_override: None,
        }
    }

    fn item(url: &str, title: &str) -> DiscoveredItem {
        DiscoveredItem::new(url, title, SourceType::Feed)
    }

    #[tokio::test]
    async fn test_inactive_and_not_due() {
        let f = fixture(vec![StubDiscoverer::ok(SourceType::Feed, vec![])]);

        let mut paused = campaign(vec![feed_source()]);
        paused.status = CampaignStatus::Paused;
        f.campaigns.upsert(&paused).unwrap();
        assert_eq!(
            f.orchestrator.discover(&paused).await.unwrap(),
            DiscoveryOutcome::Inactive
        );

        let mut recent = campaign(vec![feed_source()]);
        recent.last_discovery_started = Some(Utc::now());
        f.campaigns.upsert(&recent).unwrap();
        assert_eq!(
            f.orchestrator.discover(&recent).await.unwrap(),
            DiscoveryOutcome::NotDue
        );

        let mut running = campaign(vec![feed_source()]);
        running.discovery_in_progress = true;
        f.campaigns.upsert(&running).unwrap();
        assert_eq!(
            f.orchestrator.discover(&running).await.unwrap(),
            DiscoveryOutcome::NotDue
        );
    }

    #[tokio::test]
    async fn test_discover_filters_and_enqueues() {
        let items = vec![
            item("https://good.example/a", "Keep me"),
            item("not a url", "Bad URL"),
            item("https://good.example/b", ""),
            item("https://good.example/c", "Sponsored content inside"),
            item("https://blocked.example/d", "Blocked host"),
        ];
        let f = fixture(vec![StubDiscoverer::ok(SourceType::Feed, items)]);

        let mut c = campaign(vec![feed_source()]);
        c.exclude_keywords = vec!["sponsored".into()];
        c.block_domains = vec!["blocked.example".into()];
        f.campaigns.upsert(&c).unwrap();

        let outcome = f.orchestrator.discover(&c).await.unwrap();
        assert_eq!(
            outcome,
            DiscoveryOutcome::Completed {
                found: 5,
                enqueued: 1,
                skipped: 4
            }
        );

        assert!(f.queue.contains("c1", "https://good.example/a").unwrap());

        let stored = f.campaigns.get("c1").unwrap().unwrap();
        assert!(!stored.discovery_in_progress);
        assert_eq!(stored.last_status.as_deref(), Some("success"));
        assert_eq!(stored.last_item_count, Some(1));
    }

    #[tokio::test]
    async fn test_dedup_against_queue_and_published() {
        let items = vec![
            item("https://example.com/queued", "Already queued"),
            item("https://example.com/published", "Already published"),
            item("https://example.com/fresh", "Fresh"),
        ];
        let f = fixture(vec![StubDiscoverer::ok(SourceType::Feed, items)]);

        let c = campaign(vec![feed_source()]);
        f.campaigns.upsert(&c).unwrap();
        f.queue
            .enqueue(&NewQueueItem::new(
                "c1",
                "https://example.com/queued",
                SourceType::Feed,
                "earlier",
            ))
            .unwrap();
        f.queue
            .record_published("c1", "https://example.com/published", "post-1")
            .unwrap();

        let outcome = f.orchestrator.discover(&c).await.unwrap();
        assert_eq!(
            outcome,
            DiscoveryOutcome::Completed {
                found: 3,
                enqueued: 1,
                skipped: 2
            }
        );
    }

    #[tokio::test]
    async fn test_allow_domains_whitelist() {
        let items = vec![
            item("https://allowed.example/a", "A"),
            item("https://other.example/b", "B"),
        ];
        let f = fixture(vec![StubDiscoverer::ok(SourceType::Feed, items)]);

        let mut c = campaign(vec![feed_source()]);
        c.allow_domains = vec!["allowed.example".into()];
        f.campaigns.upsert(&c).unwrap();

        let outcome = f.orchestrator.discover(&c).await.unwrap();
        assert_eq!(
            outcome,
            DiscoveryOutcome::Completed {
                found: 2,
                enqueued: 1,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_priority_scoring() {
        let mut recent = item("https://example.com/recent", "Recent");
        recent.published_at = Some(Utc::now() - chrono::Duration::hours(2));
        let mut old = item("https://example.com/old", "Old");
        old.published_at = Some(Utc::now() - chrono::Duration::days(3));
        let undated = item("https://example.com/undated", "Undated");

        let f = fixture(vec![StubDiscoverer::ok(
            SourceType::Feed,
            vec![recent, old, undated],
        )]);
        let c = campaign(vec![feed_source()]);
        f.campaigns.upsert(&c).unwrap();
        f.orchestrator.discover(&c).await.unwrap();

        let batch = f.queue.dequeue_next(10, None).unwrap();
        assert_eq!(batch[0].source_url, "https://example.com/recent");
        assert_eq!(batch[0].priority, 70);
        assert_eq!(batch[1].priority, 50);
        assert_eq!(batch[2].priority, 50);
    }

    #[tokio::test]
    async fn test_priority_override_wins() {
        let mut recent = item("https://example.com/recent", "Recent");
        recent.published_at = Some(Utc::now());

        let f = fixture(vec![StubDiscoverer::ok(SourceType::Feed, vec![recent])]);
        let mut source = feed_source();
        source.priority_override = Some(10);
        let c = campaign(vec![source]);
        f.campaigns.upsert(&c).unwrap();
        f.orchestrator.discover(&c).await.unwrap();

        let batch = f.queue.dequeue_next(10, None).unwrap();
        assert_eq!(batch[0].priority, 10);
    }

    #[tokio::test]
    async fn test_failure_counts_and_auto_pause() {
        let f = fixture(vec![StubDiscoverer::failing(SourceType::Feed)]);
        let c = campaign(vec![feed_source()]);
        f.campaigns.upsert(&c).unwrap();

        for i in 1..AUTO_PAUSE_THRESHOLD {
            assert!(f.orchestrator.discover(&c).await.is_err());
            let stored = f.campaigns.get("c1").unwrap().unwrap();
            assert_eq!(stored.consecutive_error_count, i);
            assert_eq!(stored.status, CampaignStatus::Active);
        }

        // The fifth failure pauses the campaign
        assert!(f.orchestrator.discover(&c).await.is_err());
        let stored = f.campaigns.get("c1").unwrap().unwrap();
        assert_eq!(stored.consecutive_error_count, AUTO_PAUSE_THRESHOLD);
        assert_eq!(stored.status, CampaignStatus::Paused);
    }

    #[tokio::test]
    async fn test_partial_source_failure_still_succeeds() {
        let ok = StubDiscoverer::ok(
            SourceType::Feed,
            vec![item("https://example.com/a", "A")],
        );
        let bad = StubDiscoverer::failing(SourceType::Sitemap);
        let f = fixture(vec![ok, bad]);

        let sitemap = SourceConfig {
            source_type: SourceType::Sitemap,
            url: Some("https://example.com/sitemap.xml".into()),
            query: None,
            priority_override: None,
        };
        let c = campaign(vec![feed_source(), sitemap]);
        f.campaigns.upsert(&c).unwrap();

        let outcome = f.orchestrator.discover(&c).await.unwrap();
        assert!(matches!(
            outcome,
            DiscoveryOutcome::Completed { enqueued: 1, .. }
        ));
        // Error counter untouched
        assert_eq!(
            f.campaigns.get("c1").unwrap().unwrap().consecutive_error_count,
            0
        );
    }

    #[tokio::test]
    async fn test_discover_all_tolerates_failures() {
        let ok = StubDiscoverer::ok(
            SourceType::Feed,
            vec![item("https://example.com/a", "A")],
        );
        let f = fixture(vec![ok]);

        let good = campaign(vec![feed_source()]);
        f.campaigns.upsert(&good).unwrap();

        // Campaign whose only source type has no discoverer
        let mut bad = campaign(vec![SourceConfig {
            source_type: SourceType::Video,
            url: Some("https://example.com/videos".into()),
            query: None,
            priority_override: None,
        }]);
        bad.id = "c2".into();
        f.campaigns.upsert(&bad).unwrap();

        let totals = f.orchestrator.discover_all().await;
        assert_eq!(totals.succeeded, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.items_enqueued, 1);
    }

    #[test]
    fn test_score_priority_clamps() {
        assert_eq!(score_priority(Some(255), None), 100);
        assert_eq!(score_priority(None, None), 50);
        assert_eq!(
            score_priority(None, Some(Utc::now() - chrono::Duration::hours(1))),
            70
        );
        assert_eq!(
            score_priority(None, Some(Utc::now() - chrono::Duration::hours(48))),
            50
        );
    }
}
