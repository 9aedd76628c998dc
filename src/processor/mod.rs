//! Queue processing: claim, fetch, rewrite, publish.
//!
//! Each batch dequeues pending items in priority order, claims them one at
//! a time and walks them through fetch, generation and publishing. A lost
//! claim race just skips the item; any later failure marks it failed with
//! the error message for operator inspection.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::fetcher::{ContentFetcher, FetchOptions, FetchedContent};
use crate::generation::{GenerationOrchestrator, GenerationRequest, Operation};
use crate::models::{FinishedArticle, QueueItem};
use crate::publish::Publisher;
use crate::storage::SharedQueueStore;

/// Aggregate result of one processing batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTotals {
    pub published: usize,
    pub failed: usize,
    /// Claim lost to a concurrent worker
    pub skipped: usize,
}

pub struct Processor {
    queue: SharedQueueStore,
    fetcher: Arc<ContentFetcher>,
    generator: Arc<GenerationOrchestrator>,
    publisher: Arc<dyn Publisher>,
}

impl Processor {
    pub fn new(
        queue: SharedQueueStore,
        fetcher: Arc<ContentFetcher>,
        generator: Arc<GenerationOrchestrator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            queue,
            fetcher,
            generator,
            publisher,
        }
    }

    /// Process up to `limit` pending items, optionally for one campaign
    pub async fn process_batch(
        &self,
        limit: usize,
        campaign_id: Option<&str>,
    ) -> Result<ProcessTotals> {
        let items = self
            .queue
            .dequeue_next(limit, campaign_id)
            .context("Failed to dequeue pending items")?;

        let mut totals = ProcessTotals::default();
        for item in items {
            if !self.queue.claim(&item.id)? {
                totals.skipped += 1;
                continue;
            }

            match self.process_item(&item).await {
                Ok(post_id) => {
                    totals.published += 1;
                    crate::metrics::record_item_processed("published");
                    tracing::info!(
                        item_id = %item.id,
                        campaign_id = %item.campaign_id,
                        post_id = %post_id,
                        "Item published"
                    );
                }
                Err(e) => {
                    totals.failed += 1;
                    crate::metrics::record_item_processed("failed");
                    tracing::error!(
                        item_id = %item.id,
                        campaign_id = %item.campaign_id,
                        error = %e,
                        "Item processing failed"
                    );
                    if let Err(mark) = self.queue.fail(&item.id, &e.to_string()) {
                        tracing::error!(item_id = %item.id, error = %mark, "Failed to mark item failed");
                    }
                }
            }
        }

        tracing::info!(
            published = totals.published,
            failed = totals.failed,
            skipped = totals.skipped,
            "Processing batch finished"
        );
        Ok(totals)
    }

    async fn process_item(&self, item: &QueueItem) -> Result<String> {
        let source_content = self.source_content(item).await?;

        let request = GenerationRequest {
            title: item.title.clone(),
            content: source_content,
            instructions: None,
            target_language: None,
        };
        let output = self
            .generator
            .execute(&item.campaign_id, Operation::Rewrite, &request)
            .await
            .context("Generation failed")?;

        let article = FinishedArticle {
            campaign_id: item.campaign_id.clone(),
            title: item.title.clone(),
            content: output.content,
            source_url: item.source_url.clone(),
            metadata: output.metadata,
            generated_at: Utc::now(),
        };

        let post_id = self
            .publisher
            .publish(&article)
            .await
            .context("Publishing failed")?;

        self.queue.complete(&item.id, &post_id)?;
        self.queue
            .record_published(&item.campaign_id, &item.source_url, &post_id)?;

        Ok(post_id)
    }

    /// Fetch the source page. A fetch failure degrades to the discovery
    /// excerpt when one exists, so transient source outages do not burn
    /// items that already carry usable material.
    async fn source_content(&self, item: &QueueItem) -> Result<String> {
        let options = FetchOptions::default();
        match self.fetcher.fetch(&item.source_url, &options).await {
            Ok(FetchedContent::Html { text, .. }) => Ok(text),
            Ok(FetchedContent::Json { value }) => {
                serde_json::to_string_pretty(&value).context("Failed to render JSON source")
            }
            Err(e) => match item.excerpt.as_deref().filter(|x| !x.trim().is_empty()) {
                Some(excerpt) => {
                    tracing::warn!(
                        item_id = %item.id,
                        url = %item.source_url,
                        error = %e,
                        "Fetch failed, falling back to discovery excerpt"
                    );
                    Ok(excerpt.to_string())
                }
                None => Err(e).context("Fetch failed and item has no excerpt"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use crate::generation::{BackendCall, GenerationBackend, GenerationError, GenerationOutput};
    use crate::keys::SecretCipher;
    use crate::keys::KeyStore;
    use crate::models::{
        Campaign, CampaignStatus, ItemStatus, Provider, SourceType,
    };
    use crate::publish::MemoryPublisher;
    use crate::storage::{
        CampaignRepository, Database, MemoryQueueStore, NewQueueItem, QueueStore,
    };
    use async_trait::async_trait;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct EchoBackend;

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn provider(&self) -> Provider {
            Provider::Ollama
        }

        fn supports(&self, _operation: Operation) -> bool {
            true
        }

        async fn generate(
            &self,
            _operation: Operation,
            request: &GenerationRequest,
            _call: &BackendCall,
        ) -> Result<GenerationOutput, GenerationError> {
            Ok(GenerationOutput {
                content: format!("rewritten: {}", request.content),
                metadata: serde_json::json!({"backend": "echo"}),
                tokens_used: 10,
            })
        }
    }

    struct Fixture {
        processor: Processor,
        queue: Arc<MemoryQueueStore>,
        publisher: Arc<MemoryPublisher>,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let campaigns = Arc::new(CampaignRepository::new(db.clone()));
        let keys = Arc::new(KeyStore::new(db, SecretCipher::with_iterations("p", 10)));

        campaigns
            .upsert(&Campaign {
                id: "c1".into(),
                name: "c1".into(),
                status: CampaignStatus::Active,
                sources: vec![],
                discovery_interval_mins: 60,
                backend: Some(Provider::Ollama),
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
            })
            .unwrap();

        let generator = Arc::new(
            GenerationOrchestrator::new(keys, campaigns, 2, 2)
                .register_backend(Arc::new(EchoBackend)),
        );

        let fetcher = Arc::new(
            ContentFetcher::new(&FetcherConfig {
                rate_limit: 50,
                max_retries: 1,
                request_timeout_secs: 5,
                max_redirects: 3,
            })
            .unwrap()
            .with_base_delay(1),
        );

        let queue = Arc::new(MemoryQueueStore::new());
        let publisher = Arc::new(MemoryPublisher::new());

        let processor = Processor::new(
            queue.clone() as SharedQueueStore,
            fetcher,
            generator,
            publisher.clone() as Arc<dyn Publisher>,
        );

        Fixture {
            processor,
            queue,
            publisher,
        }
    }

    fn enqueue(queue: &MemoryQueueStore, url: &str, title: &str) -> String {
        let item = NewQueueItem::new("c1", url, SourceType::Feed, title);
        match queue.enqueue(&item).unwrap() {
            crate::storage::EnqueueOutcome::Added(id) => id,
            crate::storage::EnqueueOutcome::Skipped => panic!("unexpected duplicate"),
        }
    }

    async fn html_server(body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(body.to_string(), "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_batch_publishes_and_completes() {
        let f = fixture();
        let server = html_server(
            "<html><head><title>Post</title></head><body><p>Original body text.</p></body></html>",
        )
        .await;
        let item_id = enqueue(&f.queue, &format!("{}/post", server.uri()), "Post");

        let totals = f.processor.process_batch(10, None).await.unwrap();
        assert_eq!(totals.published, 1);
        assert_eq!(totals.failed, 0);

        let stored = f.queue.get(&item_id).unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Completed);
        assert_eq!(stored.result_post_id.as_deref(), Some("post-1"));

        let published = f.publisher.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].content.starts_with("rewritten:"));
        assert!(published[0].content.contains("Original body text."));

        assert!(f
            .queue
            .is_published("c1", &format!("{}/post", server.uri()))
            .unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_excerpt() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut item = NewQueueItem::new(
            "c1",
            format!("{}/gone", server.uri()),
            SourceType::Feed,
            "Gone",
        );
        item.excerpt = Some("Saved excerpt body.".into());
        f.queue.enqueue(&item).unwrap();

        let totals = f.processor.process_batch(10, None).await.unwrap();
        assert_eq!(totals.published, 1);

        let published = f.publisher.published();
        assert!(published[0].content.contains("Saved excerpt body."));
    }

    #[tokio::test]
    async fn test_fetch_failure_without_excerpt_fails_item() {
        let f = fixture();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let item_id = enqueue(&f.queue, &format!("{}/gone", server.uri()), "Gone");

        let totals = f.processor.process_batch(10, None).await.unwrap();
        assert_eq!(totals.failed, 1);

        let stored = f.queue.get(&item_id).unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn test_publish_failure_marks_failed() {
        let f = fixture();
        let server = html_server("<html><head><title>T</title></head><body><p>x</p></body></html>")
            .await;
        let item_id = enqueue(&f.queue, &format!("{}/post", server.uri()), "T");

        f.publisher.set_fail(true);
        let totals = f.processor.process_batch(10, None).await.unwrap();
        assert_eq!(totals.failed, 1);

        let stored = f.queue.get(&item_id).unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Failed);
        assert!(!f.queue.is_published("c1", &stored.source_url).unwrap());
    }

    #[tokio::test]
    async fn test_already_claimed_item_is_skipped() {
        let f = fixture();
        let server = html_server("<html><head><title>T</title></head><body><p>x</p></body></html>")
            .await;
        let item_id = enqueue(&f.queue, &format!("{}/post", server.uri()), "T");

        // Another worker wins the claim between dequeue and claim
        assert!(f.queue.claim(&item_id).unwrap());

        let totals = f.processor.process_batch(10, None).await.unwrap();
        assert_eq!(totals, ProcessTotals::default());
    }

    #[tokio::test]
    async fn test_campaign_filter_limits_batch() {
        let f = fixture();
        let server = html_server("<html><head><title>T</title></head><body><p>x</p></body></html>")
            .await;
        enqueue(&f.queue, &format!("{}/a", server.uri()), "A");

        let other = NewQueueItem::new(
            "c2",
            format!("{}/b", server.uri()),
            SourceType::Feed,
            "B",
        );
        f.queue.enqueue(&other).unwrap();

        let totals = f.processor.process_batch(10, Some("c2")).await.unwrap();
        // c2 has no campaign configuration, so its single item fails
        assert_eq!(totals.published, 0);
        assert_eq!(totals.failed, 1);

        // The c1 item was untouched
        let totals = f.processor.process_batch(10, Some("c1")).await.unwrap();
        assert_eq!(totals.published, 1);
    }
}
