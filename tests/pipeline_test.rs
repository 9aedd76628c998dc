//! End-to-end pipeline test: feed discovery through rewrite to published
//! markdown, with round-robin credential rotation against a mock backend.

use std::sync::Arc;

use chrono::Utc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use presswork::config::FetcherConfig;
use presswork::discovery::{DiscoveryOrchestrator, DiscoveryOutcome, FeedDiscoverer};
use presswork::fetcher::ContentFetcher;
use presswork::generation::{GenerationOrchestrator, OpenAiBackend};
use presswork::keys::{KeyStore, SecretCipher};
use presswork::models::{
    Campaign, CampaignStatus, ItemStatus, Provider, SourceConfig, SourceType,
};
use presswork::processor::Processor;
use presswork::publish::{MarkdownPublisher, Publisher};
use presswork::storage::{
    CampaignRepository, Database, QueueStore, SharedQueueStore, SqliteQueueStore,
};

fn feed_xml(content_base: &str) -> String {
    let recent = Utc::now().to_rfc2822();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Test Feed</title>
  <item>
    <title>Breaking Update</title>
    <link>{content_base}/articles/breaking</link>
    <description>A fresh story.</description>
    <pubDate>{recent}</pubDate>
  </item>
  <item>
    <title>Older Story</title>
    <link>{content_base}/articles/older</link>
    <pubDate>Mon, 02 Jun 2025 09:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Undated Story</title>
    <link>{content_base}/articles/undated</link>
  </item>
</channel></rss>"#
    )
}

async fn content_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(feed_xml(&server.uri())),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/articles/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "<html><head><title>Article</title></head>\
                 <body><article><p>Source paragraph one.</p>\
                 <p>Source paragraph two.</p></article></body></html>",
                "text/html; charset=utf-8",
            ),
        )
        .mount(&server)
        .await;

    server
}

async fn api_server() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [
                {"message": {"role": "assistant", "content": "Rewritten article body."}}
            ],
            "usage": {"total_tokens": 42}
        })))
        .mount(&server)
        .await;

    server
}

fn campaign(feed_url: &str) -> Campaign {
    Campaign {
        id: "c1".into(),
        name: "pipeline test".into(),
        status: CampaignStatus::Active,
        sources: vec![SourceConfig {
            source_type: SourceType::Feed,
            url: Some(feed_url.to_string()),
            query: None,
            priority_override: None,
        }],
        // Always due, so the test can run discovery twice
        discovery_interval_mins: 0,
        backend: Some(Provider::OpenAi),
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

fn fetcher() -> Arc<ContentFetcher> {
    Arc::new(
        ContentFetcher::new(&FetcherConfig {
            rate_limit: 100,
            max_retries: 1,
            request_timeout_secs: 5,
            max_redirects: 3,
        })
        .unwrap()
        .with_base_delay(1),
    )
}

#[tokio::test]
async fn test_discover_rewrite_publish_with_key_rotation() {
    let content = content_server().await;
    let api = api_server().await;

    let db = Database::in_memory().unwrap();
    let queue: SharedQueueStore = Arc::new(SqliteQueueStore::new(db.clone()));
    let campaigns = Arc::new(CampaignRepository::new(db.clone()));
    let keys = Arc::new(KeyStore::new(
        db,
        SecretCipher::with_iterations("pipeline secret", 10),
    ));

    let k1 = keys.add_key(Provider::OpenAi, "sk-one", "k1", 0, 0).unwrap();
    let k2 = keys.add_key(Provider::OpenAi, "sk-two", "k2", 0, 0).unwrap();

    let c = campaign(&format!("{}/feed.xml", content.uri()));
    campaigns.upsert(&c).unwrap();

    // Discovery: three feed items, all new
    let discovery = DiscoveryOrchestrator::new(queue.clone(), campaigns.clone())
        .register(Arc::new(FeedDiscoverer::new(fetcher())));

    let outcome = discovery.discover(&c).await.unwrap();
    assert_eq!(
        outcome,
        DiscoveryOutcome::Completed {
            found: 3,
            enqueued: 3,
            skipped: 0
        }
    );

    // The recent item gets the recency boost and leads the queue
    let pending = queue.dequeue_next(10, None).unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].title, "Breaking Update");
    assert_eq!(pending[0].priority, 70);
    assert_eq!(pending[1].priority, 50);

    // Processing: rewrite through the mock chat API, publish to disk
    let generator = Arc::new(
        GenerationOrchestrator::new(keys.clone(), campaigns.clone(), 2, 2).register_backend(
            Arc::new(OpenAiBackend::new(reqwest::Client::new(), &api.uri())),
        ),
    );

    let output_dir = tempfile::tempdir().unwrap();
    let publisher =
        Arc::new(MarkdownPublisher::new(output_dir.path()).unwrap()) as Arc<dyn Publisher>;

    let processor = Processor::new(queue.clone(), fetcher(), generator, publisher);
    let totals = processor.process_batch(10, None).await.unwrap();
    assert_eq!(totals.published, 3);
    assert_eq!(totals.failed, 0);

    // Round-robin rotation alternated the two credentials across calls
    let requests = api.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let auth: Vec<&str> = requests
        .iter()
        .map(|r| r.headers.get("authorization").unwrap().to_str().unwrap())
        .collect();
    assert_eq!(auth, vec!["Bearer sk-one", "Bearer sk-two", "Bearer sk-one"]);

    // Usage accounting followed the selections
    let stored = keys.list(Some(Provider::OpenAi)).unwrap();
    let usage = |id: &str| {
        stored
            .iter()
            .find(|k| k.id == id)
            .map(|k| (k.requests_today, k.tokens_used))
            .unwrap()
    };
    assert_eq!(usage(&k1.id), (2, 84));
    assert_eq!(usage(&k2.id), (1, 42));

    // Every item completed with its post id, and the markdown files exist
    for item in &pending {
        let done = queue.get(&item.id).unwrap().unwrap();
        assert_eq!(done.status, ItemStatus::Completed);
        let post_id = done.result_post_id.unwrap();
        assert!(output_dir.path().join(&post_id).exists());
        assert!(queue.is_published("c1", &item.source_url).unwrap());
    }

    let written = std::fs::read_to_string(
        output_dir.path().join(
            queue
                .get(&pending[0].id)
                .unwrap()
                .unwrap()
                .result_post_id
                .unwrap(),
        ),
    )
    .unwrap();
    assert!(written.contains("Rewritten article body."));
    assert!(written.contains("title: \"Breaking Update\""));

    // A second discovery pass finds the same items and skips them all
    let refreshed = campaigns.get("c1").unwrap().unwrap();
    let outcome = discovery.discover(&refreshed).await.unwrap();
    assert_eq!(
        outcome,
        DiscoveryOutcome::Completed {
            found: 3,
            enqueued: 0,
            skipped: 3
        }
    );
}

#[tokio::test]
async fn test_failed_discovery_counts_toward_auto_pause() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let db = Database::in_memory().unwrap();
    let queue: SharedQueueStore = Arc::new(SqliteQueueStore::new(db.clone()));
    let campaigns = Arc::new(CampaignRepository::new(db));

    let c = campaign(&format!("{}/feed.xml", server.uri()));
    campaigns.upsert(&c).unwrap();

    let discovery = DiscoveryOrchestrator::new(queue, campaigns.clone())
        .register(Arc::new(FeedDiscoverer::new(fetcher())));

    for expected in 1..=5 {
        let current = campaigns.get("c1").unwrap().unwrap();
        assert!(discovery.discover(&current).await.is_err());
        let stored = campaigns.get("c1").unwrap().unwrap();
        assert_eq!(stored.consecutive_error_count, expected);
    }

    // Five consecutive failures pause the campaign
    let stored = campaigns.get("c1").unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Paused);
    assert_eq!(
        discovery.discover(&stored).await.unwrap(),
        DiscoveryOutcome::Inactive
    );
}
