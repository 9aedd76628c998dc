//! Ordered provider fallback with per-provider circuit breaking.
//!
//! Providers are tried in configured priority order. A provider is skipped
//! when its circuit is open or when it needs a credential and no eligible
//! key exists. The first non-empty result set wins and later providers are
//! never called for that query.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::keys::KeyStore;
use crate::models::Provider;
use crate::providers::circuit::CircuitWindow;
use crate::providers::{ProviderStats, SearchHit, SearchProvider, SearchQuery};

pub struct FallbackChain {
    providers: Vec<Arc<dyn SearchProvider>>,
    keys: Arc<KeyStore>,
    /// Circuit windows keyed per campaign and provider
    windows: Mutex<HashMap<(String, Provider), CircuitWindow>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>, keys: Arc<KeyStore>) -> Self {
        Self {
            providers,
            keys,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Run the query through the chain, returning the first non-empty
    /// result set. An empty vec means every provider was skipped, failed,
    /// or came back empty; that is not an error for the caller.
    pub async fn get_results(&self, campaign_id: &str, query: &SearchQuery) -> Vec<SearchHit> {
        for provider_impl in &self.providers {
            let provider = provider_impl.provider();

            if self.circuit_open(campaign_id, provider).await {
                tracing::debug!(provider = provider.as_str(), campaign_id, "Circuit open, skipping provider");
                crate::metrics::record_provider_attempt(provider, "skipped_circuit");
                continue;
            }

            let credential = match self.credential_for(provider_impl.as_ref()) {
                Ok(credential) => credential,
                Err(reason) => {
                    tracing::debug!(provider = provider.as_str(), reason, "No usable key, skipping provider");
                    crate::metrics::record_provider_attempt(provider, "skipped_no_key");
                    continue;
                }
            };

            match provider_impl
                .search(query, credential.as_ref().map(|(_, s)| s.as_str()))
                .await
            {
                Ok(hits) if !hits.is_empty() => {
                    self.record_success(campaign_id, provider).await;
                    if let Some((key_id, _)) = credential {
                        if let Err(e) = self.keys.record_usage(&key_id, 0) {
                            tracing::warn!(error = %e, key_id, "Failed to record key usage");
                        }
                    }
                    crate::metrics::record_provider_attempt(provider, "success");
                    tracing::debug!(
                        provider = provider.as_str(),
                        count = hits.len(),
                        "Provider returned results"
                    );
                    return hits;
                }
                Ok(_) => {
                    tracing::info!(provider = provider.as_str(), query = %query.query, "Provider returned no results");
                    self.record_failure(campaign_id, provider, "empty result set").await;
                    crate::metrics::record_provider_attempt(provider, "empty");
                }
                Err(e) => {
                    tracing::error!(provider = provider.as_str(), error = %e, "Provider call failed");
                    self.record_failure(campaign_id, provider, &e.to_string()).await;
                    crate::metrics::record_provider_attempt(provider, "error");
                }
            }
        }

        tracing::warn!(campaign_id, query = %query.query, "All providers exhausted without results");
        Vec::new()
    }

    /// Lifetime stats per provider for one campaign
    pub async fn stats(&self, campaign_id: &str) -> HashMap<Provider, ProviderStats> {
        let windows = self.windows.lock().await;
        windows
            .iter()
            .filter(|((cid, _), _)| cid == campaign_id)
            .map(|((_, provider), window)| (*provider, window.stats.clone()))
            .collect()
    }

    /// Resolve the credential to inject, if the provider needs one.
    /// Returns (key_id, secret) for usage accounting after a success.
    fn credential_for(
        &self,
        provider_impl: &dyn SearchProvider,
    ) -> Result<Option<(String, String)>, &'static str> {
        if !provider_impl.requires_credential() {
            return Ok(None);
        }

        let keys = self
            .keys
            .eligible_keys(provider_impl.provider())
            .map_err(|_| "key lookup failed")?;
        let key = keys.first().ok_or("no eligible key")?;
        let secret = self.keys.decrypt_secret(key).map_err(|_| "decrypt failed")?;

        Ok(Some((key.id.clone(), secret)))
    }

    async fn circuit_open(&self, campaign_id: &str, provider: Provider) -> bool {
        let mut windows = self.windows.lock().await;
        windows
            .entry((campaign_id.to_string(), provider))
            .or_default()
            .is_open()
    }

    async fn record_success(&self, campaign_id: &str, provider: Provider) {
        let mut windows = self.windows.lock().await;
        windows
            .entry((campaign_id.to_string(), provider))
            .or_default()
            .record_success();
    }

    async fn record_failure(&self, campaign_id: &str, provider: Provider, error: &str) {
        let mut windows = self.windows.lock().await;
        windows
            .entry((campaign_id.to_string(), provider))
            .or_default()
            .record_failure(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretCipher;
    use crate::providers::ProviderError;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider for chain tests
    struct FakeProvider {
        provider: Provider,
        needs_credential: bool,
        calls: AtomicUsize,
        outcome: Outcome,
    }

    enum Outcome {
        Hits(usize),
        Empty,
        Fail,
    }

    impl FakeProvider {
        fn new(provider: Provider, needs_credential: bool, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                provider,
                needs_credential,
                calls: AtomicUsize::new(0),
                outcome,
            })
        }
    }

    #[async_trait]
    impl SearchProvider for FakeProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn requires_credential(&self) -> bool {
            self.needs_credential
        }

        async fn search(
            &self,
            _query: &SearchQuery,
            credential: Option<&str>,
        ) -> Result<Vec<SearchHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.needs_credential && credential.is_none() {
                return Err(ProviderError::MissingCredential);
            }
            match self.outcome {
                Outcome::Hits(n) => Ok((0..n)
                    .map(|i| SearchHit {
                        url: format!("https://example.com/{i}"),
                        title: format!("Hit {i}"),
                        excerpt: None,
                        published_at: None,
                        raw: serde_json::Value::Null,
                    })
                    .collect()),
                Outcome::Empty => Ok(Vec::new()),
                Outcome::Fail => Err(ProviderError::Api {
                    status: 500,
                    message: "server error".into(),
                }),
            }
        }
    }

    fn key_store() -> Arc<KeyStore> {
        let db = Database::in_memory().unwrap();
        Arc::new(KeyStore::new(db, SecretCipher::with_iterations("p", 10)))
    }

    #[tokio::test]
    async fn test_first_success_stops_chain() {
        let first = FakeProvider::new(Provider::Gdelt, false, Outcome::Hits(3));
        let second = FakeProvider::new(Provider::NewsData, false, Outcome::Hits(5));
        let chain = FallbackChain::new(vec![first.clone(), second.clone()], key_store());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(hits.len(), 3);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_result_falls_through() {
        let first = FakeProvider::new(Provider::NewsData, false, Outcome::Empty);
        let second = FakeProvider::new(Provider::Gdelt, false, Outcome::Hits(2));
        let chain = FallbackChain::new(vec![first.clone(), second], key_store());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);

        // The empty result counted as a failure for the first provider
        let stats = chain.stats("c1").await;
        assert_eq!(stats[&Provider::NewsData].failures, 1);
        assert_eq!(stats[&Provider::Gdelt].successes, 1);
    }

    #[tokio::test]
    async fn test_failing_provider_falls_through() {
        let first = FakeProvider::new(Provider::NewsData, false, Outcome::Fail);
        let second = FakeProvider::new(Provider::Gdelt, false, Outcome::Hits(1));
        let chain = FallbackChain::new(vec![first, second], key_store());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(hits.len(), 1);

        let stats = chain.stats("c1").await;
        assert!(stats[&Provider::NewsData].last_error.is_some());
    }

    #[tokio::test]
    async fn test_all_exhausted_returns_empty() {
        let only = FakeProvider::new(Provider::Gdelt, false, Outcome::Fail);
        let chain = FallbackChain::new(vec![only], key_store());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_credentialed_provider_skipped_without_key() {
        let gated = FakeProvider::new(Provider::NewsData, true, Outcome::Hits(9));
        let fallback = FakeProvider::new(Provider::Gdelt, false, Outcome::Hits(1));
        let chain = FallbackChain::new(vec![gated.clone(), fallback], key_store());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_credential_injected_and_usage_recorded() {
        let keys = key_store();
        let added = keys
            .add_key(Provider::NewsData, "nd-secret", "primary", 0, 0)
            .unwrap();

        let gated = FakeProvider::new(Provider::NewsData, true, Outcome::Hits(2));
        let chain = FallbackChain::new(vec![gated], keys.clone());

        let hits = chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(hits.len(), 2);

        let key = keys.get(&added.id).unwrap().unwrap();
        assert_eq!(key.requests_today, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_provider() {
        let flaky = FakeProvider::new(Provider::NewsData, false, Outcome::Fail);
        let chain = FallbackChain::new(vec![flaky.clone()], key_store());

        for _ in 0..10 {
            chain.get_results("c1", &SearchQuery::new("rust")).await;
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 10);

        // Circuit is now open; the provider is not called again
        chain.get_results("c1", &SearchQuery::new("rust")).await;
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 10);

        // Another campaign has its own window
        chain.get_results("c2", &SearchQuery::new("rust")).await;
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 11);
    }
}
