//! Generation orchestration: backend selection, key rotation, quotas and
//! the shared concurrency limiter.
//!
//! One `execute` call is the unit of accounting: it picks the campaign's
//! backend, rotates to an eligible key, holds a limiter permit for the
//! duration of the outbound call, then records usage and persists the
//! advanced rotation state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::generation::{
    BackendCall, GenerationBackend, GenerationError, GenerationOutput, GenerationRequest,
    Operation,
};
use crate::keys::{KeyStore, RotationState, RotationStrategy};
use crate::models::{Campaign, Provider, ProviderKey};
use crate::storage::CampaignRepository;

/// Backoff base for limiter acquisition; doubles per attempt, capped
const ACQUIRE_BASE_DELAY: Duration = Duration::from_millis(100);
const ACQUIRE_MAX_DELAY: Duration = Duration::from_secs(2);

pub struct GenerationOrchestrator {
    backends: HashMap<Provider, Arc<dyn GenerationBackend>>,
    keys: Arc<KeyStore>,
    campaigns: Arc<CampaignRepository>,
    limiter: Arc<Semaphore>,
    acquire_attempts: usize,
}

impl GenerationOrchestrator {
    pub fn new(
        keys: Arc<KeyStore>,
        campaigns: Arc<CampaignRepository>,
        max_concurrent: usize,
        acquire_attempts: usize,
    ) -> Self {
        Self {
            backends: HashMap::new(),
            keys,
            campaigns,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            acquire_attempts: acquire_attempts.max(1),
        }
    }

    pub fn register_backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    /// Run one generation call for a campaign.
    ///
    /// Key selection, the backend call and usage accounting happen under a
    /// single limiter permit; the permit is released when this returns.
    pub async fn execute(
        &self,
        campaign_id: &str,
        operation: Operation,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .map_err(|e| GenerationError::Storage(e.to_string()))?
            .ok_or(GenerationError::NoConfiguration)?;

        let provider = campaign.backend.ok_or(GenerationError::NoConfiguration)?;
        let backend = self
            .backends
            .get(&provider)
            .ok_or(GenerationError::NoConfiguration)?;

        if !backend.supports(operation) {
            return Err(GenerationError::UnsupportedOperation(operation));
        }

        let mut state = self.load_state(&campaign);

        // Credential-free backends bypass key selection and quota tracking
        let selected: Option<ProviderKey> = if provider.credential_free() {
            None
        } else {
            let eligible = self
                .keys
                .eligible_keys(provider)
                .map_err(|e| GenerationError::Storage(e.to_string()))?;

            if eligible.is_empty() {
                let any = self
                    .keys
                    .list(Some(provider))
                    .map_err(|e| GenerationError::Storage(e.to_string()))?;
                return Err(if any.is_empty() {
                    GenerationError::NoKeysAvailable
                } else {
                    GenerationError::QuotaExceeded
                });
            }

            let key = state.select(&eligible)?.clone();
            crate::metrics::record_key_selection(provider, state.strategy);
            Some(key)
        };

        let _permit = self.acquire_permit().await?;

        let call = BackendCall {
            credential: match &selected {
                Some(key) => self
                    .keys
                    .decrypt_secret(key)
                    .map_err(|e| GenerationError::Storage(e.to_string()))?,
                None => String::new(),
            },
            model: campaign
                .model
                .clone()
                .unwrap_or_else(|| default_model(provider).to_string()),
        };

        let started = std::time::Instant::now();
        let result = backend.generate(operation, request, &call).await;
        crate::metrics::record_generation_duration(provider, started.elapsed());

        match result {
            Ok(output) => {
                if let Some(key) = &selected {
                    if let Err(e) = self.keys.record_usage(&key.id, output.tokens_used) {
                        tracing::warn!(error = %e, key_id = %key.id, "Failed to record key usage");
                    }
                }
                self.persist_state(campaign_id, &state);
                tracing::info!(
                    campaign_id,
                    provider = provider.as_str(),
                    operation = operation.as_str(),
                    tokens = output.tokens_used,
                    "Generation call succeeded"
                );
                Ok(output)
            }
            Err(e) => {
                if state.strategy == RotationStrategy::Failover {
                    if let Some(key) = &selected {
                        state.mark_failed(&key.id);
                    }
                }
                self.persist_state(campaign_id, &state);
                tracing::error!(
                    campaign_id,
                    provider = provider.as_str(),
                    error = %e,
                    "Generation call failed"
                );
                Err(e)
            }
        }
    }

    /// Acquire a limiter permit with capped exponential backoff. Running out
    /// of attempts surfaces as a rate limit error the caller can retry.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, GenerationError> {
        for attempt in 0..self.acquire_attempts {
            if attempt > 0 {
                let delay = ACQUIRE_BASE_DELAY * 2_u32.pow((attempt - 1) as u32);
                tokio::time::sleep(delay.min(ACQUIRE_MAX_DELAY)).await;
            }
            match self.limiter.clone().try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(_) => continue,
            }
        }
        Err(GenerationError::RateLimitExceeded)
    }

    fn load_state(&self, campaign: &Campaign) -> RotationState {
        let strategy = RotationStrategy::from_str_opt(&campaign.rotation_strategy)
            .unwrap_or(RotationStrategy::RoundRobin);

        match self
            .campaigns
            .load_rotation_state(&campaign.id)
            .ok()
            .flatten()
            .and_then(|json| RotationState::from_json(&json))
        {
            // A changed strategy in campaign config discards the old state
            Some(state) if state.strategy == strategy => state,
            _ => RotationState::new(strategy),
        }
    }

    fn persist_state(&self, campaign_id: &str, state: &RotationState) {
        let json = match state.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, campaign_id, "Failed to serialize rotation state");
                return;
            }
        };
        if let Err(e) = self.campaigns.save_rotation_state(campaign_id, &json) {
            tracing::warn!(error = %e, campaign_id, "Failed to persist rotation state");
        }
    }
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => "gpt-4o-mini",
        Provider::Ollama => "qwen2.5:7b",
        // Search providers are never generation backends
        Provider::NewsData | Provider::Gdelt => "unsupported",
    }
}
