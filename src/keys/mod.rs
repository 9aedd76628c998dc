//! Provider credential management.
//!
//! The [`KeyStore`] is the only place secrets are decrypted. Callers receive
//! plaintext only at the moment of injection into a backend or provider call
//! and are expected to drop it immediately afterwards.

pub mod crypto;
pub mod rotation;

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

pub use crypto::{CryptoError, SecretCipher};
pub use rotation::{RotationError, RotationState, RotationStrategy};

use crate::models::{KeyStatus, Provider, ProviderKey};
use crate::storage::{CampaignRepository, Database, KeyRepository};

pub struct KeyStore {
    keys: KeyRepository,
    campaigns: CampaignRepository,
    cipher: SecretCipher,
}

impl KeyStore {
    pub fn new(db: Arc<Database>, cipher: SecretCipher) -> Self {
        Self {
            keys: KeyRepository::new(db.clone()),
            campaigns: CampaignRepository::new(db),
            cipher,
        }
    }

    /// Encrypt and store a new credential. Quotas of 0 mean unlimited.
    pub fn add_key(
        &self,
        provider: Provider,
        secret: &str,
        label: &str,
        daily_quota: i64,
        monthly_quota: i64,
    ) -> Result<ProviderKey> {
        if secret.trim().is_empty() {
            anyhow::bail!("Secret must not be empty");
        }
        if daily_quota < 0 || monthly_quota < 0 {
            anyhow::bail!("Quotas must not be negative");
        }

        let key = ProviderKey {
            id: Uuid::new_v4().to_string(),
            provider,
            encrypted_secret: self
                .cipher
                .seal(secret)
                .context("Failed to encrypt secret")?,
            label: label.to_string(),
            daily_quota,
            monthly_quota,
            requests_today: 0,
            requests_month: 0,
            tokens_used: 0,
            status: KeyStatus::Active,
            last_used_at: None,
        };

        self.keys.insert(&key)?;
        tracing::info!(key_id = %key.id, provider = provider.as_str(), "Added provider key");
        Ok(key)
    }

    pub fn list(&self, provider: Option<Provider>) -> Result<Vec<ProviderKey>> {
        self.keys.list(provider)
    }

    pub fn get(&self, key_id: &str) -> Result<Option<ProviderKey>> {
        self.keys.get(key_id)
    }

    /// Keys for a provider that are active and within quota, in stable order
    pub fn eligible_keys(&self, provider: Provider) -> Result<Vec<ProviderKey>> {
        let keys = self.keys.list(Some(provider))?;
        Ok(keys.into_iter().filter(|k| k.is_eligible()).collect())
    }

    /// Whether a call to this provider could be credentialed right now.
    /// Credential-free providers always qualify.
    pub fn has_usable_key(&self, provider: Provider) -> Result<bool> {
        if provider.credential_free() {
            return Ok(true);
        }
        Ok(!self.eligible_keys(provider)?.is_empty())
    }

    /// Decrypt a key's secret for injection into an adapter call
    pub fn decrypt_secret(&self, key: &ProviderKey) -> Result<String> {
        self.cipher
            .open(&key.encrypted_secret)
            .context("Failed to decrypt provider secret")
    }

    pub fn record_usage(&self, key_id: &str, tokens: i64) -> Result<()> {
        self.keys.record_usage(key_id, tokens)
    }

    pub fn set_status(&self, key_id: &str, status: KeyStatus) -> Result<()> {
        self.keys.set_status(key_id, status)
    }

    pub fn reset_daily_counters(&self) -> Result<usize> {
        self.keys.reset_daily_counters()
    }

    pub fn reset_monthly_counters(&self) -> Result<usize> {
        self.keys.reset_monthly_counters()
    }

    /// Delete a key unless some campaign's rotation state still references it
    pub fn delete_key(&self, key_id: &str) -> Result<bool> {
        if self.campaigns.any_referencing_key(key_id)? {
            anyhow::bail!("Key {key_id} is referenced by a campaign rotation state");
        }
        self.keys.delete(key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyStore {
        let db = Database::in_memory().unwrap();
        KeyStore::new(db, SecretCipher::with_iterations("test-passphrase", 10))
    }

    #[test]
    fn test_add_key_encrypts_secret() {
        let store = store();
        let key = store
            .add_key(Provider::OpenAi, "sk-plain", "primary", 100, 0)
            .unwrap();

        assert_ne!(key.encrypted_secret, "sk-plain");
        assert!(!key.encrypted_secret.contains("sk-plain"));
        assert_eq!(store.decrypt_secret(&key).unwrap(), "sk-plain");
    }

    #[test]
    fn test_add_key_rejects_empty_secret() {
        let store = store();
        assert!(store
            .add_key(Provider::OpenAi, "   ", "label", 0, 0)
            .is_err());
        assert!(store
            .add_key(Provider::OpenAi, "sk", "label", -1, 0)
            .is_err());
    }

    #[test]
    fn test_eligible_keys_filters_quota_and_status() {
        let store = store();
        let k1 = store
            .add_key(Provider::OpenAi, "sk-1", "a", 1, 0)
            .unwrap();
        let k2 = store
            .add_key(Provider::OpenAi, "sk-2", "b", 0, 0)
            .unwrap();
        let k3 = store
            .add_key(Provider::OpenAi, "sk-3", "c", 0, 0)
            .unwrap();

        store.record_usage(&k1.id, 10).unwrap(); // exhausts daily quota of 1
        store.set_status(&k3.id, KeyStatus::Inactive).unwrap();

        let eligible = store.eligible_keys(Provider::OpenAi).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, k2.id);
    }

    #[test]
    fn test_has_usable_key() {
        let store = store();
        assert!(!store.has_usable_key(Provider::OpenAi).unwrap());
        // Credential-free providers always pass
        assert!(store.has_usable_key(Provider::Gdelt).unwrap());

        store
            .add_key(Provider::OpenAi, "sk-1", "a", 0, 0)
            .unwrap();
        assert!(store.has_usable_key(Provider::OpenAi).unwrap());
    }

    #[test]
    fn test_delete_guarded_by_campaign_reference() {
        let db = Database::in_memory().unwrap();
        let store = KeyStore::new(db.clone(), SecretCipher::with_iterations("p", 10));
        let campaigns = CampaignRepository::new(db);

        let key = store
            .add_key(Provider::OpenAi, "sk-1", "a", 0, 0)
            .unwrap();

        let campaign = crate::models::Campaign {
            id: "c1".into(),
            name: "c1".into(),
            status: crate::models::CampaignStatus::Active,
            sources: vec![],
            discovery_interval_mins: 60,
            backend: Some(Provider::OpenAi),
            model: None,
            rotation_strategy: "failover".into(),
            consecutive_error_count: 0,
            discovery_in_progress: false,
            last_discovery_started: None,
            last_discovery_finished: None,
            last_status: None,
            last_item_count: None,
            exclude_keywords: vec![],
            allow_domains: vec![],
            block_domains: vec![],
        };
        campaigns.upsert(&campaign).unwrap();

        let mut state = RotationState::new(RotationStrategy::Failover);
        state.primary_key_id = Some(key.id.clone());
        campaigns
            .save_rotation_state("c1", &state.to_json().unwrap())
            .unwrap();

        assert!(store.delete_key(&key.id).is_err());

        // Unreferenced key deletes fine
        let other = store
            .add_key(Provider::OpenAi, "sk-2", "b", 0, 0)
            .unwrap();
        assert!(store.delete_key(&other.id).unwrap());
    }
}
