//! Key rotation strategies and their persisted state.
//!
//! Rotation state is serialized as versioned JSON into the campaign row, so
//! a campaign keeps its position in the rotation across process restarts.
//! `select` only ever sees keys that already passed the eligibility filter
//! (active status, quota headroom); the strategies decide ordering among
//! those.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ProviderKey;

pub const STATE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("No eligible keys available")]
    NoKeysAvailable,
    #[error("All keys in the failover chain have failed")]
    AllKeysFailed,
}

/// How the next key is chosen from the eligible set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastUsed,
    Failover,
}

impl RotationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
            Self::LeastUsed => "least_used",
            Self::Failover => "failover",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "round_robin" => Some(Self::RoundRobin),
            "random" => Some(Self::Random),
            "least_used" => Some(Self::LeastUsed),
            "failover" => Some(Self::Failover),
            _ => None,
        }
    }
}

/// Per-campaign rotation position, persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationState {
    pub version: u32,
    pub strategy: RotationStrategy,
    /// Next round-robin position
    #[serde(default)]
    pub current_index: usize,
    /// Pinned primary for failover; defaults to the first key seen
    #[serde(default)]
    pub primary_key_id: Option<String>,
    /// Keys marked failed for failover purposes
    #[serde(default)]
    pub failed_key_ids: BTreeSet<String>,
    #[serde(default)]
    pub last_used_key_id: Option<String>,
}

impl RotationState {
    pub fn new(strategy: RotationStrategy) -> Self {
        Self {
            version: STATE_VERSION,
            strategy,
            current_index: 0,
            primary_key_id: None,
            failed_key_ids: BTreeSet::new(),
            last_used_key_id: None,
        }
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Pick the next key from the eligible set and advance internal state
    pub fn select<'k>(&mut self, keys: &'k [ProviderKey]) -> Result<&'k ProviderKey, RotationError> {
        if keys.is_empty() {
            return Err(RotationError::NoKeysAvailable);
        }

        let chosen = match self.strategy {
            RotationStrategy::RoundRobin => {
                let idx = self.current_index % keys.len();
                self.current_index = (idx + 1) % keys.len();
                &keys[idx]
            }
            RotationStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..keys.len());
                &keys[idx]
            }
            RotationStrategy::LeastUsed => keys
                .iter()
                .min_by_key(|k| k.requests_today)
                .ok_or(RotationError::NoKeysAvailable)?,
            RotationStrategy::Failover => {
                if self.primary_key_id.is_none() {
                    self.primary_key_id = Some(keys[0].id.clone());
                }
                let primary = self.primary_key_id.as_deref();

                keys.iter()
                    .find(|k| Some(k.id.as_str()) == primary && !self.failed_key_ids.contains(&k.id))
                    .or_else(|| keys.iter().find(|k| !self.failed_key_ids.contains(&k.id)))
                    .ok_or(RotationError::AllKeysFailed)?
            }
        };

        self.last_used_key_id = Some(chosen.id.clone());
        Ok(chosen)
    }

    /// Mark a key failed so failover skips it on subsequent selections
    pub fn mark_failed(&mut self, key_id: &str) {
        self.failed_key_ids.insert(key_id.to_string());
    }

    /// Forget failure markers, e.g. after keys are repaired
    pub fn clear_failures(&mut self) {
        self.failed_key_ids.clear();
    }
}
