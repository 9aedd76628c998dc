//! Per-provider circuit breaker state.
//!
//! The window holds recent call outcomes with a TTL. A circuit opens only
//! when the window contains enough failures AND the failure rate is high;
//! a single success wipes the window and closes the circuit. Open circuits
//! are skipped by the fallback chain until old outcomes age out.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Minimum failures in the window before a circuit can open
pub const OPEN_MIN_FAILURES: usize = 10;

/// Failure rate the window must exceed for the circuit to open
pub const OPEN_FAILURE_RATE: f64 = 0.8;

const DEFAULT_WINDOW_TTL: Duration = Duration::from_secs(300);

/// Sliding window of recent call outcomes for one provider
#[derive(Debug)]
pub struct CircuitWindow {
    /// (when, succeeded) pairs, oldest first
    outcomes: VecDeque<(Instant, bool)>,
    ttl: Duration,
    pub stats: ProviderStats,
}

/// Lifetime counters for one provider, reported by status commands
#[derive(Debug, Default, Clone)]
pub struct ProviderStats {
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

impl Default for CircuitWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TTL)
    }
}

impl CircuitWindow {
    pub fn new(ttl: Duration) -> Self {
        Self {
            outcomes: VecDeque::new(),
            ttl,
            stats: ProviderStats::default(),
        }
    }

    fn prune(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return;
        };
        while let Some((when, _)) = self.outcomes.front() {
            if *when < cutoff {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Any success clears the window entirely, closing the circuit
    pub fn record_success(&mut self) {
        self.outcomes.clear();
        self.stats.successes += 1;
        self.stats.last_error = None;
    }

    pub fn record_failure(&mut self, error: &str) {
        self.prune();
        self.outcomes.push_back((Instant::now(), false));
        self.stats.failures += 1;
        self.stats.last_error = Some(error.to_string());
    }

    /// Open means: enough recent failures and a high enough failure rate.
    /// Both conditions must hold so a provider with mixed results keeps
    /// getting traffic.
    pub fn is_open(&mut self) -> bool {
        self.prune();

        let total = self.outcomes.len();
        if total == 0 {
            return false;
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();

        failures >= OPEN_MIN_FAILURES && (failures as f64 / total as f64) > OPEN_FAILURE_RATE
    }
}
