//! Prometheus metrics for the discovery and processing pipeline.
//!
//! Call `init_metrics()` once at application startup to register all
//! metrics. If initialization never happens (library use, tests), every
//! recording helper is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};

use crate::keys::RotationStrategy;
use crate::models::Provider;

/// Container for all pipeline metrics
struct PipelineMetrics {
    items_discovered: Counter,
    items_enqueued: Counter,
    discovery_failures: Counter,
    items_processed: CounterVec,
    fetch_retries: Counter,
    provider_attempts: CounterVec,
    key_selections: CounterVec,
    generation_duration: HistogramVec,
}

static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Initialize all Prometheus metrics.
///
/// Should be called once at application startup. A failed registration is
/// returned to the caller; the pipeline runs fine without metrics.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = PipelineMetrics {
        items_discovered: register_counter!(
            "presswork_items_discovered_total",
            "Total candidate items produced by discovery runs"
        )?,
        items_enqueued: register_counter!(
            "presswork_items_enqueued_total",
            "Total items enqueued after filtering and dedup"
        )?,
        discovery_failures: register_counter!(
            "presswork_discovery_failures_total",
            "Total failed discovery runs"
        )?,
        items_processed: register_counter_vec!(
            "presswork_items_processed_total",
            "Total queue items processed by outcome",
            &["outcome"]
        )?,
        fetch_retries: register_counter!(
            "presswork_fetch_retries_total",
            "Total retried content fetches"
        )?,
        provider_attempts: register_counter_vec!(
            "presswork_provider_attempts_total",
            "Fallback chain attempts by provider and outcome",
            &["provider", "outcome"]
        )?,
        key_selections: register_counter_vec!(
            "presswork_key_selections_total",
            "Credential selections by provider and rotation strategy",
            &["provider", "strategy"]
        )?,
        generation_duration: register_histogram_vec!(
            "presswork_generation_duration_seconds",
            "Generation backend call duration in seconds",
            &["provider"],
            vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
        )?,
    };

    PIPELINE_METRICS
        .set(metrics)
        .map_err(|_| "Pipeline metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PIPELINE_METRICS.get().is_some()
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_items_discovered(count: u64) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.items_discovered.inc_by(count as f64);
    }
}

pub fn record_items_enqueued(count: u64) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.items_enqueued.inc_by(count as f64);
    }
}

pub fn record_discovery_failure() {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.discovery_failures.inc();
    }
}

/// Record a processed queue item; outcome is "published" or "failed"
pub fn record_item_processed(outcome: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.items_processed.with_label_values(&[outcome]).inc();
    }
}

pub fn record_fetch_retry() {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.fetch_retries.inc();
    }
}

/// Record one fallback chain attempt and its outcome label
pub fn record_provider_attempt(provider: Provider, outcome: &str) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.provider_attempts
            .with_label_values(&[provider.as_str(), outcome])
            .inc();
    }
}

pub fn record_key_selection(provider: Provider, strategy: RotationStrategy) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.key_selections
            .with_label_values(&[provider.as_str(), strategy.as_str()])
            .inc();
    }
}

pub fn record_generation_duration(provider: Provider, duration: Duration) {
    if let Some(m) = PIPELINE_METRICS.get() {
        m.generation_duration
            .with_label_values(&[provider.as_str()])
            .observe(duration.as_secs_f64());
    }
}
