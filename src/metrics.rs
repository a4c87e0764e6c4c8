//! Harvest observability metrics
//!
//! Counters, gauges and histograms are emitted through the `metrics` facade.
//! Without an installed recorder every call is a no-op; [`init_metrics`]
//! installs a Prometheus scrape endpoint.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

use crate::TaskType;

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Initialize the Prometheus exporter on `addr`
///
/// Idempotent: later calls are ignored once an exporter is installed. Must run
/// inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests sent to the store, by status"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Retries after transient failures"
    );
    describe_counter!(
        "http_rate_limited_total",
        Unit::Count,
        "Rate-limit responses received"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_gauge!(
        "rate_limiter_current_rate",
        "Current token bucket refill rate (requests per second)"
    );
    describe_counter!(
        "items_committed_total",
        Unit::Count,
        "Ids committed to storage, by task"
    );
    describe_counter!(
        "items_failed_total",
        Unit::Count,
        "Ids whose fetch failed, by task"
    );
    describe_counter!(
        "checkpoint_saves_total",
        Unit::Count,
        "Checkpoint file writes"
    );
    describe_histogram!(
        "commit_batch_size",
        Unit::Count,
        "Results written per storage flush"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!(%addr, "Metrics system initialized");
    Ok(())
}

/// Whether an exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.get().is_some()
}

/// Record one HTTP response (or `None` for a network error)
pub fn record_http_request(status: Option<u16>) {
    let status = status.map_or_else(|| "network_error".to_string(), |s| s.to_string());
    counter!("http_requests_total", "status" => status).increment(1);
}

/// Record a retry and the backoff slept before it
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("http_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
    debug!(
        attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record a rate-limit response
pub fn record_rate_limited() {
    counter!("http_rate_limited_total").increment(1);
}

/// Record the limiter's new effective rate
pub fn record_rate_limiter_rate(rate: f64) {
    gauge!("rate_limiter_current_rate").set(rate);
}

/// Record a storage flush of `count` results
pub fn record_commit(task: TaskType, count: usize) {
    counter!("items_committed_total", "task" => task.as_str()).increment(count as u64);
    histogram!("commit_batch_size", "task" => task.as_str()).record(count as f64);
}

/// Record one failed id
pub fn record_item_failed(task: TaskType) {
    counter!("items_failed_total", "task" => task.as_str()).increment(1);
}

/// Record one checkpoint write
pub fn record_checkpoint_save() {
    counter!("checkpoint_saves_total").increment(1);
}
