//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{ChainError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const CHAINS_STARTED_TOTAL: &str = "vchain_chains_started_total";
    pub const CHAINS_COMPLETED_TOTAL: &str = "vchain_chains_completed_total";
    pub const CHAINS_FAILED_TOTAL: &str = "vchain_chains_failed_total";
    pub const CHAINS_RETRIED_TOTAL: &str = "vchain_chains_retried_total";
    pub const CHAINS_IN_FLIGHT: &str = "vchain_chains_in_flight";
    pub const CHAIN_DURATION_SECONDS: &str = "vchain_chain_duration_seconds";
    pub const CHAIN_COST_USD: &str = "vchain_chain_cost_usd";

    pub const SEGMENTS_GENERATED_TOTAL: &str = "vchain_segments_generated_total";
    pub const SEGMENT_POLL_ATTEMPTS: &str = "vchain_segment_poll_attempts";
    pub const POLL_ERRORS_TOTAL: &str = "vchain_poll_errors_total";

    pub const CONCAT_TOTAL: &str = "vchain_concat_total";
    pub const WORK_DIRS_RECLAIMED_TOTAL: &str = "vchain_work_dirs_reclaimed_total";
}

/// Install the Prometheus exporter listening on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| ChainError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

pub fn record_chain_started() {
    counter!(names::CHAINS_STARTED_TOTAL).increment(1);
}

pub fn record_chain_completed(duration_secs: f64, cost: f64) {
    counter!(names::CHAINS_COMPLETED_TOTAL).increment(1);
    histogram!(names::CHAIN_DURATION_SECONDS).record(duration_secs);
    histogram!(names::CHAIN_COST_USD).record(cost);
}

pub fn record_chain_failed(stage: &'static str, permanent: bool) {
    let labels = [("stage", stage.to_string()), ("permanent", permanent.to_string())];
    counter!(names::CHAINS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_chain_retried() {
    counter!(names::CHAINS_RETRIED_TOTAL).increment(1);
}

pub fn set_chains_in_flight(count: usize) {
    gauge!(names::CHAINS_IN_FLIGHT).set(count as f64);
}

pub fn record_segment_generated(model: &str, poll_attempts: u32) {
    let labels = [("model", model.to_string())];
    counter!(names::SEGMENTS_GENERATED_TOTAL, &labels).increment(1);
    histogram!(names::SEGMENT_POLL_ATTEMPTS).record(poll_attempts as f64);
}

pub fn record_poll_error() {
    counter!(names::POLL_ERRORS_TOTAL).increment(1);
}

pub fn record_concat(strategy: &'static str) {
    let labels = [("strategy", strategy.to_string())];
    counter!(names::CONCAT_TOTAL, &labels).increment(1);
}

pub fn record_work_dirs_reclaimed(count: usize) {
    counter!(names::WORK_DIRS_RECLAIMED_TOTAL).increment(count as u64);
}
