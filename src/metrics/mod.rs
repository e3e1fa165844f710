//! Prometheus metrics for monitoring
//!
//! Tracks:
//! - Transaction submissions and their terminal states
//! - Confirmation latency
//! - Per-account batch outcomes

use crate::error::{DeployError, DeployResult};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, CounterVec, Encoder,
    Histogram, IntCounter, TextEncoder,
};
use std::path::Path;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: IntCounter = register_int_counter!(
        "deployer_transactions_submitted_total",
        "Total transactions accepted by the node"
    ).expect("metric registration");

    pub static ref TX_CONFIRMED: IntCounter = register_int_counter!(
        "deployer_transactions_confirmed_total",
        "Total transactions confirmed with success status"
    ).expect("metric registration");

    pub static ref TX_REVERTED: IntCounter = register_int_counter!(
        "deployer_transactions_reverted_total",
        "Total transactions whose receipt reported failure"
    ).expect("metric registration");

    pub static ref TX_TIMED_OUT: IntCounter = register_int_counter!(
        "deployer_transactions_timed_out_total",
        "Total transactions without a receipt before the deadline"
    ).expect("metric registration");

    pub static ref TX_LATENCY: Histogram = register_histogram!(
        "deployer_confirmation_latency_seconds",
        "Time from submission to receipt",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).expect("metric registration");

    // Batch metrics
    pub static ref ACCOUNT_RESULTS: CounterVec = register_counter_vec!(
        "deployer_account_results_total",
        "Accounts processed by outcome",
        &["outcome"]
    ).expect("metric registration");
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_confirmed() {
    TX_CONFIRMED.inc();
}

pub fn record_tx_reverted() {
    TX_REVERTED.inc();
}

pub fn record_tx_timed_out() {
    TX_TIMED_OUT.inc();
}

pub fn record_tx_latency(latency_secs: f64) {
    TX_LATENCY.observe(latency_secs);
}

pub fn record_account_result(outcome: &str) {
    ACCOUNT_RESULTS.with_label_values(&[outcome]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> DeployResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| DeployError::Internal(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| DeployError::Internal(e.to_string()))
}

/// Write the text exposition to `path`
pub fn write_to(path: &Path) -> DeployResult<()> {
    std::fs::write(path, render()?)?;
    info!("Metrics written to {:?}", path);
    Ok(())
}
