//! Prometheus metrics for settlement, intake, feeds and payouts.
//!
//! This module provides:
//! - Wager intake counters (accepted / duplicate / rejected)
//! - Round counters by status and settlement latency
//! - Feed fetch latency, failures and reconnects
//! - Payout dispatch counters
//! - The open-wager gauge

use std::time::Instant;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::debug;

use crate::settlement::RoundStatus;

// === Metric Name Constants ===

/// Settlement latency metric name.
pub const METRIC_SETTLEMENT_LATENCY: &str = "settlement_latency_ms";
/// External fetch latency metric name.
pub const METRIC_FETCH_LATENCY: &str = "feed_fetch_latency_ms";
/// Accepted wagers counter metric name.
pub const METRIC_WAGERS_ACCEPTED: &str = "wagers_accepted_total";
/// Duplicate wagers counter metric name.
pub const METRIC_WAGERS_DUPLICATE: &str = "wagers_duplicate_total";
/// Rejected wagers counter metric name.
pub const METRIC_WAGERS_REJECTED: &str = "wagers_rejected_total";
/// Rounds counter metric name, labelled by status.
pub const METRIC_ROUNDS: &str = "rounds_total";
/// Payouts computed counter metric name.
pub const METRIC_PAYOUTS_COMPUTED: &str = "payouts_computed_total";
/// Payouts dispatched counter metric name.
pub const METRIC_PAYOUTS_DISPATCHED: &str = "payouts_dispatched_total";
/// Payout lookup misses counter metric name.
pub const METRIC_PAYOUT_LOOKUP_MISSES: &str = "payout_lookup_misses_total";
/// Payout failures counter metric name.
pub const METRIC_PAYOUTS_FAILED: &str = "payouts_failed_total";
/// Feed fetch failures counter metric name.
pub const METRIC_FEED_FETCH_FAILURES: &str = "feed_fetch_failures_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Open wagers gauge metric name.
pub const METRIC_OPEN_WAGERS: &str = "open_wagers";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_SETTLEMENT_LATENCY,
        "Round settlement latency in milliseconds"
    );
    describe_histogram!(
        METRIC_FETCH_LATENCY,
        "External feed fetch latency in milliseconds"
    );

    describe_counter!(METRIC_WAGERS_ACCEPTED, "Total number of wagers accepted");
    describe_counter!(
        METRIC_WAGERS_DUPLICATE,
        "Total number of duplicate wager events absorbed"
    );
    describe_counter!(METRIC_WAGERS_REJECTED, "Total number of wagers rejected");
    describe_counter!(METRIC_ROUNDS, "Total number of rounds processed by status");
    describe_counter!(
        METRIC_PAYOUTS_COMPUTED,
        "Total number of winner payouts computed"
    );
    describe_counter!(
        METRIC_PAYOUTS_DISPATCHED,
        "Total number of payouts handed to the payment rail"
    );
    describe_counter!(
        METRIC_PAYOUT_LOOKUP_MISSES,
        "Total number of payouts skipped for lack of a destination"
    );
    describe_counter!(
        METRIC_PAYOUTS_FAILED,
        "Total number of payouts the payment rail failed"
    );
    describe_counter!(
        METRIC_FEED_FETCH_FAILURES,
        "Total number of failed external fetch attempts"
    );
    describe_counter!(
        METRIC_WS_RECONNECTS,
        "Total number of WebSocket reconnections"
    );

    describe_gauge!(METRIC_OPEN_WAGERS, "Number of open wagers in the ledger");

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and return its render handle.
pub fn install_prometheus() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| e.to_string())
}

/// Record external fetch latency.
pub fn record_fetch_latency(start: Instant, operation: &str) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_FETCH_LATENCY, "operation" => operation.to_string()).record(latency_ms);
}

/// Increment accepted wagers counter.
pub fn inc_wagers_accepted() {
    counter!(METRIC_WAGERS_ACCEPTED).increment(1);
}

/// Increment duplicate wagers counter.
pub fn inc_wagers_duplicate() {
    counter!(METRIC_WAGERS_DUPLICATE).increment(1);
}

/// Increment rejected wagers counter.
pub fn inc_wagers_rejected() {
    counter!(METRIC_WAGERS_REJECTED).increment(1);
}

/// Increment rounds counter for a status.
pub fn inc_rounds(status: RoundStatus) {
    counter!(METRIC_ROUNDS, "status" => status.to_string()).increment(1);
}

/// Add to payouts computed counter.
pub fn inc_payouts_computed(count: u64) {
    counter!(METRIC_PAYOUTS_COMPUTED).increment(count);
}

/// Increment payouts dispatched counter.
pub fn inc_payouts_dispatched() {
    counter!(METRIC_PAYOUTS_DISPATCHED).increment(1);
}

/// Increment payout lookup misses counter.
pub fn inc_payout_lookup_misses() {
    counter!(METRIC_PAYOUT_LOOKUP_MISSES).increment(1);
}

/// Increment payout failures counter.
pub fn inc_payouts_failed() {
    counter!(METRIC_PAYOUTS_FAILED).increment(1);
}

/// Increment feed fetch failures counter.
pub fn inc_feed_fetch_failures(operation: &str) {
    counter!(METRIC_FEED_FETCH_FAILURES, "operation" => operation.to_string()).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Set the open wagers gauge.
pub fn set_open_wagers(count: usize) {
    gauge!(METRIC_OPEN_WAGERS).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for round settlement.
pub fn timer_settlement() -> LatencyTimer {
    LatencyTimer::new(METRIC_SETTLEMENT_LATENCY)
}
