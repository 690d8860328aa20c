// src/core/metrics.rs

//! Defines and registers Prometheus metrics for daemon monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifetime.

use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram,
};

lazy_static! {
    // --- Store gauges ---
    /// The number of attributes currently held in the in-memory store.
    pub static ref ATTRIBUTES_TOTAL: Gauge =
        register_gauge!("clattrd_attributes_total", "Number of attributes currently held.").unwrap();
    /// 1 if this node currently believes itself the elected writer, else 0.
    pub static ref IS_WRITER: Gauge =
        register_gauge!("clattrd_is_writer", "Whether this node is the elected writer (1) or not (0).").unwrap();
    /// 1 while an election is in progress.
    pub static ref ELECTION_IN_PROGRESS: Gauge =
        register_gauge!("clattrd_election_in_progress", "Whether an election is currently in progress.").unwrap();
    /// The number of attributes with a CIB write currently in flight.
    pub static ref PENDING_WRITES: Gauge =
        register_gauge!("clattrd_pending_writes", "Number of attributes with a write in flight.").unwrap();
    /// The number of known cluster peers.
    pub static ref PEERS_KNOWN: Gauge =
        register_gauge!("clattrd_peers_known", "Number of peers currently known to this node.").unwrap();

    // --- Counters ---
    /// The total number of client requests processed since startup.
    pub static ref REQUESTS_PROCESSED_TOTAL: Counter =
        register_counter!("clattrd_requests_processed_total", "Total number of IPC client requests processed.").unwrap();
    /// The total number of CIB writes that completed successfully.
    pub static ref CIB_WRITES_SUCCEEDED_TOTAL: Counter =
        register_counter!("clattrd_cib_writes_succeeded_total", "Total number of CIB writes that completed successfully.").unwrap();
    /// The total number of CIB writes retried after a transient failure.
    pub static ref CIB_WRITES_RETRIED_TOTAL: Counter =
        register_counter!("clattrd_cib_writes_retried_total", "Total number of CIB write retries after a transient failure.").unwrap();
    /// The total number of elections started.
    pub static ref ELECTIONS_STARTED_TOTAL: Counter =
        register_counter!("clattrd_elections_started_total", "Total number of elections started by this node.").unwrap();
    /// The total number of peer messages dropped by the sync filter rule.
    pub static ref PEER_MESSAGES_FILTERED_TOTAL: Counter =
        register_counter!("clattrd_peer_messages_filtered_total", "Total number of inbound peer messages dropped by the filter rule.").unwrap();

    // --- Histograms ---
    /// A histogram of CIB write round-trip latencies.
    pub static ref CIB_WRITE_LATENCY_SECONDS: Histogram =
        register_histogram!("clattrd_cib_write_latency_seconds", "Latency of CIB write round trips in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
