// VDX Server - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for VDX Server.
//!
//! This module defines all Prometheus metrics exposed on `/metrics` and
//! the functions the connection loop and dispatcher use to update them.

use std::sync::Mutex;

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};
use vdx::{CompressionMetrics, PoolStats};

lazy_static! {
    // ============================================================
    // Protocol
    // ============================================================

    /// Commands handled, by command name and outcome.
    pub static ref COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vdx_commands_total",
        "Commands handled by name and outcome",
        &["command", "outcome"]
    ).unwrap();

    /// Failed commands, by error kind.
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "vdx_errors_total",
        "Failed commands by error kind",
        &["kind"]
    ).unwrap();

    /// Bytes written to clients.
    pub static ref BYTES_SENT_TOTAL: IntCounter = register_int_counter!(
        "vdx_bytes_sent_total",
        "Bytes written to clients"
    ).unwrap();

    // ============================================================
    // Connections
    // ============================================================

    /// Currently open connections.
    pub static ref ACTIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        "vdx_active_connections",
        "Currently open client connections"
    ).unwrap();

    /// Connections refused because the cap was reached.
    pub static ref REJECTED_CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "vdx_rejected_connections_total",
        "Connections refused at the connection cap"
    ).unwrap();

    // ============================================================
    // Pool and compression
    // ============================================================

    /// Pool counters (created, leased, returned, discarded).
    pub static ref POOL_HANDLES: IntGaugeVec = register_int_gauge_vec!(
        "vdx_pool_handles",
        "Source pool counters",
        &["event"]
    ).unwrap();

    /// Compression ratio of binary replies since start.
    pub static ref COMPRESSION_RATIO: Gauge = register_gauge!(
        "vdx_compression_ratio",
        "Raw to compressed size ratio of binary replies"
    ).unwrap();

    /// Rows sent in binary replies.
    pub static ref ROWS_SENT_TOTAL: IntCounter = register_int_counter!(
        "vdx_rows_sent_total",
        "Matrix rows sent in binary replies"
    ).unwrap();
}

lazy_static! {
    /// Running compression totals behind the ratio gauge.
    static ref COMPRESSION_TOTALS: Mutex<CompressionMetrics> = Mutex::new(CompressionMetrics::new());
}

/// Outcome label of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `ok` reply
    Ok,
    /// `error` reply
    Error,
}

impl Outcome {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Error => "error",
        }
    }
}

/// Count a handled command.
pub fn record_command(command: &str, outcome: Outcome) {
    COMMANDS_TOTAL
        .with_label_values(&[command, outcome.as_str()])
        .inc();
}

/// Count a failure by kind.
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Add bytes written to a client.
pub fn add_bytes_sent(bytes: usize) {
    BYTES_SENT_TOTAL.inc_by(bytes as u64);
}

/// Track an accepted connection.
pub fn connection_opened() {
    ACTIVE_CONNECTIONS.inc();
}

/// Track a closed connection.
pub fn connection_closed() {
    ACTIVE_CONNECTIONS.dec();
}

/// Count a connection refused at the cap.
pub fn connection_rejected() {
    REJECTED_CONNECTIONS_TOTAL.inc();
}

/// Publish pool counters.
pub fn update_pool_metrics(stats: &PoolStats) {
    POOL_HANDLES.with_label_values(&["created"]).set(stats.created as i64);
    POOL_HANDLES.with_label_values(&["leased"]).set(stats.leased as i64);
    POOL_HANDLES.with_label_values(&["returned"]).set(stats.returned as i64);
    POOL_HANDLES.with_label_values(&["discarded"]).set(stats.discarded as i64);
}

/// Fold one encoder's statistics into the compression metrics.
pub fn record_compression(metrics: &CompressionMetrics) {
    ROWS_SENT_TOTAL.inc_by(metrics.row_count);
    let mut totals = COMPRESSION_TOTALS.lock().unwrap_or_else(|e| e.into_inner());
    totals.merge(metrics);
    COMPRESSION_RATIO.set(totals.compression_ratio());
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
