//! Metrics collection and export for Scribble.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use scribble_core::{ReapReport, RegistryStats};
use scribble_protocol::{Frame, FrameType};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "scribble_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "scribble_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "scribble_connections_rejected_total";
    pub const FRAMES_TOTAL: &str = "scribble_frames_total";
    pub const COMMITS_TOTAL: &str = "scribble_commits_total";
    pub const HISTORY_MOVES_TOTAL: &str = "scribble_history_moves_total";
    pub const DRAFT_FRAMES_TOTAL: &str = "scribble_draft_frames_total";
    pub const DRAFTS_RETRACTED_TOTAL: &str = "scribble_drafts_retracted_total";
    pub const ROOMS_ACTIVE: &str = "scribble_rooms_active";
    pub const ROOMS_EVICTED_TOTAL: &str = "scribble_rooms_evicted_total";
    pub const SHAPES_ACTIVE: &str = "scribble_shapes_active";
    pub const LATENCY_SECONDS: &str = "scribble_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "scribble_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused at the connection limit"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames processed, by direction");
    metrics::describe_counter!(names::COMMITS_TOTAL, "Commit requests received, by shape kind");
    metrics::describe_counter!(names::HISTORY_MOVES_TOTAL, "Undo and redo requests received");
    metrics::describe_counter!(names::DRAFT_FRAMES_TOTAL, "Draft frames received");
    metrics::describe_counter!(
        names::DRAFTS_RETRACTED_TOTAL,
        "Drafts retracted after their sender went quiet"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(names::ROOMS_EVICTED_TOTAL, "Rooms evicted after idling");
    metrics::describe_gauge!(names::SHAPES_ACTIVE, "Committed shapes held across rooms");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused at the limit.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record an inbound frame by type.
pub fn record_inbound(frame: &Frame) {
    counter!(names::FRAMES_TOTAL, "direction" => "inbound").increment(1);
    match frame {
        Frame::Commit { shape } => {
            counter!(names::COMMITS_TOTAL, "kind" => shape.kind().as_str()).increment(1);
        }
        _ => record_inbound_type(frame.frame_type()),
    }
}

fn record_inbound_type(frame_type: FrameType) {
    match frame_type {
        FrameType::Undo => counter!(names::HISTORY_MOVES_TOTAL, "kind" => "undo").increment(1),
        FrameType::Redo => counter!(names::HISTORY_MOVES_TOTAL, "kind" => "redo").increment(1),
        FrameType::DraftStart | FrameType::DraftUpdate | FrameType::DraftEnd => {
            counter!(names::DRAFT_FRAMES_TOTAL).increment(1);
        }
        _ => {}
    }
}

/// Record an outbound frame.
pub fn record_outbound(frame: &Frame) {
    counter!(names::FRAMES_TOTAL, "direction" => "outbound").increment(1);
    if let Frame::Error { code, .. } = frame {
        record_error(&format!("code_{code}"));
    }
}

/// Record inbound frame latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record the outcome of a maintenance pass.
pub fn record_reap(report: &ReapReport, stats: &RegistryStats) {
    counter!(names::DRAFTS_RETRACTED_TOTAL).increment(report.drafts_retracted as u64);
    counter!(names::ROOMS_EVICTED_TOTAL).increment(report.rooms_evicted.len() as u64);
    gauge!(names::ROOMS_ACTIVE).set(stats.room_count as f64);
    gauge!(names::SHAPES_ACTIVE).set(stats.shape_count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}
