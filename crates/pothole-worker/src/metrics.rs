//! Prometheus metrics for the capture and persistence path.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use pothole_models::ArtifactKind;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Without an installed recorder every call below is a no-op.
pub fn install_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

/// Metric names as constants for consistency.
pub mod names {
    // Event lifecycle
    pub const EVENTS_STARTED_TOTAL: &str = "pothole_events_started_total";
    pub const EVENTS_CLOSED_TOTAL: &str = "pothole_events_closed_total";
    pub const EVENTS_DISCARDED_TOTAL: &str = "pothole_events_discarded_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "pothole_events_dropped_total";
    pub const EVENTS_FAILED_TOTAL: &str = "pothole_events_failed_total";
    pub const EVENT_FRAMES: &str = "pothole_event_frames";

    // Frames
    pub const FRAMES_BUFFERED_TOTAL: &str = "pothole_frames_buffered_total";
    pub const FRAMES_SKIPPED_TOTAL: &str = "pothole_frames_skipped_total";
    pub const RING_BUFFER_LENGTH: &str = "pothole_ring_buffer_length";

    // Artifacts
    pub const ARTIFACTS_PERSISTED_TOTAL: &str = "pothole_artifacts_persisted_total";
    pub const ARTIFACTS_FAILED_TOTAL: &str = "pothole_artifacts_failed_total";
    pub const UPLOADS_TOTAL: &str = "pothole_uploads_total";

    // Process
    pub const PROCESS_RSS_BYTES: &str = "pothole_process_rss_bytes";
    pub const MEMORY_RECLAIMS_TOTAL: &str = "pothole_memory_reclaims_total";
}

pub fn record_event_started() {
    counter!(names::EVENTS_STARTED_TOTAL).increment(1);
}

pub fn record_event_closed(frames: usize) {
    counter!(names::EVENTS_CLOSED_TOTAL).increment(1);
    histogram!(names::EVENT_FRAMES).record(frames as f64);
    gauge!(names::RING_BUFFER_LENGTH).set(0.0);
}

/// Event closed with an empty buffer, or nothing survived validation.
pub fn record_event_discarded(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::EVENTS_DISCARDED_TOTAL, &labels).increment(1);
}

/// Event lost because it could not be handed to a persistence worker.
pub fn record_event_dropped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::EVENTS_DROPPED_TOTAL, &labels).increment(1);
}

/// Persistence task returned an error or panicked.
pub fn record_event_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::EVENTS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_frame_buffered(buffer_len: usize) {
    counter!(names::FRAMES_BUFFERED_TOTAL).increment(1);
    gauge!(names::RING_BUFFER_LENGTH).set(buffer_len as f64);
}

pub fn record_frame_skipped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::FRAMES_SKIPPED_TOTAL, &labels).increment(1);
}

pub fn record_artifact_persisted(kind: ArtifactKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::ARTIFACTS_PERSISTED_TOTAL, &labels).increment(1);
}

pub fn record_artifact_failed(kind: ArtifactKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::ARTIFACTS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_upload(kind: ArtifactKind, result: &str) {
    let labels = [
        ("kind", kind.as_str().to_string()),
        ("result", result.to_string()),
    ];
    counter!(names::UPLOADS_TOTAL, &labels).increment(1);
}

pub fn set_process_rss(bytes: u64) {
    gauge!(names::PROCESS_RSS_BYTES).set(bytes as f64);
}

pub fn record_memory_reclaim() {
    counter!(names::MEMORY_RECLAIMS_TOTAL).increment(1);
}
