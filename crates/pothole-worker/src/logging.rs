//! Structured event logging.
//!
//! Every finished event is logged with the same `event_id` and `operation`
//! fields so its persistence and upload can be followed across workers.

use tracing::{info, warn, Span};

use pothole_models::EventId;

/// Logger for one finished event.
#[derive(Debug, Clone)]
pub struct EventLogger {
    event_id: String,
    operation: String,
}

impl EventLogger {
    pub fn new(event_id: &EventId, operation: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            event_id = %self.event_id,
            operation = %self.operation,
            "Event started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            event_id = %self.event_id,
            operation = %self.operation,
            "Event progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            event_id = %self.event_id,
            operation = %self.operation,
            "Event warning: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            event_id = %self.event_id,
            operation = %self.operation,
            "Event completed: {}", message
        );
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the event fields, for work spread over several awaits.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "event",
            event_id = %self.event_id,
            operation = %self.operation
        )
    }
}
