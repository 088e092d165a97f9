//! Per-frame event processing on the real-time path.
//!
//! [`FramePipeline`] owns the window state machine and the ring buffer. It
//! never blocks on I/O: a closed event is detached from the buffer and handed
//! to an [`EventSink`], which must return immediately.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use pothole_media::{draw_detections, draw_gps_label};
use pothole_models::{BufferedFrame, Detection, EventId, FrameView};

use crate::config::PipelineConfig;
use crate::error::DispatchError;
use crate::gps::GpsTracker;
use crate::metrics;
use crate::ring_buffer::FrameRingBuffer;
use crate::window::{EventWindowTracker, WindowDecision};

/// A closed event, exclusively owned by whoever receives it.
#[derive(Debug)]
pub struct FinishedEvent {
    pub id: EventId,
    pub frames: Vec<BufferedFrame>,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Receiver of finished events. Must not block.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: FinishedEvent) -> Result<(), DispatchError>;
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No event in progress; the frame was dropped.
    Idle,
    /// A new event opened with this frame.
    Started,
    /// The frame was added to the open event.
    Buffered,
    /// The open event timed out on this frame.
    Closed { frames: usize, dispatched: bool },
    /// The frame was malformed and ignored for this tick.
    Skipped,
}

pub struct FramePipeline {
    trigger_class_id: u32,
    annotate_frames: bool,
    window: EventWindowTracker,
    buffer: Arc<FrameRingBuffer>,
    sink: Arc<dyn EventSink>,
    gps: GpsTracker,
    current_event: Option<EventId>,
}

impl FramePipeline {
    pub fn new(config: &PipelineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            trigger_class_id: config.trigger_class_id,
            annotate_frames: config.annotate_frames,
            window: EventWindowTracker::new(config.detection_timeout),
            buffer: Arc::new(FrameRingBuffer::new(config.frame_buffer_len)),
            sink,
            gps: GpsTracker::new(),
            current_event: None,
        }
    }

    /// Position source for the label drawn into annotated frames.
    pub fn with_gps(mut self, gps: GpsTracker) -> Self {
        self.gps = gps;
        self
    }

    /// Shared handle to the ring buffer, for memory reclamation.
    pub fn buffer(&self) -> Arc<FrameRingBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn is_recording(&self) -> bool {
        self.window.is_recording()
    }

    /// Process one frame and its detections.
    ///
    /// The frame's capture time drives the event timeout.
    pub fn process_frame(&mut self, view: &FrameView<'_>, detections: &[Detection]) -> FrameOutcome {
        if let Err(e) = view.validate() {
            debug!("Skipping malformed frame: {}", e);
            metrics::record_frame_skipped("invalid");
            return FrameOutcome::Skipped;
        }

        let now = view.captured_at;
        let trigger = Detection::any_of_class(detections, self.trigger_class_id);

        match self.window.observe(trigger, now) {
            WindowDecision::Ignore => FrameOutcome::Idle,
            WindowDecision::Start => {
                let id = EventId::new();
                info!(event_id = %id, "Pothole detected, event started");
                metrics::record_event_started();
                self.current_event = Some(id);
                self.buffer.clear();
                self.buffer_frame(view, detections);
                FrameOutcome::Started
            }
            WindowDecision::Continue => {
                self.buffer_frame(view, detections);
                FrameOutcome::Buffered
            }
            WindowDecision::End { started_at } => {
                let (frames, dispatched) = self.close(started_at, now);
                FrameOutcome::Closed { frames, dispatched }
            }
        }
    }

    /// Close an open event at end of stream or shutdown.
    ///
    /// Returns the number of frames handed off, if an event was open.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<usize> {
        let started_at = self.window.force_close()?;
        info!("Flushing open event at end of stream");
        Some(self.close(started_at, now).0)
    }

    fn buffer_frame(&mut self, view: &FrameView<'_>, detections: &[Detection]) {
        let mut frame = match view.to_owned_frame() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Skipping frame copy: {}", e);
                metrics::record_frame_skipped("copy");
                return;
            }
        };
        if self.annotate_frames {
            draw_detections(&mut frame, detections);
            draw_gps_label(&mut frame, &self.gps.snapshot());
        }

        let evicted = self
            .buffer
            .append(BufferedFrame::new(frame, Detection::y_centers(detections)));
        if evicted.is_some() {
            debug!("Event buffer full, dropped oldest frame");
        }
        metrics::record_frame_buffered(self.buffer.len());
    }

    fn close(&mut self, started_at: DateTime<Utc>, closed_at: DateTime<Utc>) -> (usize, bool) {
        let id = self.current_event.take().unwrap_or_default();
        let frames = self.buffer.snapshot_and_clear();
        let count = frames.len();
        metrics::record_event_closed(count);

        if frames.is_empty() {
            info!(event_id = %id, "Event ended with no frames, discarded");
            metrics::record_event_discarded("empty");
            return (0, false);
        }

        info!(
            event_id = %id,
            frames = count,
            duration_ms = closed_at.signed_duration_since(started_at).num_milliseconds(),
            "Detection ended, dispatching event"
        );

        let event = FinishedEvent {
            id: id.clone(),
            frames,
            started_at,
            closed_at,
        };
        match self.sink.submit(event) {
            Ok(()) => (count, true),
            Err(e) => {
                error!(event_id = %id, frames = count, "Event dropped: {}", e);
                let reason = match e {
                    DispatchError::QueueFull => "queue_full",
                    DispatchError::Closed => "closed",
                };
                metrics::record_event_dropped(reason);
                (count, false)
            }
        }
    }
}
