//! Real-time pothole event worker.
//!
//! This crate provides:
//! - The capture loop and frame/detection sources
//! - Event windowing over a bounded frame buffer
//! - Background persistence and upload of finished events
//! - GPS tracking, memory governance and metrics

pub mod capture;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gps;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod ring_buffer;
pub mod source;
pub mod window;

pub use capture::{await_capture, run_capture, CaptureStats};
pub use config::PipelineConfig;
pub use dispatcher::{Dispatcher, EventProcessor, EventReport, PersistenceWorkers};
pub use error::{DetectError, DispatchError, SourceError, WorkerError, WorkerResult};
pub use gps::GpsTracker;
pub use logging::EventLogger;
pub use memory::{MemoryGovernor, MemorySampler, Reclaim, SysinfoSampler};
pub use pipeline::{EventSink, FinishedEvent, FrameOutcome, FramePipeline};
pub use ring_buffer::FrameRingBuffer;
pub use source::{
    CaptureOptions, Detector, FfmpegFrameSource, FrameSource, JsonlDetector, SourcePoll, SourceStopper,
};
pub use window::{EventWindowTracker, WindowDecision, WindowState};
