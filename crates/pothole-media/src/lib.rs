//! Media handling for finished pothole events.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a stdin-fed runner
//! - The [`VideoEncoder`] seam with an FFmpeg implementation
//! - Raw frame conversion, resizing and JPEG output
//! - Detection box and GPS label overlay
//! - Best-frame selection
//! - Local persistence of clip, best frame and sidecar metadata

pub mod best_frame;
pub mod clip;
pub mod command;
pub mod encoder;
pub mod error;
pub mod image_ops;
pub mod overlay;

pub use best_frame::{BestFrameChoice, BestFrameSelector};
pub use clip::{
    ArtifactFailure, ClipPersister, KeyAllocator, LocalArtifact, PersistConfig, PersistOutcome,
    PersistedArtifacts,
};
pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use encoder::{FfmpegVideoEncoder, VideoEncoder, VideoSpec};
pub use error::{MediaError, MediaResult};
pub use overlay::{draw_detections, draw_gps_label, gps_label};
