//! Shared data models for the pothole event pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Per-frame detections and bounding boxes
//! - Captured frames (borrowed views and owned copies)
//! - GPS fixes
//! - Event identifiers, artifact keys and the sidecar metadata record
//! - Encoding defaults

pub mod detection;
pub mod encoding;
pub mod event;
pub mod frame;
pub mod gps;

// Re-export common types
pub use detection::{BoundingBox, Detection, POTHOLE_CLASS_ID};
pub use encoding::{DEFAULT_OUTPUT_FPS, DEFAULT_JPEG_QUALITY};
pub use event::{ArtifactKind, EventId, EventKey, EventMetadata, GpsCoordinates};
pub use frame::{BufferedFrame, Frame, FrameError, FrameView, PixelFormat};
pub use gps::GpsFix;
