//! Output encoding defaults.

/// Frame rate the event clips are written at.
pub const DEFAULT_OUTPUT_FPS: u32 = 30;
/// Quality used for the best-frame JPEG.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Video codec and container for clips (MPEG-4 Part 2 tagged as XVID in AVI).
pub const CLIP_VIDEO_CODEC: &str = "mpeg4";
pub const CLIP_VIDEO_TAG: &str = "xvid";
pub const CLIP_QSCALE: u8 = 5;
pub const CLIP_EXTENSION: &str = "avi";

pub const BEST_FRAME_SUFFIX: &str = "_best";
pub const BEST_FRAME_EXTENSION: &str = "jpg";
pub const METADATA_EXTENSION: &str = "json";

/// Default prefix for artifact file names.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "pothole";
