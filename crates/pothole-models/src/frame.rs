//! Captured frames.
//!
//! Frame producers hand out a [`FrameView`] that borrows their own (reused)
//! pixel buffer. The pipeline copies a view into an owned [`Frame`] only when
//! the frame has to outlive the producer callback, i.e. when it is buffered
//! for an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed 8-bit pixel layouts supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Bgr24,
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        3
    }

    /// Name FFmpeg uses for this layout (`-pix_fmt`).
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgb24 => "rgb24",
        }
    }
}

/// Reasons a frame cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

fn check_layout(width: u32, height: u32, format: PixelFormat, len: usize) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroSized { width, height });
    }
    let expected = width as usize * height as usize * format.bytes_per_pixel();
    if len != expected {
        return Err(FrameError::LengthMismatch {
            expected,
            actual: len,
        });
    }
    Ok(())
}

/// Borrowed view of a frame owned by the producer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at: DateTime<Utc>,
}

impl<'a> FrameView<'a> {
    pub fn new(
        pixels: &'a [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
            captured_at,
        }
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        check_layout(self.width, self.height, self.format, self.pixels.len())
    }

    /// Deep-copy the view into an owned frame, rejecting malformed views.
    pub fn to_owned_frame(&self) -> Result<Frame, FrameError> {
        self.validate()?;
        Ok(Frame {
            pixels: self.pixels.to_vec(),
            width: self.width,
            height: self.height,
            format: self.format,
            captured_at: self.captured_at,
        })
    }
}

/// Owned copy of a captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn validate(&self) -> Result<(), FrameError> {
        check_layout(self.width, self.height, self.format, self.pixels.len())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
            format: self.format,
            captured_at: self.captured_at,
        }
    }
}

/// A frame held in the event buffer together with its detection centers.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    pub frame: Frame,
    /// Vertical bbox centers of every detection on this frame, normalized.
    pub y_centers: Vec<f32>,
}

impl BufferedFrame {
    pub fn new(frame: Frame, y_centers: Vec<f32>) -> Self {
        Self { frame, y_centers }
    }
}
