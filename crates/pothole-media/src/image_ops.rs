//! Conversions between raw frames and `image` buffers.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};

use pothole_models::{Frame, PixelFormat};

use crate::error::{MediaError, MediaResult};

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Convert a frame into an RGB image buffer.
pub fn to_rgb_image(frame: &Frame) -> MediaResult<RgbImage> {
    frame.validate()?;

    let mut pixels = frame.pixels.clone();
    if frame.format == PixelFormat::Bgr24 {
        swap_red_blue(&mut pixels);
    }

    RgbImage::from_raw(frame.width, frame.height, pixels)
        .ok_or_else(|| MediaError::internal("Failed to create image buffer"))
}

/// Build a frame in `format` from an RGB image, keeping the capture time.
pub fn from_rgb_image(image: RgbImage, template: &Frame, format: PixelFormat) -> Frame {
    let (width, height) = image.dimensions();
    let mut pixels = image.into_raw();
    if format == PixelFormat::Bgr24 {
        swap_red_blue(&mut pixels);
    }
    Frame {
        pixels,
        width,
        height,
        format,
        captured_at: template.captured_at,
    }
}

/// Resize a frame to exactly `width`x`height`, keeping its pixel format.
pub fn resize_frame(frame: &Frame, width: u32, height: u32) -> MediaResult<Frame> {
    if width == 0 || height == 0 {
        return Err(MediaError::internal(format!(
            "cannot resize to {}x{}",
            width, height
        )));
    }
    if frame.dimensions() == (width, height) {
        frame.validate()?;
        return Ok(frame.clone());
    }

    let rgb = to_rgb_image(frame)?;
    let resized = imageops::resize(&rgb, width, height, FilterType::Triangle);
    Ok(from_rgb_image(resized, frame, frame.format))
}

/// Write a frame as a baseline JPEG.
pub fn write_jpeg(frame: &Frame, path: &Path, quality: u8) -> MediaResult<()> {
    let rgb = to_rgb_image(frame)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    Ok(())
}
