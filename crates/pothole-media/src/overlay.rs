//! Detection boxes and the GPS label drawn into buffered frames.

use pothole_models::{Detection, Frame, GpsFix, PixelFormat};

/// Outline color, identical in BGR and RGB.
const BOX_COLOR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: u32 = 2;

/// Cyan label text, in BGR order.
const LABEL_COLOR_BGR: [u8; 3] = [255, 255, 0];
/// Left edge and baseline offset from the bottom of the frame.
const LABEL_MARGIN: i64 = 10;
const GLYPH_WIDTH: i64 = 5;
const GLYPH_HEIGHT: i64 = 7;
const GLYPH_ADVANCE: i64 = GLYPH_WIDTH + 1;

/// Draw an outline around every detection, in place.
///
/// Frames that fail validation are left untouched.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) {
    if detections.is_empty() || !frame.is_valid() {
        return;
    }
    for det in detections {
        let (x0, y0, x1, y1) = det.bbox.to_pixels(frame.width, frame.height);
        draw_rect(frame, x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1));
    }
}

/// Text of the position label: six decimals, or a notice without a fix.
pub fn gps_label(fix: &GpsFix) -> String {
    match (fix.lat, fix.lon) {
        (Some(lat), Some(lon)) => format!("LAT:{:.6} LON:{:.6}", lat, lon),
        _ => "GPS UNAVAILABLE".to_string(),
    }
}

/// Write the current position into the bottom-left corner, in place.
///
/// Frames that fail validation are left untouched.
pub fn draw_gps_label(frame: &mut Frame, fix: &GpsFix) {
    if !frame.is_valid() {
        return;
    }
    let color = match frame.format {
        PixelFormat::Bgr24 => LABEL_COLOR_BGR,
        PixelFormat::Rgb24 => [LABEL_COLOR_BGR[2], LABEL_COLOR_BGR[1], LABEL_COLOR_BGR[0]],
    };
    let top = frame.height as i64 - LABEL_MARGIN - GLYPH_HEIGHT;

    for (i, ch) in gps_label(fix).chars().enumerate() {
        let left = LABEL_MARGIN + i as i64 * GLYPH_ADVANCE;
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    put_color(frame, left + col, top + row as i64, color);
                }
            }
        }
    }
}

/// 5x7 bitmap rows, most significant bit on the left.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        ' ' => [0; 7],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

fn put_color(frame: &mut Frame, x: i64, y: i64, color: [u8; 3]) {
    if x < 0 || y < 0 || x >= frame.width as i64 || y >= frame.height as i64 {
        return;
    }
    let bpp = frame.format.bytes_per_pixel();
    let offset = (y as usize * frame.width as usize + x as usize) * bpp;
    frame.pixels[offset..offset + bpp].copy_from_slice(&color);
}

fn draw_rect(frame: &mut Frame, x0: u32, y0: u32, x1: u32, y1: u32) {
    for t in 0..BOX_THICKNESS {
        let top = (y0 + t).min(y1);
        let bottom = y1.saturating_sub(t).max(y0);
        let left = (x0 + t).min(x1);
        let right = x1.saturating_sub(t).max(x0);

        for x in x0..=x1 {
            put_pixel(frame, x, top);
            put_pixel(frame, x, bottom);
        }
        for y in y0..=y1 {
            put_pixel(frame, left, y);
            put_pixel(frame, right, y);
        }
    }
}

fn put_pixel(frame: &mut Frame, x: u32, y: u32) {
    put_color(frame, x as i64, y as i64, BOX_COLOR);
}
