//! Detection records produced by the external detector.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Class id the detector assigns to potholes.
pub const POTHOLE_CLASS_ID: u32 = 1;

/// Axis-aligned box in normalized `[0, 1]` image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Vertical midpoint of the box, normalized.
    pub fn y_center(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// Convert to pixel coordinates `(x0, y0, x1, y1)` clamped to the frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: f32, max: u32| -> u32 {
            let max_f = max.saturating_sub(1) as f32;
            (v * max as f32).round().clamp(0.0, max_f) as u32
        };
        (
            clamp(self.xmin, width),
            clamp(self.ymin, height),
            clamp(self.xmax, width),
            clamp(self.ymax, height),
        )
    }
}

/// A single detection on a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Detector class id
    pub class_id: u32,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Normalized bounding box
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    /// Returns true if any detection carries the given class id.
    pub fn any_of_class(detections: &[Detection], class_id: u32) -> bool {
        detections.iter().any(|d| d.class_id == class_id)
    }

    /// Vertical bbox centers of every detection, in detection order.
    pub fn y_centers(detections: &[Detection]) -> Vec<f32> {
        detections.iter().map(|d| d.bbox.y_center()).collect()
    }
}
