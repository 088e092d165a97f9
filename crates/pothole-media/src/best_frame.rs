//! Representative frame selection.
//!
//! The best frame is the one holding the detection whose vertical center is
//! closest to mid-frame. The scan is a single pass over every center of every
//! frame in buffer order, so the earliest candidate wins ties.

use pothole_models::BufferedFrame;

/// Normalized vertical target, the middle of the frame.
pub const DEFAULT_TARGET_Y: f32 = 0.5;

/// Result of a selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestFrameChoice {
    /// Index into the buffer
    pub index: usize,
    /// `|y_center - target|` of the winning detection, `None` on fallback
    pub distance: Option<f32>,
}

impl BestFrameChoice {
    /// True when no frame had a detection center and the first frame was used.
    pub fn is_fallback(&self) -> bool {
        self.distance.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BestFrameSelector {
    target_y: f32,
}

impl Default for BestFrameSelector {
    fn default() -> Self {
        Self {
            target_y: DEFAULT_TARGET_Y,
        }
    }
}

impl BestFrameSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the best frame. Returns `None` only for an empty buffer.
    pub fn select(&self, frames: &[BufferedFrame]) -> Option<BestFrameChoice> {
        if frames.is_empty() {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        for (index, frame) in frames.iter().enumerate() {
            for &y in &frame.y_centers {
                let distance = (y - self.target_y).abs();
                if distance.is_nan() {
                    continue;
                }
                // Strict comparison keeps the first occurrence on ties.
                match best {
                    Some((_, current)) if distance >= current => {}
                    _ => best = Some((index, distance)),
                }
            }
        }

        Some(match best {
            Some((index, distance)) => BestFrameChoice {
                index,
                distance: Some(distance),
            },
            None => BestFrameChoice {
                index: 0,
                distance: None,
            },
        })
    }

    /// Same as [`select`](Self::select) but returns the frame itself.
    pub fn select_frame<'a>(&self, frames: &'a [BufferedFrame]) -> Option<&'a BufferedFrame> {
        self.select(frames).map(|choice| &frames[choice.index])
    }
}
