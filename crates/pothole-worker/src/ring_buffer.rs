//! Capped frame buffer for the in-progress event.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use pothole_models::BufferedFrame;

use crate::memory::Reclaim;

/// Drop-oldest frame buffer.
///
/// The capture path is the only writer. The lock makes snapshots atomic with
/// respect to appends and lets the memory governor trim the buffer from
/// another thread.
#[derive(Debug)]
pub struct FrameRingBuffer {
    frames: Mutex<VecDeque<BufferedFrame>>,
    cap: usize,
}

impl FrameRingBuffer {
    /// Create a buffer holding at most `cap` frames (at least one).
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BufferedFrame>> {
        self.frames.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Append a frame, evicting the oldest one when full.
    ///
    /// Returns the evicted frame, if any.
    pub fn append(&self, frame: BufferedFrame) -> Option<BufferedFrame> {
        let mut frames = self.lock();
        let evicted = if frames.len() >= self.cap {
            frames.pop_front()
        } else {
            None
        };
        frames.push_back(frame);
        evicted
    }

    /// Take every buffered frame in arrival order, leaving the buffer empty.
    pub fn snapshot_and_clear(&self) -> Vec<BufferedFrame> {
        let mut frames = self.lock();
        frames.drain(..).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Reclaim for FrameRingBuffer {
    fn name(&self) -> &str {
        "frame_ring_buffer"
    }

    /// Drop the oldest frames until at most half the cap remains, then
    /// release spare slots. The newest frames are kept.
    ///
    /// Returns the number of pixel bytes freed.
    fn reclaim(&self) -> usize {
        let keep = (self.cap / 2).max(1);
        let mut frames = self.lock();
        let excess = frames.len().saturating_sub(keep);
        let freed = frames
            .drain(..excess)
            .map(|f| f.frame.pixels.len())
            .sum();
        frames.shrink_to_fit();
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pothole_models::{Frame, PixelFormat};

    fn tagged(tag: u8) -> BufferedFrame {
        BufferedFrame::new(
            Frame {
                pixels: vec![tag; 3],
                width: 1,
                height: 1,
                format: PixelFormat::Bgr24,
                captured_at: Utc::now(),
            },
            vec![],
        )
    }

    fn tags(frames: &[BufferedFrame]) -> Vec<u8> {
        frames.iter().map(|f| f.frame.pixels[0]).collect()
    }

    #[test]
    fn test_cap_keeps_most_recent() {
        let buffer = FrameRingBuffer::new(4);
        for tag in 0..10 {
            buffer.append(tagged(tag));
            assert!(buffer.len() <= 4);
        }
        assert_eq!(tags(&buffer.snapshot_and_clear()), vec![6, 7, 8, 9]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_append_reports_eviction() {
        let buffer = FrameRingBuffer::new(1);
        assert!(buffer.append(tagged(1)).is_none());
        let evicted = buffer.append(tagged(2)).unwrap();
        assert_eq!(evicted.frame.pixels[0], 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let buffer = FrameRingBuffer::new(8);
        buffer.append(tagged(1));
        buffer.append(tagged(2));
        let snapshot = buffer.snapshot_and_clear();
        buffer.append(tagged(3));
        assert_eq!(tags(&snapshot), vec![1, 2]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let buffer = FrameRingBuffer::new(0);
        buffer.append(tagged(1));
        buffer.append(tagged(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(tags(&buffer.snapshot_and_clear()), vec![2]);
    }

    #[test]
    fn test_reclaim_trims_full_buffer_to_newest_half() {
        let buffer = FrameRingBuffer::new(8);
        for tag in 0..8 {
            buffer.append(tagged(tag));
        }

        let freed = buffer.reclaim();

        assert_eq!(freed, 4 * 3);
        assert_eq!(buffer.len(), 4);
        assert_eq!(tags(&buffer.snapshot_and_clear()), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_reclaim_leaves_short_buffer_alone() {
        let buffer = FrameRingBuffer::new(64);
        buffer.append(tagged(5));
        assert_eq!(buffer.reclaim(), 0);
        assert_eq!(buffer.len(), 1);
    }
}
