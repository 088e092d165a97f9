//! The synchronous capture loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::error::SourceError;
use crate::pipeline::{FrameOutcome, FramePipeline};
use crate::source::{Detector, FrameSource, SourcePoll};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Counters for one run of the capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub empty_polls: u64,
    pub skipped: u64,
    pub detector_errors: u64,
    pub events_started: u64,
    pub events_closed: u64,
}

impl CaptureStats {
    fn record(&mut self, outcome: FrameOutcome) {
        match outcome {
            FrameOutcome::Started => self.events_started += 1,
            FrameOutcome::Closed { .. } => self.events_closed += 1,
            FrameOutcome::Skipped => self.skipped += 1,
            FrameOutcome::Idle | FrameOutcome::Buffered => {}
        }
    }
}

/// Pull frames until the source ends, fails or `shutdown` is set.
///
/// Any open event is flushed before returning, including on a source error.
/// Detector failures count as "no detections" for that frame.
pub fn run_capture(
    source: &mut dyn FrameSource,
    detector: &mut dyn Detector,
    pipeline: &mut FramePipeline,
    shutdown: &AtomicBool,
) -> Result<CaptureStats, SourceError> {
    let mut stats = CaptureStats::default();
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;

    let result = loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping capture");
            break Ok(());
        }

        let view = match source.next_frame() {
            Ok(SourcePoll::Frame(view)) => view,
            Ok(SourcePoll::Empty) => {
                stats.empty_polls += 1;
                continue;
            }
            Ok(SourcePoll::End) => {
                info!("Frame source ended");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let detections = match detector.detect(&view) {
            Ok(detections) => detections,
            Err(e) => {
                stats.detector_errors += 1;
                warn!("Detector failed, treating frame as empty: {}", e);
                Vec::new()
            }
        };

        stats.record(pipeline.process_frame(&view, &detections));
        stats.frames += 1;
        window_frames += 1;

        let elapsed = window_start.elapsed();
        if elapsed >= STATS_INTERVAL {
            info!(
                fps = window_frames as f64 / elapsed.as_secs_f64(),
                frames = stats.frames,
                skipped = stats.skipped,
                recording = pipeline.is_recording(),
                "Capture running"
            );
            window_start = Instant::now();
            window_frames = 0;
        }
    };

    if pipeline.finish(Utc::now()).is_some() {
        stats.events_closed += 1;
    }

    info!(
        frames = stats.frames,
        events = stats.events_closed,
        skipped = stats.skipped,
        "Capture stopped"
    );

    result.map(|()| stats)
}

/// Wait for the capture task. Once `stop` fires it gets at most `grace` to
/// finish; `None` means it was abandoned.
pub async fn await_capture<T>(
    capture: &mut JoinHandle<T>,
    stop: &Notify,
    grace: Duration,
) -> Option<Result<T, JoinError>> {
    tokio::select! {
        joined = &mut *capture => Some(joined),
        _ = stop.notified() => match tokio::time::timeout(grace, &mut *capture).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                error!("Capture did not stop within {:?}, abandoning it", grace);
                None
            }
        },
    }
}
