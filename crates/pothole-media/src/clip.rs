//! Local persistence of a finished event.
//!
//! A finished event becomes three files under `{output_dir}/{date}/`:
//! the clip, the best frame as JPEG and the JSON sidecar. Each artifact is
//! written independently, so a failed encode still leaves the image and the
//! sidecar on disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pothole_models::encoding::{DEFAULT_ARTIFACT_PREFIX, DEFAULT_JPEG_QUALITY, DEFAULT_OUTPUT_FPS};
use pothole_models::{ArtifactKind, BufferedFrame, EventKey, EventMetadata, Frame, GpsFix, PixelFormat};

use crate::best_frame::BestFrameSelector;
use crate::encoder::{VideoEncoder, VideoSpec};
use crate::error::{MediaError, MediaResult};
use crate::image_ops::{from_rgb_image, resize_frame, to_rgb_image, write_jpeg};

/// Settings for local artifact persistence.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Root directory; artifacts land in a per-date subdirectory
    pub output_dir: PathBuf,
    /// File-name prefix shared by all artifacts
    pub prefix: String,
    /// Output clip frame rate
    pub fps: u32,
    /// Best-frame JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("cached_clips"),
            prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            fps: DEFAULT_OUTPUT_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Hands out strictly increasing epoch-second identifiers.
///
/// Two events closing within the same second get `ts` and `ts + 1`.
#[derive(Debug, Default)]
pub struct KeyAllocator {
    last: AtomicI64,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now: i64) -> i64 {
        let step = |last: i64| now.max(last.saturating_add(1));
        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(step(last)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }
}

/// A file written to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Object key the file is uploaded under
    pub remote_key: String,
}

/// An artifact that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub kind: ArtifactKind,
    pub error: String,
}

/// Files produced for one event.
#[derive(Debug, Clone)]
pub struct PersistedArtifacts {
    pub key: EventKey,
    pub dir: PathBuf,
    /// Frames written to the clip
    pub frame_count: usize,
    /// Frames dropped because they were corrupt or could not be resized
    pub skipped_frames: usize,
    /// Index of the best frame among the written frames
    pub best_frame_index: usize,
    pub created: Vec<LocalArtifact>,
    pub failures: Vec<ArtifactFailure>,
}

impl PersistedArtifacts {
    pub fn created_kinds(&self) -> Vec<ArtifactKind> {
        self.created.iter().map(|a| a.kind).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of persisting a snapshot.
#[derive(Debug, Clone)]
pub enum PersistOutcome {
    /// Nothing survived validation; no file was created.
    NoValidFrames { skipped_frames: usize },
    Persisted(PersistedArtifacts),
}

/// Writes finished events to local storage.
pub struct ClipPersister<E> {
    config: PersistConfig,
    encoder: E,
    selector: BestFrameSelector,
    keys: KeyAllocator,
}

impl<E: VideoEncoder> ClipPersister<E> {
    pub fn new(config: PersistConfig, encoder: E) -> Self {
        Self {
            config,
            encoder,
            selector: BestFrameSelector::new(),
            keys: KeyAllocator::new(),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Persist a finished event snapshot.
    ///
    /// `closed_at` determines the artifact identifier and the date directory.
    /// An error is returned only when the date directory cannot be created;
    /// individual artifact failures are reported in the outcome.
    pub async fn persist(
        &self,
        frames: Vec<BufferedFrame>,
        gps: &GpsFix,
        closed_at: DateTime<Utc>,
    ) -> MediaResult<PersistOutcome> {
        let received = frames.len();
        let (frames, skipped_frames) = tokio::task::spawn_blocking(move || normalize_frames(frames))
            .await
            .map_err(|e| MediaError::internal(format!("Frame normalization panicked: {}", e)))?;

        if frames.is_empty() {
            warn!(
                received,
                skipped = skipped_frames,
                "No valid frames in event, nothing persisted"
            );
            return Ok(PersistOutcome::NoValidFrames { skipped_frames });
        }
        if skipped_frames > 0 {
            warn!(skipped = skipped_frames, "Skipped unusable frames in event");
        }

        let choice = self
            .selector
            .select(&frames)
            .ok_or_else(|| MediaError::internal("Best frame selection on empty buffer"))?;
        if choice.is_fallback() {
            debug!("No detection centers in event, using first frame as best frame");
        }

        let ts = self.keys.next(closed_at.timestamp());
        let key = EventKey::new(self.config.prefix.clone(), ts, closed_at.date_naive());
        let dir = self.config.output_dir.join(key.date_dir());
        tokio::fs::create_dir_all(&dir).await?;

        let mut created = Vec::with_capacity(ArtifactKind::ALL.len());
        let mut failures = Vec::new();
        let frame_count = frames.len();

        for kind in ArtifactKind::ALL {
            let path = dir.join(key.filename(kind));
            let result = match kind {
                ArtifactKind::Video => self.write_video(&path, &frames).await,
                ArtifactKind::BestFrame => {
                    self.write_best_frame(&path, &frames[choice.index].frame).await
                }
                ArtifactKind::Metadata => {
                    let metadata = EventMetadata::new(ts, gps, frame_count, self.config.fps);
                    write_metadata(&path, &metadata).await
                }
            };

            match result {
                Ok(()) => {
                    debug!(kind = %kind, path = %path.display(), "Artifact written");
                    created.push(LocalArtifact {
                        kind,
                        path,
                        remote_key: key.remote_key(kind),
                    });
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to write artifact");
                    failures.push(ArtifactFailure {
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            key = %key.stem(),
            frames = frame_count,
            created = created.len(),
            failed = failures.len(),
            "Persisted event artifacts to {}",
            dir.display()
        );

        Ok(PersistOutcome::Persisted(PersistedArtifacts {
            key,
            dir,
            frame_count,
            skipped_frames,
            best_frame_index: choice.index,
            created,
            failures,
        }))
    }

    async fn write_video(&self, path: &Path, frames: &[BufferedFrame]) -> MediaResult<()> {
        let first = &frames[0].frame;
        let spec = VideoSpec {
            width: first.width,
            height: first.height,
            fps: self.config.fps,
            format: first.format,
        };
        let refs: Vec<&Frame> = frames.iter().map(|f| &f.frame).collect();

        let result = self.encoder.encode(path, spec, &refs).await;
        if result.is_err() && tokio::fs::try_exists(path).await.unwrap_or(false) {
            // A half-written container is worse than none.
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to remove partial clip {}: {}", path.display(), e);
            }
        }
        result
    }

    async fn write_best_frame(&self, path: &Path, frame: &Frame) -> MediaResult<()> {
        let frame = frame.clone();
        let path = path.to_path_buf();
        let quality = self.config.jpeg_quality;
        tokio::task::spawn_blocking(move || write_jpeg(&frame, &path, quality))
            .await
            .map_err(|e| MediaError::internal(format!("JPEG writer panicked: {}", e)))?
    }
}

async fn write_metadata(path: &Path, metadata: &EventMetadata) -> MediaResult<()> {
    let json = serde_json::to_vec_pretty(metadata)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

/// Drop corrupt frames and bring the rest to the geometry of the first valid one.
///
/// Returns the surviving frames in order and the number skipped.
pub fn normalize_frames(frames: Vec<BufferedFrame>) -> (Vec<BufferedFrame>, usize) {
    let mut target: Option<(u32, u32, PixelFormat)> = None;
    let mut kept = Vec::with_capacity(frames.len());
    let mut skipped = 0;

    for buffered in frames {
        if let Err(e) = buffered.frame.validate() {
            debug!("Skipping invalid frame: {}", e);
            skipped += 1;
            continue;
        }

        let (width, height, format) = *target.get_or_insert((
            buffered.frame.width,
            buffered.frame.height,
            buffered.frame.format,
        ));

        match conform(&buffered.frame, width, height, format) {
            Ok(None) => kept.push(buffered),
            Ok(Some(frame)) => kept.push(BufferedFrame::new(frame, buffered.y_centers)),
            Err(e) => {
                debug!("Skipping frame that could not be resized: {}", e);
                skipped += 1;
            }
        }
    }

    (kept, skipped)
}

/// Returns `None` when the frame already matches.
fn conform(frame: &Frame, width: u32, height: u32, format: PixelFormat) -> MediaResult<Option<Frame>> {
    if frame.dimensions() == (width, height) && frame.format == format {
        return Ok(None);
    }
    let resized = resize_frame(frame, width, height)?;
    if resized.format == format {
        return Ok(Some(resized));
    }
    let rgb = to_rgb_image(&resized)?;
    Ok(Some(from_rgb_image(rgb, &resized, format)))
}
