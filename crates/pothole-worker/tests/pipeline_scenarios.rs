//! End-to-end scenarios from frames in to artifacts uploaded.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::mpsc;

use pothole_media::{ClipPersister, MediaError, MediaResult, PersistOutcome, VideoEncoder, VideoSpec};
use pothole_models::{ArtifactKind, BoundingBox, Detection, EventMetadata, Frame, FrameView, GpsFix, PixelFormat};
use pothole_storage::{ObjectStore, StorageError, StorageResult, UploadStatus, UploadWorker};
use pothole_worker::{
    EventProcessor, EventReport, FramePipeline, GpsTracker, PersistenceWorkers, PipelineConfig,
};

const WIDTH: u32 = 8;
const HEIGHT: u32 = 6;

struct FileEncoder;

#[async_trait]
impl VideoEncoder for FileEncoder {
    async fn encode(&self, output: &Path, _spec: VideoSpec, frames: &[&Frame]) -> MediaResult<()> {
        tokio::fs::write(output, format!("{} frames", frames.len())).await?;
        Ok(())
    }
}

struct BrokenEncoder;

#[async_trait]
impl VideoEncoder for BrokenEncoder {
    async fn encode(&self, _output: &Path, _spec: VideoSpec, _frames: &[&Frame]) -> MediaResult<()> {
        Err(MediaError::encode_failed("codec unavailable"))
    }
}

/// Records uploaded keys and rejects keys ending in `fail_suffix`.
#[derive(Default)]
struct MemoryStore {
    fail_suffix: Option<String>,
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_file(&self, _path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        if let Some(suffix) = &self.fail_suffix {
            if key.ends_with(suffix.as_str()) {
                return Err(StorageError::upload_failed("bucket rejected object"));
            }
        }
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    output: std::path::PathBuf,
    pipeline: FramePipeline,
    workers: PersistenceWorkers,
    reports: mpsc::UnboundedReceiver<EventReport>,
    gps: GpsTracker,
}

impl Harness {
    fn new(encoder: Box<dyn VideoEncoder>, store: Option<Arc<MemoryStore>>) -> Self {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig {
            output_base_dir: dir.path().to_path_buf(),
            persist_workers: 1,
            persist_queue_depth: 8,
            ..Default::default()
        };
        let gps = GpsTracker::new();
        let uploader = store.map(|s| UploadWorker::new(s as Arc<dyn ObjectStore>));
        let processor = Arc::new(EventProcessor::new(
            ClipPersister::new(config.persist_config(), encoder),
            uploader,
            gps.clone(),
        ));
        let (tx, reports) = mpsc::unbounded_channel();
        let workers = PersistenceWorkers::spawn_reporting(processor, 1, 8, tx);
        let pipeline =
            FramePipeline::new(&config, Arc::new(workers.dispatcher())).with_gps(gps.clone());

        Self {
            output: dir.path().to_path_buf(),
            _dir: dir,
            pipeline,
            workers,
            reports,
            gps,
        }
    }

    fn feed(&mut self, at: DateTime<Utc>, pothole: bool) {
        self.feed_centered(at, pothole.then_some(0.5));
    }

    /// Feed one frame, with a pothole centered at `y_center` if given.
    fn feed_centered(&mut self, at: DateTime<Utc>, y_center: Option<f32>) {
        let pixels = vec![90u8; (WIDTH * HEIGHT * 3) as usize];
        let view = FrameView::new(&pixels, WIDTH, HEIGHT, PixelFormat::Bgr24, at);
        let detections: Vec<Detection> = y_center
            .map(|y| Detection::new(1, 0.8, BoundingBox::new(0.2, y - 0.2, 0.6, y + 0.2)))
            .into_iter()
            .collect();
        self.pipeline.process_frame(&view, &detections);
    }

    async fn finish(mut self) -> (Vec<EventReport>, std::path::PathBuf, TempDir) {
        self.pipeline.finish(Utc::now());
        drop(self.pipeline);
        assert!(self.workers.shutdown(Duration::from_secs(10)).await);

        let mut reports = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            reports.push(report);
        }
        (reports, self.output, self._dir)
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 2, 1, 9, 17).unwrap()
}

fn ms(offset: i64) -> DateTime<Utc> {
    base() + chrono::Duration::milliseconds(offset)
}

#[tokio::test]
async fn test_burst_then_gap_produces_one_clip() {
    let mut harness = Harness::new(Box::new(FileEncoder), None);
    harness.gps.update(GpsFix::new(52.2, 0.12, "$GPGGA"));

    for i in 0..10 {
        harness.feed(ms(i * 33), true);
    }
    // Quiet frame past the timeout closes the event.
    harness.feed(ms(5_000), false);
    assert!(!harness.pipeline.is_recording());

    let (reports, output, _dir) = harness.finish().await;
    assert_eq!(reports.len(), 1);

    let PersistOutcome::Persisted(artifacts) = &reports[0].persist else {
        panic!("event was not persisted");
    };
    assert_eq!(artifacts.frame_count, 10);
    assert!(artifacts.is_complete());
    assert_eq!(artifacts.key.ts, ms(5_000).timestamp());
    assert_eq!(artifacts.dir, output.join("2025-05-02"));

    let meta_path = artifacts.dir.join(artifacts.key.filename(ArtifactKind::Metadata));
    let meta: EventMetadata = serde_json::from_slice(&std::fs::read(meta_path).unwrap()).unwrap();
    assert_eq!(meta.frame_count, 10);
    assert_eq!(meta.gps.lat, Some(52.2));
    assert!(reports[0].uploads.is_none());
}

#[tokio::test]
async fn test_two_bursts_produce_two_events() {
    let mut harness = Harness::new(Box::new(FileEncoder), None);

    for i in 0..5 {
        harness.feed(ms(i * 33), true);
    }
    // Closes the first event and is consumed by the close.
    harness.feed(ms(5_000), true);
    for i in 1..4 {
        harness.feed(ms(5_000 + i * 33), true);
    }

    let (reports, _output, _dir) = harness.finish().await;
    assert_eq!(reports.len(), 2);

    let mut counts: Vec<usize> = reports
        .iter()
        .map(|r| match &r.persist {
            PersistOutcome::Persisted(a) => a.frame_count,
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    counts.sort();
    assert_eq!(counts, vec![3, 5]);

    let mut keys: Vec<i64> = reports
        .iter()
        .filter_map(|r| match &r.persist {
            PersistOutcome::Persisted(a) => Some(a.key.ts),
            _ => None,
        })
        .collect();
    keys.dedup();
    assert_eq!(keys.len(), 2);
}

#[tokio::test]
async fn test_failed_upload_does_not_block_others() {
    let store = Arc::new(MemoryStore {
        fail_suffix: Some(".avi".to_string()),
        ..Default::default()
    });
    let mut harness = Harness::new(Box::new(FileEncoder), Some(Arc::clone(&store)));

    for i in 0..4 {
        harness.feed(ms(i * 33), true);
    }
    harness.feed(ms(4_000), false);

    let (reports, _output, _dir) = harness.finish().await;
    let uploads = reports[0].uploads.as_ref().unwrap();

    assert!(matches!(
        uploads.status_of(ArtifactKind::Video),
        Some(UploadStatus::Failed { .. })
    ));
    assert!(matches!(
        uploads.status_of(ArtifactKind::BestFrame),
        Some(UploadStatus::Uploaded { .. })
    ));
    assert!(matches!(
        uploads.status_of(ArtifactKind::Metadata),
        Some(UploadStatus::Uploaded { .. })
    ));

    let keys = store.keys.lock().unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with("2025-05-02/pothole_")));
}

#[tokio::test]
async fn test_encoder_failure_keeps_other_artifacts() {
    let store = Arc::new(MemoryStore::default());
    let mut harness = Harness::new(Box::new(BrokenEncoder), Some(Arc::clone(&store)));

    for i in 0..3 {
        harness.feed(ms(i * 33), true);
    }

    let (reports, _output, _dir) = harness.finish().await;
    let PersistOutcome::Persisted(artifacts) = &reports[0].persist else {
        panic!("event was not persisted");
    };

    assert_eq!(
        artifacts.created_kinds(),
        vec![ArtifactKind::BestFrame, ArtifactKind::Metadata]
    );
    assert_eq!(artifacts.failures.len(), 1);
    assert!(!artifacts
        .dir
        .join(artifacts.key.filename(ArtifactKind::Video))
        .exists());
    assert_eq!(store.keys.lock().unwrap().len(), 2);
}

/// Frames 1-5 and 9 carry potholes, 6-8 and 10 are empty.
fn ten_frame_sequence() -> [Option<f32>; 10] {
    [
        Some(0.45),
        Some(0.52),
        Some(0.5),
        Some(0.48),
        Some(0.55),
        None,
        None,
        None,
        Some(0.6),
        None,
    ]
}

#[tokio::test]
async fn test_gap_frames_within_timeout_stay_in_one_event() {
    let mut harness = Harness::new(Box::new(FileEncoder), None);

    for (i, y_center) in ten_frame_sequence().into_iter().enumerate() {
        harness.feed_centered(ms(i as i64 * 100), y_center);
    }

    let (reports, _output, _dir) = harness.finish().await;
    assert_eq!(reports.len(), 1);
    let PersistOutcome::Persisted(artifacts) = &reports[0].persist else {
        panic!("event was not persisted");
    };
    assert_eq!(artifacts.frame_count, 10);
    assert_eq!(artifacts.best_frame_index, 2);

    let meta_path = artifacts.dir.join(artifacts.key.filename(ArtifactKind::Metadata));
    let meta: EventMetadata = serde_json::from_slice(&std::fs::read(meta_path).unwrap()).unwrap();
    assert_eq!(meta.frame_count, 10);
}

#[tokio::test]
async fn test_long_gap_splits_sequence_into_two_events() {
    let mut harness = Harness::new(Box::new(FileEncoder), None);

    for (i, y_center) in ten_frame_sequence().into_iter().enumerate() {
        let offset = if i < 5 { i as i64 * 100 } else { 5_000 + i as i64 * 100 };
        harness.feed_centered(ms(offset), y_center);
    }

    let (reports, _output, _dir) = harness.finish().await;
    let mut counts: Vec<usize> = reports
        .iter()
        .map(|r| match &r.persist {
            PersistOutcome::Persisted(a) => a.frame_count,
            other => panic!("unexpected outcome {:?}", other),
        })
        .collect();
    counts.sort();
    // Frame 6 closes the first event; frame 9 opens the second.
    assert_eq!(counts, vec![2, 5]);
}
