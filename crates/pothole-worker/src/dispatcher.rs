//! Background persistence of finished events.
//!
//! Finished events go onto a bounded queue consumed by a fixed pool of
//! workers. Each event runs in its own task so an error or panic while
//! persisting it is contained and logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use pothole_media::{ClipPersister, PersistOutcome, VideoEncoder};
use pothole_models::EventId;
use pothole_storage::{UploadReport, UploadRequest, UploadWorker};

use crate::error::{DispatchError, WorkerResult};
use crate::gps::GpsTracker;
use crate::logging::EventLogger;
use crate::metrics;
use crate::pipeline::{EventSink, FinishedEvent};

/// Everything that happened to one event after it was closed.
#[derive(Debug)]
pub struct EventReport {
    pub event_id: EventId,
    pub persist: PersistOutcome,
    /// `None` when uploads are disabled or nothing was persisted
    pub uploads: Option<UploadReport>,
}

/// Persists and uploads one finished event.
pub struct EventProcessor {
    persister: ClipPersister<Box<dyn VideoEncoder>>,
    uploader: Option<UploadWorker>,
    gps: GpsTracker,
}

impl EventProcessor {
    pub fn new(
        persister: ClipPersister<Box<dyn VideoEncoder>>,
        uploader: Option<UploadWorker>,
        gps: GpsTracker,
    ) -> Self {
        Self {
            persister,
            uploader,
            gps,
        }
    }

    pub fn uploads_enabled(&self) -> bool {
        self.uploader.is_some()
    }

    pub async fn process(&self, event: FinishedEvent) -> WorkerResult<EventReport> {
        let logger = EventLogger::new(&event.id, "persist");
        let span = logger.create_span();
        self.process_inner(event, logger).instrument(span).await
    }

    async fn process_inner(
        &self,
        event: FinishedEvent,
        logger: EventLogger,
    ) -> WorkerResult<EventReport> {
        logger.log_start(&format!("{} frames", event.frames.len()));

        // Position is sampled once, when the event is persisted.
        let fix = self.gps.snapshot();
        let persist = self
            .persister
            .persist(event.frames, &fix, event.closed_at)
            .await?;

        let artifacts = match persist {
            PersistOutcome::NoValidFrames { skipped_frames } => {
                logger.log_warning(&format!(
                    "no valid frames ({} skipped), nothing persisted",
                    skipped_frames
                ));
                metrics::record_event_discarded("no_valid_frames");
                return Ok(EventReport {
                    event_id: event.id,
                    persist: PersistOutcome::NoValidFrames { skipped_frames },
                    uploads: None,
                });
            }
            PersistOutcome::Persisted(artifacts) => artifacts,
        };

        for artifact in &artifacts.created {
            metrics::record_artifact_persisted(artifact.kind);
        }
        for failure in &artifacts.failures {
            metrics::record_artifact_failed(failure.kind);
            logger.log_warning(&format!("{} not written: {}", failure.kind, failure.error));
        }
        logger.log_progress(&format!(
            "{} of 3 artifacts written as {}",
            artifacts.created.len(),
            artifacts.key.stem()
        ));

        let uploads = match &self.uploader {
            Some(uploader) if !artifacts.created.is_empty() => {
                let requests: Vec<UploadRequest> = artifacts
                    .created
                    .iter()
                    .map(|a| UploadRequest::new(a.kind, a.path.clone(), a.remote_key.clone()))
                    .collect();
                let report = uploader.upload_all(&requests).await;
                for outcome in &report.outcomes {
                    metrics::record_upload(outcome.kind, outcome.status.as_str());
                }
                Some(report)
            }
            Some(_) => None,
            None => {
                debug!("Uploads disabled, artifacts kept locally");
                None
            }
        };

        match &uploads {
            Some(report) if !report.all_uploaded() => logger.log_warning(&format!(
                "{} uploaded, {} failed, {} missing",
                report.uploaded(),
                report.failed(),
                report.missing()
            )),
            _ => logger.log_completion(&artifacts.key.stem()),
        }

        Ok(EventReport {
            event_id: event.id,
            persist: PersistOutcome::Persisted(artifacts),
            uploads,
        })
    }
}

/// Non-blocking handle used by the capture path to submit events.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<FinishedEvent>,
}

impl EventSink for Dispatcher {
    fn submit(&self, event: FinishedEvent) -> Result<(), DispatchError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fixed pool of persistence workers.
pub struct PersistenceWorkers {
    tx: mpsc::Sender<FinishedEvent>,
    handles: Vec<JoinHandle<()>>,
}

impl PersistenceWorkers {
    pub fn spawn(processor: Arc<EventProcessor>, workers: usize, queue_depth: usize) -> Self {
        Self::spawn_inner(processor, workers, queue_depth, None)
    }

    /// Like [`spawn`](Self::spawn), also sending every completed report to `reports`.
    pub fn spawn_reporting(
        processor: Arc<EventProcessor>,
        workers: usize,
        queue_depth: usize,
        reports: mpsc::UnboundedSender<EventReport>,
    ) -> Self {
        Self::spawn_inner(processor, workers, queue_depth, Some(reports))
    }

    fn spawn_inner(
        processor: Arc<EventProcessor>,
        workers: usize,
        queue_depth: usize,
        reports: Option<mpsc::UnboundedSender<EventReport>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = workers.max(1);

        info!(
            "Starting {} persistence workers with queue depth {}",
            workers,
            queue_depth.max(1)
        );

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&processor),
                    reports.clone(),
                ))
            })
            .collect();

        Self { tx, handles }
    }

    /// Handle for submitting events.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting events and wait up to `grace` for queued and in-flight
    /// events, then abort whatever is left.
    ///
    /// Returns `true` if everything finished within the grace period. Work
    /// only drains once every [`Dispatcher`] clone has been dropped.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self { tx, mut handles } = self;
        drop(tx);

        let drained = tokio::time::timeout(grace, futures::future::join_all(handles.iter_mut()))
            .await
            .is_ok();

        if drained {
            info!("Persistence workers drained");
        } else {
            warn!(
                "Persistence workers still busy after {:?}, aborting",
                grace
            );
            for handle in &handles {
                handle.abort();
            }
        }
        drained
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<FinishedEvent>>>,
    processor: Arc<EventProcessor>,
    reports: Option<mpsc::UnboundedSender<EventReport>>,
) {
    debug!(worker_id, "Persistence worker started");
    loop {
        let event = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(event) = event else {
            break;
        };

        let event_id = event.id.clone();
        let processor = Arc::clone(&processor);
        let mut task = AbortOnDrop(tokio::spawn(async move { processor.process(event).await }));

        match (&mut task.0).await {
            Ok(Ok(report)) => {
                if let Some(reports) = &reports {
                    let _ = reports.send(report);
                }
            }
            Ok(Err(e)) => {
                error!(event_id = %event_id, worker_id, "Event persistence failed: {}", e);
                metrics::record_event_failed("error");
            }
            Err(e) if e.is_panic() => {
                error!(event_id = %event_id, worker_id, "Event persistence panicked");
                metrics::record_event_failed("panic");
            }
            Err(_) => {
                warn!(event_id = %event_id, worker_id, "Event persistence cancelled");
                metrics::record_event_failed("cancelled");
            }
        }
    }
    debug!(worker_id, "Persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use pothole_media::{MediaResult, PersistConfig, VideoSpec};
    use pothole_models::{BufferedFrame, Frame, PixelFormat};
    use std::path::Path;
    use tempfile::TempDir;

    struct StubEncoder;

    #[async_trait]
    impl VideoEncoder for StubEncoder {
        async fn encode(&self, output: &Path, _spec: VideoSpec, _frames: &[&Frame]) -> MediaResult<()> {
            tokio::fs::write(output, b"clip").await?;
            Ok(())
        }
    }

    struct PanickingEncoder;

    #[async_trait]
    impl VideoEncoder for PanickingEncoder {
        async fn encode(&self, _output: &Path, _spec: VideoSpec, _frames: &[&Frame]) -> MediaResult<()> {
            panic!("encoder blew up");
        }
    }

    fn processor(dir: &TempDir, encoder: Box<dyn VideoEncoder>) -> Arc<EventProcessor> {
        let config = PersistConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Arc::new(EventProcessor::new(
            ClipPersister::new(config, encoder),
            None,
            GpsTracker::new(),
        ))
    }

    fn event(frames: usize) -> FinishedEvent {
        let now = Utc::now();
        FinishedEvent {
            id: EventId::new(),
            frames: (0..frames)
                .map(|_| {
                    BufferedFrame::new(
                        Frame {
                            pixels: vec![0; 2 * 2 * 3],
                            width: 2,
                            height: 2,
                            format: PixelFormat::Bgr24,
                            captured_at: now,
                        },
                        vec![0.5],
                    )
                })
                .collect(),
            started_at: now,
            closed_at: now,
        }
    }

    #[tokio::test]
    async fn test_events_are_persisted_in_background() {
        let dir = TempDir::new().unwrap();
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
        let workers =
            PersistenceWorkers::spawn_reporting(processor(&dir, Box::new(StubEncoder)), 2, 4, reports_tx);

        let dispatcher = workers.dispatcher();
        dispatcher.submit(event(3)).unwrap();
        dispatcher.submit(event(2)).unwrap();
        drop(dispatcher);

        assert!(workers.shutdown(Duration::from_secs(5)).await);

        let mut counts = Vec::new();
        while let Ok(report) = reports_rx.try_recv() {
            match report.persist {
                PersistOutcome::Persisted(a) => counts.push(a.frame_count),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        counts.sort();
        assert_eq!(counts, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = Dispatcher { tx };
        dispatcher.submit(event(1)).unwrap();
        assert_eq!(dispatcher.submit(event(1)), Err(DispatchError::QueueFull));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let dispatcher = Dispatcher { tx };
        assert_eq!(dispatcher.submit(event(1)), Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let dir = TempDir::new().unwrap();
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();
        let workers = PersistenceWorkers::spawn_reporting(
            processor(&dir, Box::new(PanickingEncoder)),
            1,
            4,
            reports_tx,
        );

        let dispatcher = workers.dispatcher();
        dispatcher.submit(event(1)).unwrap();
        dispatcher.submit(event(1)).unwrap();
        drop(dispatcher);

        // The single worker survives the first panic and handles the second event.
        assert!(workers.shutdown(Duration::from_secs(5)).await);
        assert!(reports_rx.try_recv().is_err());
    }
}
