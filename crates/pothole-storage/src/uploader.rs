//! Upload of persisted event artifacts.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use pothole_models::ArtifactKind;

use crate::error::{StorageError, StorageResult};
use crate::retry::{retry_async, FailureTracker, RetryConfig, RetryResult};

/// Consecutive failures logged at warn level before going quiet.
const MAX_LOGGED_FAILURES: u32 = 5;

/// PUT-style destination for local files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;
}

/// One local file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub key: String,
}

impl UploadRequest {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Uploaded { attempts: u32 },
    Failed { error: String, attempts: u32 },
    /// The local file did not exist; no attempt was made.
    Missing,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded { .. } => "uploaded",
            UploadStatus::Failed { .. } => "failed",
            UploadStatus::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub kind: ArtifactKind,
    pub key: String,
    pub status: UploadStatus,
}

/// Per-file results for one event, in request order.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub outcomes: Vec<UploadOutcome>,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.count(|s| matches!(s, UploadStatus::Uploaded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, UploadStatus::Failed { .. }))
    }

    pub fn missing(&self) -> usize {
        self.count(|s| matches!(s, UploadStatus::Missing))
    }

    pub fn all_uploaded(&self) -> bool {
        self.uploaded() == self.outcomes.len()
    }

    pub fn status_of(&self, kind: ArtifactKind) -> Option<&UploadStatus> {
        self.outcomes
            .iter()
            .find(|o| o.kind == kind)
            .map(|o| &o.status)
    }

    fn count(&self, pred: impl Fn(&UploadStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Uploads each artifact of an event independently.
///
/// A failure never aborts the remaining files and never surfaces as an
/// error; it is reported in the [`UploadReport`].
pub struct UploadWorker {
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
    failures: Mutex<FailureTracker>,
}

impl UploadWorker {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::new("upload"),
            failures: Mutex::new(FailureTracker::new(MAX_LOGGED_FAILURES)),
        }
    }

    /// Opt into retrying failed uploads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn upload_all(&self, requests: &[UploadRequest]) -> UploadReport {
        let mut report = UploadReport::default();
        for request in requests {
            let status = self.upload_one(request).await;
            report.outcomes.push(UploadOutcome {
                kind: request.kind,
                key: request.key.clone(),
                status,
            });
        }

        info!(
            uploaded = report.uploaded(),
            failed = report.failed(),
            missing = report.missing(),
            "Artifact upload finished"
        );
        report
    }

    pub async fn upload_one(&self, request: &UploadRequest) -> UploadStatus {
        if !tokio::fs::try_exists(&request.path).await.unwrap_or(false) {
            warn!(
                kind = %request.kind,
                "Skipping upload, local file missing: {}",
                request.path.display()
            );
            return UploadStatus::Missing;
        }

        let content_type = request.kind.content_type();
        let result = retry_async(&self.retry, StorageError::is_retryable, || {
            self.store.put_file(&request.path, &request.key, content_type)
        })
        .await;

        match result {
            RetryResult::Success { attempts, .. } => {
                self.record_success();
                debug!(key = %request.key, attempts, "Artifact uploaded");
                UploadStatus::Uploaded { attempts }
            }
            RetryResult::Failed { error, attempts } => {
                if self.record_failure() {
                    warn!(
                        key = %request.key,
                        attempts,
                        "Upload failed: {}",
                        error
                    );
                }
                UploadStatus::Failed {
                    error: error.to_string(),
                    attempts,
                }
            }
        }
    }

    fn record_success(&self) {
        if let Ok(mut tracker) = self.failures.lock() {
            tracker.record_success();
        }
    }

    fn record_failure(&self) -> bool {
        match self.failures.lock() {
            Ok(mut tracker) => tracker.record_failure(),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails every key containing `fail_on`, records every attempt.
    #[derive(Default)]
    struct FakeStore {
        fail_on: Option<String>,
        attempts: Mutex<Vec<String>>,
        transient_failures: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put_file(&self, _path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
            self.attempts.lock().unwrap().push(key.to_string());
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::upload_failed("connection reset"));
            }
            match &self.fail_on {
                Some(pattern) if key.contains(pattern.as_str()) => {
                    Err(StorageError::upload_failed("access denied"))
                }
                _ => Ok(()),
            }
        }
    }

    fn requests(dir: &TempDir) -> Vec<UploadRequest> {
        ArtifactKind::ALL
            .iter()
            .map(|&kind| {
                let name = format!("pothole_1.{}", kind.as_str());
                let path = dir.path().join(&name);
                std::fs::write(&path, b"data").unwrap();
                UploadRequest::new(kind, path, format!("2025-05-02/{}", name))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failed_video_does_not_stop_others() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore {
            fail_on: Some("video".to_string()),
            ..Default::default()
        });
        let worker = UploadWorker::new(store.clone());

        let report = worker.upload_all(&requests(&dir)).await;

        assert_eq!(store.attempts.lock().unwrap().len(), 3);
        assert!(matches!(
            report.status_of(ArtifactKind::Video),
            Some(UploadStatus::Failed { attempts: 1, .. })
        ));
        assert_eq!(
            report.status_of(ArtifactKind::BestFrame),
            Some(&UploadStatus::Uploaded { attempts: 1 })
        );
        assert_eq!(
            report.status_of(ArtifactKind::Metadata),
            Some(&UploadStatus::Uploaded { attempts: 1 })
        );
        assert_eq!(report.failed(), 1);
        assert!(!report.all_uploaded());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut reqs = requests(&dir);
        std::fs::remove_file(&reqs[0].path).unwrap();
        reqs[0].path = dir.path().join("gone.avi");

        let store = Arc::new(FakeStore::default());
        let report = UploadWorker::new(store.clone()).upload_all(&reqs).await;

        assert_eq!(report.missing(), 1);
        assert_eq!(report.uploaded(), 2);
        assert_eq!(store.attempts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FakeStore {
            transient_failures: AtomicU32::new(1),
            ..Default::default()
        });
        let worker = UploadWorker::new(store.clone()).with_retry(
            RetryConfig::new("upload")
                .with_max_retries(2)
                .with_base_delay(Duration::from_millis(1)),
        );

        let report = worker.upload_all(&requests(&dir)).await;

        assert!(report.all_uploaded());
        assert_eq!(
            report.status_of(ArtifactKind::Video),
            Some(&UploadStatus::Uploaded { attempts: 2 })
        );
        assert_eq!(store.attempts.lock().unwrap().len(), 4);
    }
}
