//! Pipeline configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pothole_media::PersistConfig;
use pothole_models::encoding::{DEFAULT_ARTIFACT_PREFIX, DEFAULT_JPEG_QUALITY, DEFAULT_OUTPUT_FPS};
use pothole_models::POTHOLE_CLASS_ID;

use crate::error::{WorkerError, WorkerResult};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Detection class that opens and extends events
    pub trigger_class_id: u32,
    /// Time without a trigger after which an event closes
    pub detection_timeout: Duration,
    /// Maximum frames kept per event (oldest dropped)
    pub frame_buffer_len: usize,
    /// Output clip frame rate
    pub output_fps: u32,
    /// Local artifact root
    pub output_base_dir: PathBuf,
    /// Prefix of every artifact file name
    pub artifact_prefix: String,
    pub jpeg_quality: u8,
    /// Timeout for a single clip encode
    pub encode_timeout: Duration,
    /// Draw detection boxes into buffered frames
    pub annotate_frames: bool,
    /// Persistence worker pool size
    pub persist_workers: usize,
    /// Finished events waiting for a worker
    pub persist_queue_depth: usize,
    /// Bounded wait for background work on shutdown
    pub shutdown_grace: Duration,
    pub memory_monitor: bool,
    pub memory_check_interval: Duration,
    /// Resident memory above which reclamation is requested
    pub memory_threshold_mb: u64,
    /// Device path, file or stream URL
    pub camera_uri: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// No preview output is opened when set
    pub headless: bool,
    /// JSON-lines detection feed, one line per frame
    pub detections_path: Option<PathBuf>,
    /// JSON-lines GPS fix feed
    pub gps_feed_path: Option<PathBuf>,
    /// Upload retry attempts per file
    pub upload_max_retries: u32,
    /// Prometheus exporter listen address
    pub metrics_listen_addr: Option<SocketAddr>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trigger_class_id: POTHOLE_CLASS_ID,
            detection_timeout: Duration::from_secs(3),
            frame_buffer_len: 90,
            output_fps: DEFAULT_OUTPUT_FPS,
            output_base_dir: PathBuf::from("cached_clips"),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            encode_timeout: Duration::from_secs(120),
            annotate_frames: true,
            persist_workers: 2,
            persist_queue_depth: 4,
            shutdown_grace: Duration::from_secs(10),
            memory_monitor: true,
            memory_check_interval: Duration::from_secs(5),
            memory_threshold_mb: 200,
            camera_uri: "/dev/video0".to_string(),
            capture_width: 640,
            capture_height: 480,
            headless: true,
            detections_path: None,
            gps_feed_path: None,
            upload_max_retries: 0,
            metrics_listen_addr: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// `None` when the value does not fit a `Duration`.
fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            trigger_class_id: env_parse("TRIGGER_CLASS_ID").unwrap_or(defaults.trigger_class_id),
            detection_timeout: env_parse::<f64>("DETECTION_TIMEOUT_SECS")
                .and_then(secs_to_duration)
                .unwrap_or(defaults.detection_timeout),
            frame_buffer_len: env_parse("FRAME_BUFFER_LEN").unwrap_or(defaults.frame_buffer_len),
            output_fps: env_parse("OUTPUT_FPS").unwrap_or(defaults.output_fps),
            output_base_dir: env_path("OUTPUT_BASE_DIR").unwrap_or(defaults.output_base_dir),
            artifact_prefix: std::env::var("ARTIFACT_PREFIX")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.artifact_prefix),
            jpeg_quality: env_parse("JPEG_QUALITY").unwrap_or(defaults.jpeg_quality),
            encode_timeout: env_parse("ENCODE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.encode_timeout),
            annotate_frames: env_bool("ANNOTATE_FRAMES").unwrap_or(defaults.annotate_frames),
            persist_workers: env_parse("PERSIST_WORKERS").unwrap_or(defaults.persist_workers),
            persist_queue_depth: env_parse("PERSIST_QUEUE_DEPTH")
                .unwrap_or(defaults.persist_queue_depth),
            shutdown_grace: env_parse("SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            memory_monitor: env_bool("MEMORY_MONITOR").unwrap_or(defaults.memory_monitor),
            memory_check_interval: env_parse("MEMORY_CHECK_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.memory_check_interval),
            memory_threshold_mb: env_parse("MEMORY_THRESHOLD_MB")
                .unwrap_or(defaults.memory_threshold_mb),
            camera_uri: std::env::var("CAMERA_URI").unwrap_or(defaults.camera_uri),
            capture_width: env_parse("CAPTURE_WIDTH").unwrap_or(defaults.capture_width),
            capture_height: env_parse("CAPTURE_HEIGHT").unwrap_or(defaults.capture_height),
            headless: env_bool("HEADLESS").unwrap_or(defaults.headless),
            detections_path: env_path("DETECTIONS_PATH"),
            gps_feed_path: env_path("GPS_FEED_PATH"),
            upload_max_retries: env_parse("UPLOAD_MAX_RETRIES")
                .unwrap_or(defaults.upload_max_retries),
            metrics_listen_addr: env_parse("METRICS_LISTEN_ADDR"),
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.frame_buffer_len == 0 {
            return Err(WorkerError::config_error("FRAME_BUFFER_LEN must be at least 1"));
        }
        if self.output_fps == 0 {
            return Err(WorkerError::config_error("OUTPUT_FPS must be greater than 0"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(WorkerError::config_error("JPEG_QUALITY must be in 1..=100"));
        }
        if self.persist_workers == 0 || self.persist_queue_depth == 0 {
            return Err(WorkerError::config_error(
                "PERSIST_WORKERS and PERSIST_QUEUE_DEPTH must be at least 1",
            ));
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            return Err(WorkerError::config_error("capture size must be non-zero"));
        }
        if self.memory_monitor && self.memory_check_interval.is_zero() {
            return Err(WorkerError::config_error(
                "MEMORY_CHECK_INTERVAL_SECS must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn persist_config(&self) -> PersistConfig {
        PersistConfig {
            output_dir: self.output_base_dir.clone(),
            prefix: self.artifact_prefix.clone(),
            fps: self.output_fps,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn memory_threshold_bytes(&self) -> u64 {
        self.memory_threshold_mb.saturating_mul(1024 * 1024)
    }
}
