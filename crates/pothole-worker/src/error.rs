//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Metrics exporter failed: {0}")]
    Metrics(String),

    #[error("Media error: {0}")]
    Media(#[from] pothole_media::MediaError),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Reasons a finished event could not be handed to the persistence pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("persistence queue is full")]
    QueueFull,

    #[error("persistence workers have shut down")]
    Closed,
}

/// Frame acquisition failures.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to start frame source: {0}")]
    Spawn(String),

    #[error("frame source read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// Detector failures; the pipeline treats them as "no detections".
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("malformed detection record on line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("detection feed read failed: {0}")]
    Io(#[from] std::io::Error),
}
