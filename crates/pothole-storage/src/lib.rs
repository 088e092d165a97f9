//! Object storage for pothole event artifacts.
//!
//! This crate provides:
//! - An S3-compatible client (Tigris, R2, MinIO, AWS)
//! - The [`ObjectStore`] seam used by the upload path
//! - [`UploadWorker`] with per-file failure isolation and opt-in retry

pub mod client;
pub mod error;
pub mod retry;
pub mod uploader;

pub use client::{S3Client, S3Config};
pub use error::{StorageError, StorageResult};
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult};
pub use uploader::{ObjectStore, UploadOutcome, UploadReport, UploadRequest, UploadStatus, UploadWorker};
