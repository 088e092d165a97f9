//! Pothole event worker binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pothole_media::{check_ffmpeg, ClipPersister, FfmpegVideoEncoder, VideoEncoder};
use pothole_storage::{RetryConfig, S3Client, UploadWorker};
use pothole_worker::{
    await_capture, metrics, run_capture, CaptureOptions, EventProcessor, FfmpegFrameSource, FramePipeline,
    GpsTracker, JsonlDetector, MemoryGovernor, PersistenceWorkers, PipelineConfig, SysinfoSampler,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting pothole-worker");

    let config = PipelineConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if !config.headless {
        warn!("HEADLESS=false requested but no preview window is available; running headless");
    }

    if let Some(addr) = config.metrics_listen_addr {
        match metrics::install_exporter(addr) {
            Ok(()) => info!("Prometheus metrics on http://{}/metrics", addr),
            Err(e) => warn!("Metrics exporter not started: {}", e),
        }
    }

    let Some(detections_path) = config.detections_path.clone() else {
        error!("DETECTIONS_PATH must point to a JSON-lines detection feed");
        std::process::exit(1);
    };
    let mut detector = match JsonlDetector::open(&detections_path) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to open detection feed {}: {}", detections_path.display(), e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = Arc::new(AtomicBool::new(false));

    let gps = GpsTracker::new();
    let gps_handle = match config.gps_feed_path.clone() {
        Some(path) => Some(gps.spawn_feed(path, shutdown_rx.clone())),
        None => {
            info!("No GPS_FEED_PATH set, events will carry null coordinates");
            None
        }
    };

    if let Err(e) = check_ffmpeg() {
        warn!("{}; clips will fail to encode", e);
    }
    let encoder: Box<dyn VideoEncoder> =
        Box::new(FfmpegVideoEncoder::new().with_timeout(config.encode_timeout.as_secs()));

    let uploader = match S3Client::from_env() {
        Ok(client) => {
            info!(bucket = client.bucket(), "Uploads enabled");
            let retry = RetryConfig::new("upload").with_max_retries(config.upload_max_retries);
            Some(UploadWorker::new(Arc::new(client)).with_retry(retry))
        }
        Err(e) => {
            warn!("Uploads disabled, artifacts stay local: {}", e);
            None
        }
    };

    let processor = Arc::new(EventProcessor::new(
        ClipPersister::new(config.persist_config(), encoder),
        uploader,
        gps.clone(),
    ));
    let workers = PersistenceWorkers::spawn(
        processor,
        config.persist_workers,
        config.persist_queue_depth,
    );

    let mut pipeline =
        FramePipeline::new(&config, Arc::new(workers.dispatcher())).with_gps(gps.clone());

    let governor_handle = if config.memory_monitor {
        let governor = MemoryGovernor::new(
            Box::new(SysinfoSampler::new()),
            config.memory_threshold_bytes(),
        )
        .with_target(pipeline.buffer());
        Some(governor.spawn(config.memory_check_interval, shutdown_rx.clone()))
    } else {
        None
    };

    let options = CaptureOptions {
        uri: config.camera_uri.clone(),
        width: config.capture_width,
        height: config.capture_height,
        headless: config.headless,
    };
    let mut source = match FfmpegFrameSource::spawn(&options) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open camera {}: {}", options.uri, e);
            drop(pipeline);
            let _ = shutdown_tx.send(true);
            workers.shutdown(config.shutdown_grace).await;
            std::process::exit(1);
        }
    };

    let stopper = source.stopper();
    let stop_requested = Arc::new(Notify::new());
    let stop_signal = Arc::clone(&stop);
    let stop_notify = Arc::clone(&stop_requested);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            stop_signal.store(true, Ordering::Relaxed);
            // A stalled stream would otherwise keep the capture thread in a read.
            stopper.stop();
            stop_notify.notify_one();
        }
    });

    let mut capture = tokio::task::spawn_blocking(move || {
        let result = run_capture(&mut source, &mut detector, &mut pipeline, &stop);
        // Releases the last dispatcher handle so the workers can drain.
        drop(pipeline);
        result
    });

    let joined = await_capture(&mut capture, &stop_requested, config.shutdown_grace).await;

    let capture_abandoned = joined.is_none();
    let exit_code = match joined {
        Some(Ok(Ok(stats))) => {
            info!(
                frames = stats.frames,
                events = stats.events_closed,
                detector_errors = stats.detector_errors,
                "Capture finished"
            );
            0
        }
        Some(Ok(Err(e))) => {
            error!("Capture failed: {}", e);
            1
        }
        Some(Err(e)) => {
            error!("Capture task panicked: {}", e);
            1
        }
        None => 1,
    };

    let _ = shutdown_tx.send(true);
    if !workers.shutdown(config.shutdown_grace).await {
        warn!("Some events were not persisted before shutdown");
    }
    for handle in [gps_handle, governor_handle].into_iter().flatten() {
        handle.await.ok();
    }

    info!("Worker shutdown complete");
    // The runtime would wait forever on an abandoned blocking capture thread.
    if exit_code != 0 || capture_abandoned {
        std::process::exit(exit_code);
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let env_filter = match "pothole=info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}
