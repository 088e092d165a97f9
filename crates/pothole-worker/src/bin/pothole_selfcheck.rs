use std::path::Path;
use std::process::Command;

use pothole_storage::S3Client;
use pothole_worker::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();

    let config = PipelineConfig::from_env();
    config.validate()?;

    println!(
        "pothole-selfcheck: starting with output_dir={}",
        config.output_base_dir.display()
    );
    ensure_output_dir(&config.output_base_dir).await?;
    ensure_ffmpeg()?;
    ensure_detection_feed(config.detections_path.as_deref())?;
    check_bucket().await?;

    println!("pothole-selfcheck: ok");
    Ok(())
}

async fn ensure_output_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("output dir {} not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffmpeg -version failed: {:?}", output.status));
    }
    Ok(())
}

fn ensure_detection_feed(path: Option<&Path>) -> anyhow::Result<()> {
    let path = path.ok_or_else(|| anyhow::anyhow!("missing required env var DETECTIONS_PATH"))?;
    if !path.is_file() {
        return Err(anyhow::anyhow!("detection feed {} not found", path.display()));
    }
    Ok(())
}

async fn check_bucket() -> anyhow::Result<()> {
    match S3Client::from_env() {
        Ok(client) => {
            client.check_connectivity().await?;
            println!("pothole-selfcheck: bucket {} reachable", client.bucket());
        }
        Err(e) => println!("pothole-selfcheck: uploads disabled ({})", e),
    }
    Ok(())
}
