//! Video encoding of buffered frames.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use pothole_models::encoding::{CLIP_QSCALE, CLIP_VIDEO_CODEC, CLIP_VIDEO_TAG};
use pothole_models::{Frame, PixelFormat};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Geometry and rate of an output clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

/// Writes a sequence of same-sized frames to a video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encode `frames` in order. Every frame must already match `spec`.
    async fn encode(&self, output: &Path, spec: VideoSpec, frames: &[&Frame]) -> MediaResult<()>;
}

#[async_trait]
impl<T: VideoEncoder + ?Sized> VideoEncoder for Box<T> {
    async fn encode(&self, output: &Path, spec: VideoSpec, frames: &[&Frame]) -> MediaResult<()> {
        (**self).encode(output, spec, frames).await
    }
}

/// Encoder backed by the `ffmpeg` CLI reading raw frames from stdin.
#[derive(Debug, Clone)]
pub struct FfmpegVideoEncoder {
    codec: String,
    tag: Option<String>,
    qscale: u8,
    timeout_secs: u64,
}

impl Default for FfmpegVideoEncoder {
    fn default() -> Self {
        Self {
            codec: CLIP_VIDEO_CODEC.to_string(),
            tag: Some(CLIP_VIDEO_TAG.to_string()),
            qscale: CLIP_QSCALE,
            timeout_secs: 120,
        }
    }
}

impl FfmpegVideoEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build_command(&self, output: &Path, spec: VideoSpec) -> FfmpegCommand {
        let cmd = FfmpegCommand::raw_video_input(
            output,
            spec.format.ffmpeg_name(),
            spec.width,
            spec.height,
            spec.fps,
        )
        .video_codec(&self.codec);

        let cmd = match &self.tag {
            Some(tag) => cmd.video_tag(tag),
            None => cmd,
        };

        cmd.qscale(self.qscale).no_audio()
    }
}

#[async_trait]
impl VideoEncoder for FfmpegVideoEncoder {
    async fn encode(&self, output: &Path, spec: VideoSpec, frames: &[&Frame]) -> MediaResult<()> {
        if frames.is_empty() {
            return Err(MediaError::encode_failed("no frames to encode"));
        }
        if let Some(bad) = frames
            .iter()
            .find(|f| f.dimensions() != (spec.width, spec.height) || f.format != spec.format)
        {
            return Err(MediaError::encode_failed(format!(
                "frame {}x{} does not match clip {}x{}",
                bad.width, bad.height, spec.width, spec.height
            )));
        }

        let cmd = self.build_command(output, spec);
        let chunks: Vec<&[u8]> = frames.iter().map(|f| f.pixels.as_slice()).collect();

        FfmpegRunner::new()
            .with_timeout(self.timeout_secs)
            .run_with_stdin(&cmd, &chunks)
            .await?;

        info!(
            "Encoded {} frames ({}x{} @ {} fps) to {}",
            frames.len(),
            spec.width,
            spec.height,
            spec.fps,
            output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            pixels: vec![128; (width * height * 3) as usize],
            width,
            height,
            format: PixelFormat::Bgr24,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_command_uses_clip_codec() {
        let spec = VideoSpec {
            width: 320,
            height: 240,
            fps: 30,
            format: PixelFormat::Bgr24,
        };
        let args = FfmpegVideoEncoder::new()
            .build_command(Path::new("clip.avi"), spec)
            .build_args();
        assert!(args.contains(&"mpeg4".to_string()));
        assert!(args.contains(&"xvid".to_string()));
        assert!(args.contains(&"bgr24".to_string()));
        assert!(args.contains(&"320x240".to_string()));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_frames() {
        let spec = VideoSpec {
            width: 4,
            height: 4,
            fps: 30,
            format: PixelFormat::Bgr24,
        };
        let good = frame(4, 4);
        let bad = frame(2, 2);
        let err = FfmpegVideoEncoder::new()
            .encode(Path::new("unused.avi"), spec, &[&good, &bad])
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::EncodeFailed(_)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_ffmpeg_writes_clip() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("clip.avi");
        let spec = VideoSpec {
            width: 64,
            height: 48,
            fps: 30,
            format: PixelFormat::Bgr24,
        };
        let frames: Vec<Frame> = (0..10).map(|_| frame(64, 48)).collect();
        let refs: Vec<&Frame> = frames.iter().collect();

        FfmpegVideoEncoder::new()
            .encode(&output, spec, &refs)
            .await
            .unwrap();

        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }
}
