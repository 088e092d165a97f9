//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Input URL that makes FFmpeg read from the runner's stdin.
pub const STDIN_INPUT: &str = "pipe:0";

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Create a command that reads packed raw frames from stdin.
    pub fn raw_video_input(
        output: impl AsRef<Path>,
        pix_fmt: &str,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Self {
        Self::new(STDIN_INPUT, output).input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            pix_fmt.to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-framerate".to_string(),
            fps.to_string(),
        ])
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set the codec FourCC tag.
    pub fn video_tag(self, tag: impl Into<String>) -> Self {
        self.output_arg("-vtag").output_arg(tag)
    }

    /// Set fixed quantizer quality (lower is better).
    pub fn qscale(self, q: u8) -> Self {
        self.output_arg("-q:v").output_arg(q.to_string())
    }

    /// Drop any audio stream.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runner for FFmpeg commands with an optional timeout.
pub struct FfmpegRunner {
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run a command, streaming `chunks` into its stdin in order.
    ///
    /// Stdin is closed after the last chunk so FFmpeg can finalize the output.
    pub async fn run_with_stdin(&self, cmd: &FfmpegCommand, chunks: &[&[u8]]) -> MediaResult<()> {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr_handle = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let work = Self::feed_and_wait(&mut child, chunks);
        let outcome = match self.timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), work)
                .await
                .map_err(|_| secs),
            None => Ok(work.await),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(secs) => {
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                return Err(MediaError::Timeout(secs));
            }
        };

        let stderr = match stderr_handle {
            Some(handle) => handle.await.ok().filter(|s| !s.trim().is_empty()),
            None => None,
        };

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                stderr,
                status.code(),
            )),
            Err(e) => Err(MediaError::ffmpeg_failed(
                format!("FFmpeg pipe error: {}", e),
                stderr,
                None,
            )),
        }
    }

    async fn feed_and_wait(
        child: &mut Child,
        chunks: &[&[u8]],
    ) -> std::io::Result<std::process::ExitStatus> {
        if let Some(mut stdin) = child.stdin.take() {
            for chunk in chunks {
                if let Err(e) = stdin.write_all(chunk).await {
                    // FFmpeg closed its input early; its exit status carries the reason.
                    debug!("FFmpeg stdin closed early: {}", e);
                    break;
                }
            }
            let _ = stdin.shutdown().await;
        }
        child.wait().await
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}
