//! Frame and detection inputs.
//!
//! The capture loop pulls one frame from a [`FrameSource`] and one detection
//! set from a [`Detector`] per tick. Sources lend a view of their own reused
//! buffer; the pipeline copies it only when the frame is buffered.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use pothole_models::{Detection, FrameView, PixelFormat};

use crate::error::{DetectError, SourceError};

/// Result of polling a frame source once.
#[derive(Debug)]
pub enum SourcePoll<'a> {
    Frame(FrameView<'a>),
    /// Nothing usable this tick; try again.
    Empty,
    /// The source is exhausted.
    End,
}

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<SourcePoll<'_>, SourceError>;
}

pub trait Detector: Send {
    /// Detections for `frame`, possibly empty.
    fn detect(&mut self, frame: &FrameView<'_>) -> Result<Vec<Detection>, DetectError>;
}

/// Options for the FFmpeg-backed source.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Device path, file path or stream URL
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Never open a preview window
    pub headless: bool,
}

/// Decodes any FFmpeg-readable input to packed BGR24 frames.
pub struct FfmpegFrameSource {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    width: u32,
    height: u32,
}

impl FfmpegFrameSource {
    pub fn spawn(options: &CaptureOptions) -> Result<Self, SourceError> {
        if options.width == 0 || options.height == 0 {
            return Err(SourceError::Spawn(format!(
                "invalid capture size {}x{}",
                options.width, options.height
            )));
        }
        if !options.headless {
            warn!("Preview output is not available, capturing headless");
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args(build_capture_args(options));
        let source = Self::from_command(cmd, options.width, options.height)?;

        info!(
            "Capturing {} at {}x{}",
            options.uri, options.width, options.height
        );
        Ok(source)
    }

    fn from_command(mut cmd: Command, width: u32, height: u32) -> Result<Self, SourceError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| SourceError::Spawn(format!("ffmpeg: {}", e)))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(SourceError::Spawn("failed to capture ffmpeg stdout".to_string()));
            }
        };

        let frame_bytes = width as usize * height as usize * PixelFormat::Bgr24.bytes_per_pixel();
        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdout,
            buffer: vec![0u8; frame_bytes],
            width,
            height,
        })
    }

    /// Handle that stops the decoder from another thread.
    pub fn stopper(&self) -> SourceStopper {
        SourceStopper {
            child: Arc::clone(&self.child),
        }
    }
}

/// Kills the decoder process so a read blocked on a stalled stream
/// returns end-of-stream.
#[derive(Clone)]
pub struct SourceStopper {
    child: Arc<Mutex<Child>>,
}

impl SourceStopper {
    pub fn stop(&self) {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
        match child.kill() {
            Ok(()) => info!("Stopped frame decoder"),
            Err(e) => debug!("Frame decoder already gone: {}", e),
        }
    }
}

/// FFmpeg arguments that decode `options.uri` to raw BGR24 on stdout.
pub fn build_capture_args(options: &CaptureOptions) -> Vec<String> {
    let uri = options.uri.as_str();
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if uri.starts_with("/dev/video") {
        args.extend(["-f", "video4linux2"].iter().map(|s| s.to_string()));
    } else if uri.starts_with("rtsp://") {
        args.extend(["-rtsp_transport", "tcp"].iter().map(|s| s.to_string()));
    } else if !uri.contains("://") {
        // Plain files are paced at their native rate so event timeouts
        // measure real playback time.
        args.push("-re".to_string());
    }

    args.push("-i".to_string());
    args.push(uri.to_string());
    args.extend(
        [
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", options.width, options.height),
            "-pix_fmt".to_string(),
            PixelFormat::Bgr24.ffmpeg_name().to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ],
    );
    args
}

impl FrameSource for FfmpegFrameSource {
    fn next_frame(&mut self) -> Result<SourcePoll<'_>, SourceError> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(SourcePoll::Frame(FrameView::new(
                &self.buffer,
                self.width,
                self.height,
                PixelFormat::Bgr24,
                Utc::now(),
            ))),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("Frame source reached end of stream");
                Ok(SourcePoll::End)
            }
            Err(e) => Err(SourceError::Read(e)),
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Replays per-frame detections from JSON lines.
///
/// Each line holds the JSON array of detections for one frame. Blank lines
/// and the end of the feed mean "no detections".
pub struct JsonlDetector<R> {
    reader: R,
    line_no: usize,
    exhausted: bool,
}

impl JsonlDetector<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlDetector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            exhausted: false,
        }
    }
}

impl<R: BufRead + Send> Detector for JsonlDetector<R> {
    fn detect(&mut self, _frame: &FrameView<'_>) -> Result<Vec<Detection>, DetectError> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            info!("Detection feed exhausted after {} lines", self.line_no);
            self.exhausted = true;
            return Ok(Vec::new());
        }
        self.line_no += 1;

        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(line).map_err(|e| DetectError::Malformed {
            line: self.line_no,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn view() -> FrameView<'static> {
        FrameView::new(&[0, 0, 0], 1, 1, PixelFormat::Bgr24, Utc::now())
    }

    #[test]
    fn test_jsonl_detector_replays_lines() {
        let feed = concat!(
            r#"[{"class_id":1,"confidence":0.9,"bbox":{"xmin":0.1,"ymin":0.4,"xmax":0.3,"ymax":0.6}}]"#,
            "\n",
            "\n",
            "[]\n",
            "not json\n",
        );
        let mut detector = JsonlDetector::new(Cursor::new(feed));
        let frame = view();

        let first = detector.detect(&frame).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class_id, 1);
        assert!(detector.detect(&frame).unwrap().is_empty());
        assert!(detector.detect(&frame).unwrap().is_empty());
        assert!(matches!(
            detector.detect(&frame),
            Err(DetectError::Malformed { line: 4, .. })
        ));
        // Exhausted feeds keep answering with no detections.
        assert!(detector.detect(&frame).unwrap().is_empty());
        assert!(detector.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_capture_args_for_device() {
        let args = build_capture_args(&CaptureOptions {
            uri: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            headless: true,
        });
        assert_eq!(args[3..5], ["-f".to_string(), "video4linux2".to_string()]);
        assert!(args.contains(&"scale=640:480".to_string()));
        assert!(args.contains(&"bgr24".to_string()));
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn test_capture_args_pace_files() {
        let args = build_capture_args(&CaptureOptions {
            uri: "road.mp4".to_string(),
            width: 320,
            height: 240,
            headless: true,
        });
        assert!(args.contains(&"-re".to_string()));

        let stream = build_capture_args(&CaptureOptions {
            uri: "rtsp://cam/stream".to_string(),
            width: 320,
            height: 240,
            headless: true,
        });
        assert!(!stream.contains(&"-re".to_string()));
        assert!(stream.contains(&"tcp".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_stopper_unblocks_stalled_read() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut source = FfmpegFrameSource::from_command(cmd, 4, 4).unwrap();
        let stopper = source.stopper();

        let reader = std::thread::spawn(move || {
            matches!(source.next_frame(), Ok(SourcePoll::End))
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        stopper.stop();

        assert!(reader.join().unwrap());
    }
}
