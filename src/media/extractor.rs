use image::{DynamicImage, GenericImageView, imageops::FilterType};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ThumbnailSettings;
use crate::media::library::{MediaKind, classify};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STILL_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The external tool could not be started at all. Retrying is pointless.
    #[error("{tool} is not available: {source}")]
    ToolMissing {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("capture timed out after {0:?}")]
    TimedOut(Duration),

    #[error("capture failed: {0}")]
    Failed(String),
}

impl CaptureError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::ToolMissing { .. })
    }
}

/// Renders one still frame of a media file into `output`.
///
/// Implementations only report whether the attempt ran; the cache decides
/// success by checking that `output` exists and is non-empty.
pub trait FrameExtractor: Send + Sync {
    fn capture(&self, source: &Path, offset_seconds: f64, output: &Path)
    -> Result<(), CaptureError>;

    /// Duration in seconds, if it can be determined.
    fn probe_duration(&self, _source: &Path) -> Option<f64> {
        None
    }
}

/// ffmpeg/ffprobe subprocess adapter
#[derive(Debug, Clone)]
pub struct FfmpegExtractor {
    ffmpeg: String,
    ffprobe: String,
    height: u32,
    quality: u8,
    capture_timeout: Duration,
    probe_timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(settings: &ThumbnailSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg.clone(),
            ffprobe: settings.ffprobe.clone(),
            height: settings.height,
            quality: settings.quality,
            capture_timeout: settings.capture_timeout(),
            probe_timeout: settings.probe_timeout(),
        }
    }

    fn spawn(&self, tool: &str, command: &mut Command) -> Result<Child, CaptureError> {
        command.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CaptureError::ToolMissing {
                    tool: tool.to_string(),
                    source: e,
                }
            } else {
                CaptureError::Failed(format!("could not start {tool}: {e}"))
            }
        })
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn capture(
        &self,
        source: &Path,
        offset_seconds: f64,
        output: &Path,
    ) -> Result<(), CaptureError> {
        let offset = format!("{:.3}", offset_seconds.max(0.0));
        let scale = format!("scale=-1:{}:force_original_aspect_ratio=decrease", self.height);
        let quality = self.quality.to_string();

        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-ss", &offset, "-i"])
            .arg(source)
            .args(["-frames:v", "1", "-vf", &scale, "-q:v", &quality])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = self.spawn(&self.ffmpeg, &mut command)?;
        match wait_with_timeout(&mut child, self.capture_timeout) {
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(status)) => Err(CaptureError::Failed(format!(
                "{} exited with {}",
                self.ffmpeg, status
            ))),
            Ok(None) => Err(CaptureError::TimedOut(self.capture_timeout)),
            Err(e) => Err(CaptureError::Failed(e.to_string())),
        }
    }

    fn probe_duration(&self, source: &Path) -> Option<f64> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = self.spawn(&self.ffprobe, &mut command).ok()?;
        let status = wait_with_timeout(&mut child, self.probe_timeout).ok()??;
        if !status.success() {
            return None;
        }

        let mut out = String::new();
        child.stdout.take()?.read_to_string(&mut out).ok()?;
        out.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Thumbnails for still images, rendered in-process.
#[derive(Debug, Clone)]
pub struct StillImageExtractor {
    height: u32,
    quality: u8,
}

impl StillImageExtractor {
    pub fn new(height: u32) -> Self {
        Self {
            height: height.max(1),
            quality: STILL_JPEG_QUALITY,
        }
    }

    fn resize(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        if height <= self.height || height == 0 {
            return img;
        }

        // Fixed height, width follows the aspect ratio
        let ratio = self.height as f32 / height as f32;
        let new_width = ((width as f32 * ratio).round() as u32).max(1);
        img.resize_exact(new_width, self.height, FilterType::Lanczos3)
    }

    fn save(&self, img: &DynamicImage, output: &Path) -> Result<(), CaptureError> {
        let rgb_img = img.to_rgb8();
        let mut file = fs::File::create(output).map_err(|e| CaptureError::Failed(e.to_string()))?;
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut file, self.quality);
        rgb_img
            .write_with_encoder(encoder)
            .map_err(|e| CaptureError::Failed(e.to_string()))
    }
}

impl FrameExtractor for StillImageExtractor {
    fn capture(
        &self,
        source: &Path,
        _offset_seconds: f64,
        output: &Path,
    ) -> Result<(), CaptureError> {
        let img = image::open(source).map_err(|e| CaptureError::Failed(e.to_string()))?;
        let thumbnail = self.resize(img);
        self.save(&thumbnail, output)
    }
}

/// Routes stills to [`StillImageExtractor`] and everything else to ffmpeg.
#[derive(Debug, Clone)]
pub struct MediaExtractor {
    video: FfmpegExtractor,
    still: StillImageExtractor,
}

impl MediaExtractor {
    pub fn new(settings: &ThumbnailSettings) -> Self {
        Self {
            video: FfmpegExtractor::new(settings),
            still: StillImageExtractor::new(settings.height),
        }
    }
}

impl FrameExtractor for MediaExtractor {
    fn capture(
        &self,
        source: &Path,
        offset_seconds: f64,
        output: &Path,
    ) -> Result<(), CaptureError> {
        match classify(source) {
            Some(MediaKind::Image) => self.still.capture(source, offset_seconds, output),
            _ => self.video.capture(source, offset_seconds, output),
        }
    }

    fn probe_duration(&self, source: &Path) -> Option<f64> {
        match classify(source) {
            Some(MediaKind::Image) => None,
            _ => self.video.probe_duration(source),
        }
    }
}

/// Wait for `child`, killing it once `timeout` elapses. `Ok(None)` means it
/// was killed.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    fn missing_tools() -> ThumbnailSettings {
        ThumbnailSettings {
            ffmpeg: "tikrs-test-no-such-ffmpeg".to_string(),
            ffprobe: "tikrs-test-no-such-ffprobe".to_string(),
            ..ThumbnailSettings::default()
        }
    }

    #[test]
    fn test_still_thumbnail_has_fixed_height() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("wide.png");
        let output = temp_dir.path().join("thumb.jpg");
        create_test_image(&source, 1920, 1080);

        StillImageExtractor::new(360)
            .capture(&source, 0.0, &output)
            .unwrap();

        let thumb = image::open(&output).unwrap();
        assert_eq!(thumb.dimensions(), (640, 360));
    }

    #[test]
    fn test_small_still_is_not_upscaled() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("small.png");
        let output = temp_dir.path().join("thumb.jpg");
        create_test_image(&source, 120, 80);

        StillImageExtractor::new(360)
            .capture(&source, 0.0, &output)
            .unwrap();

        assert_eq!(image::open(&output).unwrap().dimensions(), (120, 80));
    }

    #[test]
    fn test_corrupt_still_fails() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("broken.jpg");
        fs::write(&source, b"definitely not a jpeg").unwrap();

        let result =
            StillImageExtractor::new(360).capture(&source, 0.0, &temp_dir.path().join("t.jpg"));
        assert!(matches!(result, Err(CaptureError::Failed(_))));
    }

    #[test]
    fn test_missing_ffmpeg_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("clip.mp4");
        fs::write(&source, b"not really a video").unwrap();

        let extractor = FfmpegExtractor::new(&missing_tools());
        let err = extractor
            .capture(&source, 5.0, &temp_dir.path().join("t.jpg"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(extractor.probe_duration(&source).is_none());
    }

    #[test]
    fn test_media_extractor_routes_stills_in_process() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("photo.png");
        let output = temp_dir.path().join("thumb.jpg");
        create_test_image(&source, 400, 400);

        // No ffmpeg needed for stills
        let extractor = MediaExtractor::new(&missing_tools());
        extractor.capture(&source, 5.0, &output).unwrap();
        assert!(output.exists());
        assert!(extractor.probe_duration(&source).is_none());

        let video = temp_dir.path().join("clip.mp4");
        fs::write(&video, b"x").unwrap();
        assert!(
            extractor
                .capture(&video, 1.0, &temp_dir.path().join("v.jpg"))
                .unwrap_err()
                .is_fatal()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_timeout_kills_hung_process() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();

        let status = wait_with_timeout(&mut child, Duration::from_millis(100)).unwrap();
        assert!(status.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_timeout_returns_exit_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert!(status.unwrap().success());
    }
}
