//! Video decoding and frame rotation.
//!
//! Frames are delivered as RGB pixel grids in decode order. The default
//! backend pipes raw frames out of an `ffmpeg` child process; tests and
//! other backends plug in through [`VideoOpener`].

use std::fmt;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::{imageops, GenericImageView, ImageBuffer, Pixel, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Static properties of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second.
    pub fps: f64,
    /// Total frame count reported by the container (0 if unknown).
    pub frame_count: u32,
}

/// A forward-only stream of decoded frames.
pub trait VideoSource {
    fn info(&self) -> VideoInfo;

    /// Decode the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens independent [`VideoSource`]s for a path.
///
/// Each call starts a fresh read from the first frame.
pub trait VideoOpener {
    type Source: VideoSource;

    fn open(&self, path: &Path) -> Result<Self::Source>;
}

/// One of the four fixed frame rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Rotate180,
    CounterClockwise90,
}

impl Rotation {
    /// Candidates in the order the orientation detector evaluates them.
    pub const PRIORITY: [Rotation; 4] = [
        Rotation::None,
        Rotation::Clockwise90,
        Rotation::Rotate180,
        Rotation::CounterClockwise90,
    ];

    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::CounterClockwise90)
    }

    /// Frame size after rotation.
    pub fn apply_to_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Rotate an image buffer of any pixel type.
    pub fn apply<I, P>(&self, image: &I) -> ImageBuffer<P, Vec<P::Subpixel>>
    where
        I: GenericImageView<Pixel = P>,
        P: Pixel + 'static,
    {
        match self {
            Rotation::None => {
                let (w, h) = image.dimensions();
                ImageBuffer::from_fn(w, h, |x, y| image.get_pixel(x, y))
            }
            Rotation::Clockwise90 => imageops::rotate90(image),
            Rotation::Rotate180 => imageops::rotate180(image),
            Rotation::CounterClockwise90 => imageops::rotate270(image),
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Rotation::None => "none",
            Rotation::Clockwise90 => "90 degree clockwise",
            Rotation::Rotate180 => "180 degree",
            Rotation::CounterClockwise90 => "90 degree counter clockwise",
        };
        f.write_str(text)
    }
}

/// Opens videos through the `ffprobe` / `ffmpeg` command line tools.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener;

impl VideoOpener for FfmpegOpener {
    type Source = FfmpegVideo;

    fn open(&self, path: &Path) -> Result<FfmpegVideo> {
        FfmpegVideo::open(path)
    }
}

/// A video decoded by an `ffmpeg` child process emitting raw RGB24 frames.
///
/// Container rotation metadata is ignored (`-noautorotate`); orientation is
/// inferred from content instead.
pub struct FfmpegVideo {
    path: PathBuf,
    info: VideoInfo,
    child: Child,
    stdout: BufReader<ChildStdout>,
    frame_len: usize,
}

impl FfmpegVideo {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::video_open(path, "file not found"));
        }
        which::which("ffmpeg").map_err(|_| Error::video_open(path, "ffmpeg not found in PATH"))?;

        let info = probe(path)?;
        if info.width == 0 || info.height == 0 {
            return Err(Error::video_open(path, "video stream has no dimensions"));
        }

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::video_open(path, format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| Error::Ffmpeg {
            message: "failed to capture ffmpeg stdout".into(),
            stderr: None,
        })?;

        debug!(path = %path.display(), ?info, "opened video");

        Ok(Self {
            path: path.to_path_buf(),
            frame_len: info.width as usize * info.height as usize * 3,
            info,
            child,
            stdout: BufReader::new(stdout),
        })
    }
}

impl VideoSource for FfmpegVideo {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| Error::Ffmpeg {
                message: format!("short frame from {}", self.path.display()),
                stderr: None,
            })
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!(error = %e, "failed to stop ffmpeg");
            }
        }
        let _ = self.child.wait();
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Read stream properties with `ffprobe`.
pub fn probe(path: &Path) -> Result<VideoInfo> {
    which::which("ffprobe").map_err(|_| Error::video_open(path, "ffprobe not found in PATH"))?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-select_streams",
            "v:0",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::video_open(path, format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(Error::video_open(
            path,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| Error::video_open(path, "no video stream found"))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| Error::video_open(path, "unknown frame rate"))?;

    Ok(VideoInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
        frame_count: stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
    })
}

/// Parse a frame rate string such as `"30/1"` or `"29.97"`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.parse().ok()?,
    };
    (fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn frame_rate_parsing() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn rotation_moves_corner_pixel() {
        // 3x2 image with a marker in the bottom-right corner
        let mut img = GrayImage::new(3, 2);
        img.put_pixel(2, 1, Luma([255]));

        let r180 = Rotation::Rotate180.apply(&img);
        assert_eq!(r180.dimensions(), (3, 2));
        assert_eq!(r180.get_pixel(0, 0)[0], 255);

        let cw = Rotation::Clockwise90.apply(&img);
        assert_eq!(cw.dimensions(), (2, 3));
        assert_eq!(cw.get_pixel(0, 2)[0], 255);

        let ccw = Rotation::CounterClockwise90.apply(&img);
        assert_eq!(ccw.dimensions(), (2, 3));
        assert_eq!(ccw.get_pixel(1, 0)[0], 255);

        let none = Rotation::None.apply(&img);
        assert_eq!(none, img);
    }

    #[test]
    fn rotation_applies_to_rgb() {
        let img = RgbImage::from_pixel(4, 2, Rgb([1, 2, 3]));
        let rotated = Rotation::Clockwise90.apply(&img);
        assert_eq!(rotated.dimensions(), (2, 4));
        assert_eq!(Rotation::Clockwise90.apply_to_size(4, 2), (2, 4));
        assert_eq!(Rotation::Rotate180.apply_to_size(4, 2), (4, 2));
    }

    #[test]
    fn missing_file_is_open_failure() {
        let err = FfmpegVideo::open(Path::new("/definitely/not/here.mp4")).err().unwrap();
        assert!(matches!(err, Error::VideoOpen { .. }));
    }
}
