//! Synthetic video and detector backends shared by the integration tests.
//!
//! Frames are uniform gray. A frame brighter than [`FACE_LEVEL`] contains one
//! centered face, and its brightness, in steps of ten, drives the eye
//! opening.

#![allow(dead_code)]

use std::cell::Cell;
use std::path::{Path, PathBuf};

use blinkscan::{
    DataLayout, Error, FaceBox, FaceDetector, FrameAnalyzer, LandmarkPredictor, Landmarks, Point,
    Result, Rotation, VideoInfo, VideoOpener, VideoSource, LANDMARK_COUNT,
};
use image::{GrayImage, Rgb, RgbImage};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const FPS: f64 = 30.0;
pub const FACE_LEVEL: u8 = 64;

/// One synthetic frame; `None` is a frame without a face.
pub fn frame(level: Option<u8>) -> RgbImage {
    let v = level.unwrap_or(0);
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([v, v, v]))
}

/// Brightness for frame `index` (1-based) of a face frame.
pub fn face_level(index: u32) -> u8 {
    100 + 10 * (index % 15) as u8
}

/// Lid offset the mock predictor derives from a gray level.
fn lid_height(gray: u8) -> f32 {
    let bucket = (u32::from(gray) + 5) / 10;
    bucket as f32 / 5.0
}

/// EAR of both eyes in a frame of the given brightness.
pub fn ear_at(level: u8) -> f32 {
    // two lid distances of 2h over twice the 40 px eye width
    lid_height(level) / 20.0
}

/// Frame plan: `true` at position i means frame i+1 has a face.
pub fn frames_from_plan(plan: &[bool]) -> Vec<RgbImage> {
    plan.iter()
        .enumerate()
        .map(|(i, &face)| frame(face.then(|| face_level(i as u32 + 1))))
        .collect()
}

/// A face frame whose bottom row is black, so it only reads as a face the
/// right way up.
pub fn chin_frame(level: u8) -> RgbImage {
    let mut img = frame(Some(level));
    for x in 0..WIDTH {
        img.put_pixel(x, HEIGHT - 1, Rgb([0, 0, 0]));
    }
    img
}

/// `frames` as a camera mounted with `mounted` would store them; applying
/// `mounted` to a stored frame gives the upright one back.
pub fn stored_as(mounted: Rotation, frames: Vec<RgbImage>) -> Vec<RgbImage> {
    let undo = match mounted {
        Rotation::None => return frames,
        Rotation::Clockwise90 => Rotation::CounterClockwise90,
        Rotation::Rotate180 => Rotation::Rotate180,
        Rotation::CounterClockwise90 => Rotation::Clockwise90,
    };
    frames.iter().map(|f| undo.apply(f)).collect()
}

pub struct MemoryVideo {
    frames: std::vec::IntoIter<RgbImage>,
    /// Decoding fails when this frame (1-based) is reached.
    fail_at: Option<u32>,
    decoded: u32,
}

impl MemoryVideo {
    fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into_iter(),
            fail_at: None,
            decoded: 0,
        }
    }
}

impl VideoSource for MemoryVideo {
    fn info(&self) -> VideoInfo {
        let (width, height) = self
            .frames
            .as_slice()
            .first()
            .map_or((WIDTH, HEIGHT), |f| f.dimensions());
        VideoInfo {
            width,
            height,
            fps: FPS,
            frame_count: self.frames.len() as u32,
        }
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        self.decoded += 1;
        if self.fail_at == Some(self.decoded) {
            return Err(Error::Ffmpeg {
                message: format!("decoder died at frame {}", self.decoded),
                stderr: None,
            });
        }
        Ok(self.frames.next())
    }
}

/// Opens the same in-memory frames for any path.
pub struct MemoryOpener {
    pub frames: Vec<RgbImage>,
}

impl VideoOpener for MemoryOpener {
    type Source = MemoryVideo;

    fn open(&self, _path: &Path) -> Result<MemoryVideo> {
        Ok(MemoryVideo::new(self.frames.clone()))
    }
}

/// Like [`MemoryOpener`], but the analysis pass (the second open) stops
/// with a decode error at frame `fail_at`.
pub struct BrokenOpener {
    pub frames: Vec<RgbImage>,
    pub fail_at: u32,
    opened: Cell<u32>,
}

impl BrokenOpener {
    pub fn new(frames: Vec<RgbImage>, fail_at: u32) -> Self {
        Self {
            frames,
            fail_at,
            opened: Cell::new(0),
        }
    }
}

impl VideoOpener for BrokenOpener {
    type Source = MemoryVideo;

    fn open(&self, _path: &Path) -> Result<MemoryVideo> {
        self.opened.set(self.opened.get() + 1);
        let mut video = MemoryVideo::new(self.frames.clone());
        if self.opened.get() > 1 {
            video.fail_at = Some(self.fail_at);
        }
        Ok(video)
    }
}

/// Finds one face covering the middle half of any bright frame.
pub struct BrightFaceDetector;

impl FaceDetector for BrightFaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
        if frame.get_pixel(0, 0).0[0] <= FACE_LEVEL {
            return Vec::new();
        }
        let (w, h) = (frame.width() as i32, frame.height() as i32);
        vec![FaceBox::new(w / 4, h / 4, w * 3 / 4, h * 3 / 4)]
    }
}

/// Finds nothing, ever.
pub struct BlindDetector;

impl FaceDetector for BlindDetector {
    fn detect(&mut self, _frame: &GrayImage) -> Vec<FaceBox> {
        Vec::new()
    }
}

/// Needs the black chin row of [`chin_frame`] at the bottom of a bright
/// image. The face it reports, 30..40 across a 64px frame, is inside the
/// center band at that width but not at 48px.
pub struct UprightDetector;

impl FaceDetector for UprightDetector {
    fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
        let (w, h) = frame.dimensions();
        let level = |x, y| frame.get_pixel(x, y).0[0];
        let upright = level(0, 0) > FACE_LEVEL
            && level(w - 1, 0) > FACE_LEVEL
            && level(0, h - 1) == 0
            && level(w - 1, h - 1) == 0;
        if !upright {
            return Vec::new();
        }
        let (w, h) = (w as i32, h as i32);
        vec![FaceBox::new(w * 15 / 32, h / 4, w * 5 / 8, h * 3 / 4)]
    }
}

/// Eyes 40px wide whose lids open by an amount derived from the brightness.
pub struct BrightnessLandmarks;

impl LandmarkPredictor for BrightnessLandmarks {
    fn predict(&mut self, frame: &GrayImage, _face: &FaceBox) -> Result<Landmarks> {
        Ok(face_with_lids(lid_height(frame.get_pixel(0, 0).0[0])))
    }
}

/// A face with both eyes 40px wide and lids `h` above and below the corners.
pub fn face_with_lids(h: f32) -> Landmarks {
    let mut points = [Point::zero(); LANDMARK_COUNT];
    for (outer, inner, top_a, top_b, bottom_a, bottom_b, x0) in [
        (36, 39, 37, 38, 41, 40, 100.0f32),
        (45, 42, 44, 43, 46, 47, 180.0f32),
    ] {
        points[outer] = Point::new(x0, 100.0);
        points[inner] = Point::new(x0 + 40.0, 100.0);
        points[top_a] = Point::new(x0 + 10.0, 100.0 - h);
        points[top_b] = Point::new(x0 + 30.0, 100.0 - h);
        points[bottom_a] = Point::new(x0 + 10.0, 100.0 + h);
        points[bottom_b] = Point::new(x0 + 30.0, 100.0 + h);
    }
    points[48] = Point::new(100.0, 160.0);
    points[54] = Point::new(220.0, 160.0);
    Landmarks::new(points)
}

pub fn analyzer() -> FrameAnalyzer {
    FrameAnalyzer::new(Box::new(BrightFaceDetector), Box::new(BrightnessLandmarks))
}

/// A scratch data directory and a stand-in video file to hash.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub layout: DataLayout,
    pub video: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path().join("data"));
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really an mp4, only hashed").unwrap();
        Self { dir, layout, video }
    }
}
