use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of points in the iBUG 68-point annotation scheme.
pub const LANDMARK_COUNT: usize = 68;

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let d = *self - *other;
        (d.x * d.x + d.y * d.y).sqrt()
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// An axis-aligned face rectangle in pixel coordinates.
///
/// Edges follow the detector convention: `left`/`top` inclusive,
/// `right`/`bottom` exclusive, so `area = (right - left) * (bottom - top)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceBox {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build a box from a top-left corner and a size, as face detectors report it.
    pub fn from_origin_size(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self::new(x, y, x + width as i32, y + height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Smallest box containing both `self` and `other`.
    pub fn union(&self, other: &FaceBox) -> FaceBox {
        FaceBox::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }
}

/// The 68 facial landmarks of one face, in image coordinates.
///
/// Indices 36-41 outline the subject's right eye, 42-47 the left eye and
/// 48-67 the mouth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmarks {
    points: [Point; LANDMARK_COUNT],
}

impl Landmarks {
    pub fn new(points: [Point; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Returns `None` unless exactly 68 points are supplied.
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let points: [Point; LANDMARK_COUNT] = points.try_into().ok()?;
        Some(Self { points })
    }

    pub fn points(&self) -> &[Point; LANDMARK_COUNT] {
        &self.points
    }

    /// Scale every coordinate by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self.points.map(|p| p * factor),
        }
    }

    /// Flatten to `[x0, y0, x1, y1, ...]`.
    pub fn to_flat_vec(&self) -> Vec<f32> {
        let mut v = Vec::with_capacity(LANDMARK_COUNT * 2);
        for p in &self.points {
            v.push(p.x);
            v.push(p.y);
        }
        v
    }
}

impl std::ops::Index<usize> for Landmarks {
    type Output = Point;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.points[idx]
    }
}

/// Which of the subject's eyes a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    /// Landmarks 42-47.
    Left,
    /// Landmarks 36-41.
    Right,
}

/// A value measured once per eye.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyePair<T> {
    pub left: T,
    pub right: T,
}

impl<T> EyePair<T> {
    pub const fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn get(&self, eye: Eye) -> &T {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> EyePair<U> {
        EyePair {
            left: f(self.left),
            right: f(self.right),
        }
    }

    pub fn zip<U>(self, other: EyePair<U>) -> EyePair<(T, U)> {
        EyePair {
            left: (self.left, other.left),
            right: (self.right, other.right),
        }
    }
}

/// Which detection capability produced the faces of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorStage {
    /// Fast, approximate detector.
    Primary,
    /// Slow, accurate fallback detector.
    Secondary,
}

impl DetectorStage {
    /// Single-letter tag used in the cache file.
    pub fn code(&self) -> &'static str {
        match self {
            DetectorStage::Primary => "h",
            DetectorStage::Secondary => "c",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "h" => Some(DetectorStage::Primary),
            "c" => Some(DetectorStage::Secondary),
            _ => None,
        }
    }
}

impl fmt::Display for DetectorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorStage::Primary => f.write_str("primary"),
            DetectorStage::Secondary => f.write_str("secondary"),
        }
    }
}
