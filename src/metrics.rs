//! Eye-region measurements derived from 68-point landmarks.
//!
//! All lengths are euclidean distances in pixels. The eye aspect ratio
//! (EAR) is dimensionless and therefore unchanged by uniform scaling of the
//! landmark coordinates.

use crate::types::{Eye, EyePair, Landmarks};

/// Landmark indices describing one eye and its mouth corner.
#[derive(Debug, Clone, Copy)]
struct EyeIndices {
    /// Inner vertical lid pair (A).
    inner_top: usize,
    inner_bottom: usize,
    /// Outer vertical lid pair (B).
    outer_top: usize,
    outer_bottom: usize,
    /// Horizontal corner pair (C).
    inner_corner: usize,
    outer_corner: usize,
    /// Mouth corner on the same side of the face.
    mouth_corner: usize,
}

const LEFT_EYE: EyeIndices = EyeIndices {
    inner_top: 43,
    inner_bottom: 47,
    outer_top: 44,
    outer_bottom: 46,
    inner_corner: 42,
    outer_corner: 45,
    mouth_corner: 54,
};

const RIGHT_EYE: EyeIndices = EyeIndices {
    inner_top: 38,
    inner_bottom: 40,
    outer_top: 37,
    outer_bottom: 41,
    inner_corner: 39,
    outer_corner: 36,
    mouth_corner: 48,
};

fn indices(eye: Eye) -> EyeIndices {
    match eye {
        Eye::Left => LEFT_EYE,
        Eye::Right => RIGHT_EYE,
    }
}

/// Per-frame eye metrics for both eyes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeMetrics {
    /// Eye aspect ratio, (A + B) / (2 C).
    pub ear: EyePair<f32>,
    /// Horizontal corner-to-corner distance (C).
    pub width: EyePair<f32>,
    /// Inner vertical lid distance (A).
    pub inner_height: EyePair<f32>,
    /// Outer eye corner to the mouth corner on the same side.
    pub eye_to_mouth: EyePair<f32>,
}

impl EyeMetrics {
    pub fn from_landmarks(marks: &Landmarks) -> Self {
        let left = single_eye(marks, Eye::Left);
        let right = single_eye(marks, Eye::Right);

        Self {
            ear: EyePair::new(left.ear, right.ear),
            width: EyePair::new(left.width, right.width),
            inner_height: EyePair::new(left.inner_height, right.inner_height),
            eye_to_mouth: EyePair::new(left.eye_to_mouth, right.eye_to_mouth),
        }
    }

    /// Eye widths as a percentage of the given per-eye maxima.
    pub fn width_percent(&self, max_width: &EyePair<f32>) -> EyePair<f32> {
        EyePair::new(
            ratio(self.width.left, max_width.left),
            ratio(self.width.right, max_width.right),
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct SingleEye {
    ear: f32,
    width: f32,
    inner_height: f32,
    eye_to_mouth: f32,
}

fn single_eye(marks: &Landmarks, eye: Eye) -> SingleEye {
    let idx = indices(eye);

    let a = marks[idx.inner_top].distance(&marks[idx.inner_bottom]);
    let b = marks[idx.outer_top].distance(&marks[idx.outer_bottom]);
    let c = marks[idx.inner_corner].distance(&marks[idx.outer_corner]);

    SingleEye {
        ear: eye_aspect_ratio(a, b, c),
        width: c,
        inner_height: a,
        eye_to_mouth: marks[idx.outer_corner].distance(&marks[idx.mouth_corner]),
    }
}

/// EAR for one eye. A degenerate eye (zero width) yields 0.
pub fn eye_aspect_ratio(a: f32, b: f32, c: f32) -> f32 {
    if c > 0.0 {
        (a + b) / (2.0 * c)
    } else {
        0.0
    }
}

/// Calculate percentage ratio, handling division by zero.
pub(crate) fn ratio(numerator: f32, denominator: f32) -> f32 {
    if denominator > 0.0 {
        (numerator / denominator) * 100.0
    } else {
        0.0
    }
}
