//! Picks the subject face out of everything a detector found in a frame.

use crate::types::FaceBox;

/// Left edge of the center band, as a fraction of frame width.
const BAND_LEFT: f64 = 0.4;
/// Right edge of the center band, as a fraction of frame width.
const BAND_RIGHT: f64 = 0.6;

/// Result of target resolution for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSelection {
    pub target: Option<FaceBox>,
    /// Number of boxes overlapping the center band.
    pub center_count: usize,
}

/// Whether `face` horizontally overlaps the middle band of a frame.
pub fn is_center_candidate(face: &FaceBox, frame_width: u32) -> bool {
    let width = f64::from(frame_width);
    f64::from(face.left) < width * BAND_RIGHT && f64::from(face.right) > width * BAND_LEFT
}

/// Choose the target face.
///
/// A single center candidate wins outright. With several, the largest area
/// wins and equal areas keep the earliest box in detector order.
pub fn resolve_target(faces: &[FaceBox], frame_width: u32) -> TargetSelection {
    let mut center_count = 0;
    let mut target: Option<FaceBox> = None;

    for face in faces.iter().filter(|f| is_center_candidate(f, frame_width)) {
        center_count += 1;
        match target {
            Some(best) if face.area() <= best.area() => {}
            _ => target = Some(*face),
        }
    }

    TargetSelection {
        target,
        center_count,
    }
}
