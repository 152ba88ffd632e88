//! Video orientation inference.
//!
//! Frames are read from the start of the video. For every frame, each
//! candidate rotation is applied in [`Rotation::PRIORITY`] order and the
//! detector is run; the face count is added to that candidate's running
//! total. The first candidate whose total reaches [`VOTE_THRESHOLD`] wins,
//! even in the middle of a frame, so ties inside one frame go to the
//! earlier candidate.

use image::{DynamicImage, GrayImage};
use tracing::{info, warn};

use crate::detect::FaceDetector;
use crate::error::Result;
use crate::video::{Rotation, VideoSource};

/// Accumulated face count a rotation needs to be chosen.
pub const VOTE_THRESHOLD: u32 = 5;

/// Rotation used when the video ends before any candidate wins.
pub const FALLBACK_ROTATION: Rotation = Rotation::None;

/// Running per-rotation face counts.
#[derive(Debug, Clone, Default)]
pub struct OrientationVote {
    counts: [u32; 4],
}

impl OrientationVote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `faces` to the candidate's total. Returns the candidate once its
    /// total reaches the threshold.
    pub fn observe(&mut self, rotation: Rotation, faces: usize) -> Option<Rotation> {
        let slot = &mut self.counts[priority_index(rotation)];
        *slot = slot.saturating_add(faces as u32);
        (*slot >= VOTE_THRESHOLD).then_some(rotation)
    }

    pub fn count(&self, rotation: Rotation) -> u32 {
        self.counts[priority_index(rotation)]
    }
}

fn priority_index(rotation: Rotation) -> usize {
    match rotation {
        Rotation::None => 0,
        Rotation::Clockwise90 => 1,
        Rotation::Rotate180 => 2,
        Rotation::CounterClockwise90 => 3,
    }
}

/// Infer the rotation that makes faces upright.
///
/// Reads `source` from its current position (normally a freshly opened
/// video). Falls back to [`FALLBACK_ROTATION`] when the video runs out.
pub fn detect_orientation<S, D>(source: &mut S, detector: &mut D) -> Result<Rotation>
where
    S: VideoSource + ?Sized,
    D: FaceDetector + ?Sized,
{
    let mut vote = OrientationVote::new();
    let mut frames = 0u32;

    while let Some(frame) = source.next_frame()? {
        frames += 1;
        let gray: GrayImage = DynamicImage::ImageRgb8(frame).into_luma8();

        for rotation in Rotation::PRIORITY {
            let faces = if rotation == Rotation::None {
                detector.detect(&gray)
            } else {
                detector.detect(&rotation.apply(&gray))
            };

            if let Some(winner) = vote.observe(rotation, faces.len()) {
                info!(rotation = %winner, frames, "orientation detected");
                return Ok(winner);
            }
        }
    }

    warn!(
        frames,
        fallback = %FALLBACK_ROTATION,
        "no orientation reached the vote threshold"
    );
    Ok(FALLBACK_ROTATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceBox;
    use crate::video::VideoInfo;
    use image::{Rgb, RgbImage};

    /// Replays synthetic per-frame counts for each rotation through the vote.
    fn replay(per_frame: impl Fn(u32, Rotation) -> usize, frames: u32) -> Option<(u32, Rotation)> {
        let mut vote = OrientationVote::new();
        for frame in 1..=frames {
            for rotation in Rotation::PRIORITY {
                if let Some(winner) = vote.observe(rotation, per_frame(frame, rotation)) {
                    return Some((frame, winner));
                }
            }
        }
        None
    }

    #[test]
    fn earliest_threshold_wins() {
        // 180 reaches 5 at frame 8; none would only reach 5 at frame 12.
        let counts = |frame: u32, rotation: Rotation| match rotation {
            Rotation::Rotate180 if frame >= 4 => 1,
            Rotation::None if frame >= 8 => 1,
            _ => 0,
        };
        assert_eq!(replay(counts, 20), Some((8, Rotation::Rotate180)));
    }

    #[test]
    fn ties_within_a_frame_follow_priority() {
        let counts = |_frame: u32, rotation: Rotation| match rotation {
            Rotation::Clockwise90 | Rotation::CounterClockwise90 => 5,
            _ => 0,
        };
        assert_eq!(replay(counts, 1), Some((1, Rotation::Clockwise90)));
    }

    #[test]
    fn vote_accumulates_across_frames() {
        let mut vote = OrientationVote::new();
        assert_eq!(vote.observe(Rotation::None, 2), None);
        assert_eq!(vote.observe(Rotation::None, 2), None);
        assert_eq!(vote.count(Rotation::None), 4);
        assert_eq!(vote.observe(Rotation::None, 1), Some(Rotation::None));
    }

    struct Frames {
        remaining: u32,
        frame: RgbImage,
    }

    impl VideoSource for Frames {
        fn info(&self) -> VideoInfo {
            VideoInfo {
                width: self.frame.width(),
                height: self.frame.height(),
                fps: 30.0,
                frame_count: self.remaining,
            }
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(self.frame.clone()))
        }
    }

    /// Reports one face whenever the top-left pixel is bright.
    struct CornerDetector;

    impl FaceDetector for CornerDetector {
        fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
            if frame.get_pixel(0, 0)[0] > 128 {
                vec![FaceBox::new(0, 0, 1, 1)]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn detects_upside_down_video() {
        // marker in the bottom-right corner only reaches (0, 0) after 180 degrees
        let mut frame = RgbImage::new(8, 6);
        frame.put_pixel(7, 5, Rgb([255, 255, 255]));
        let mut source = Frames { remaining: 10, frame };

        let rotation = detect_orientation(&mut source, &mut CornerDetector).unwrap();
        assert_eq!(rotation, Rotation::Rotate180);
        // five frames were enough
        assert_eq!(source.remaining, 5);
    }

    #[test]
    fn exhausted_video_falls_back() {
        let frame = RgbImage::new(8, 6);
        let mut source = Frames { remaining: 3, frame };

        let rotation = detect_orientation(&mut source, &mut CornerDetector).unwrap();
        assert_eq!(rotation, FALLBACK_ROTATION);
    }
}
