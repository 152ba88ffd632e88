//! Per-frame analysis state machine.
//!
//! ```text
//! Init -> PrimaryDetect -> TargetSelect    -> LandmarkExtract -> Success
//!                       \-> SecondaryDetect -/                 \-> Fail
//! ```
//!
//! Every call to [`FrameAnalyzer::analyze`] starts from `Init`; only the
//! `allow_fallback` setting carries over between frames.

use image::{imageops, GrayImage, RgbImage};
use tracing::debug;

use crate::detect::{FaceDetector, LandmarkPredictor};
use crate::error::Result;
use crate::metrics::EyeMetrics;
use crate::target::resolve_target;
use crate::types::{DetectorStage, FaceBox, Landmarks};

/// A successfully analyzed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub stage: DetectorStage,
    pub total_faces: usize,
    pub center_faces: usize,
    pub target: FaceBox,
    pub landmarks: Landmarks,
    pub metrics: EyeMetrics,
}

/// Why a frame produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFailure {
    /// The last detector that ran found no face.
    NoFace { stage: DetectorStage },
    /// Faces were found but none overlapped the center band.
    NoTarget { stage: DetectorStage, faces: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Success(FrameAnalysis),
    Failed(FrameFailure),
}

impl FrameOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FrameOutcome::Success(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum AnalyzerState {
    Init,
    PrimaryDetect,
    SecondaryDetect,
    TargetSelect,
    LandmarkExtract(FaceBox),
}

/// Runs detection, target selection and landmark extraction on frames.
pub struct FrameAnalyzer {
    primary: Box<dyn FaceDetector>,
    secondary: Option<Box<dyn FaceDetector>>,
    landmarks: Box<dyn LandmarkPredictor>,
    allow_fallback: bool,
}

impl FrameAnalyzer {
    pub fn new(primary: Box<dyn FaceDetector>, landmarks: Box<dyn LandmarkPredictor>) -> Self {
        Self {
            primary,
            secondary: None,
            landmarks,
            allow_fallback: false,
        }
    }

    /// Attach the slow fallback detector.
    pub fn with_secondary(mut self, secondary: Box<dyn FaceDetector>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = allow;
        self
    }

    pub fn set_fallback(&mut self, allow: bool) {
        self.allow_fallback = allow;
    }

    pub fn allow_fallback(&self) -> bool {
        self.allow_fallback
    }

    /// The primary detector, also used for orientation inference.
    pub fn primary_mut(&mut self) -> &mut dyn FaceDetector {
        self.primary.as_mut()
    }

    /// Analyze one frame that has already been rotated upright.
    ///
    /// Detection and target failures are reported as
    /// [`FrameOutcome::Failed`]; only backend errors are returned as `Err`.
    pub fn analyze(&mut self, frame: &RgbImage) -> Result<FrameOutcome> {
        let mut state = AnalyzerState::Init;
        let mut fallback = self.allow_fallback && self.secondary.is_some();

        let mut gray = GrayImage::new(0, 0);
        let mut faces: Vec<FaceBox> = Vec::new();
        let mut stage = DetectorStage::Primary;
        let mut center_faces = 0;

        loop {
            state = match state {
                AnalyzerState::Init => {
                    gray = imageops::grayscale(frame);
                    AnalyzerState::PrimaryDetect
                }
                AnalyzerState::PrimaryDetect => {
                    stage = DetectorStage::Primary;
                    faces = self.primary.detect(&gray);

                    if !faces.is_empty() {
                        AnalyzerState::TargetSelect
                    } else if fallback {
                        debug!("no face from primary detector, trying secondary");
                        AnalyzerState::SecondaryDetect
                    } else {
                        return Ok(FrameOutcome::Failed(FrameFailure::NoFace { stage }));
                    }
                }
                AnalyzerState::SecondaryDetect => {
                    stage = DetectorStage::Secondary;
                    faces = match self.secondary.as_mut() {
                        Some(detector) => detector.detect(&gray),
                        None => Vec::new(),
                    };

                    if faces.is_empty() {
                        return Ok(FrameOutcome::Failed(FrameFailure::NoFace { stage }));
                    }
                    AnalyzerState::TargetSelect
                }
                AnalyzerState::TargetSelect => {
                    let selection = resolve_target(&faces, gray.width());
                    center_faces = selection.center_count;

                    match selection.target {
                        Some(target) => AnalyzerState::LandmarkExtract(target),
                        None if fallback => {
                            debug!(faces = faces.len(), "no center face, retrying with secondary");
                            fallback = false;
                            AnalyzerState::SecondaryDetect
                        }
                        None => {
                            return Ok(FrameOutcome::Failed(FrameFailure::NoTarget {
                                stage,
                                faces: faces.len(),
                            }));
                        }
                    }
                }
                AnalyzerState::LandmarkExtract(target) => {
                    let landmarks = self.landmarks.predict(&gray, &target)?;
                    let metrics = EyeMetrics::from_landmarks(&landmarks);

                    return Ok(FrameOutcome::Success(FrameAnalysis {
                        stage,
                        total_faces: faces.len(),
                        center_faces,
                        target,
                        landmarks,
                        metrics,
                    }));
                }
            };
        }
    }
}
