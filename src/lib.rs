//! # blinkscan
//!
//! Frame-by-frame eye-region analysis of face videos, with a
//! content-addressed cache of the per-frame results.
//!
//! This crate provides:
//! - **Frame analysis**: two-tier face detection, center-face target
//!   selection and 68-point landmark extraction per frame
//! - **Orientation inference**: finds the rotation that makes faces upright
//! - **Result cache**: one CSV row per analyzed frame, keyed by the video's
//!   name and a digest of its first 64 KiB, rebuilt or extended atomically
//! - **Analytics**: eye metric statistics, continuous and threshold segment
//!   search, blink counting
//!
//! ## Pipeline
//!
//! 1. Hash the video prefix to find its cache path
//! 2. Run the primary detector over rotated frames until one rotation has
//!    seen five faces
//! 3. Decode every frame, rotate it, analyze it and append a row on success
//! 4. Rename the finished cache over the old one
//!
//! Frames that fail analysis leave a gap in the cache. Every later query
//! treats a gap as "no data" rather than as a zero row.
//!
//! ## Target selection
//!
//! ```rust
//! use blinkscan::{resolve_target, FaceBox};
//!
//! // a 100px wide frame; only the second face overlaps the 40%..60% band
//! let faces = [FaceBox::new(0, 0, 30, 30), FaceBox::new(45, 10, 55, 20)];
//! let selection = resolve_target(&faces, 100);
//!
//! assert_eq!(selection.target, Some(faces[1]));
//! assert_eq!(selection.center_count, 1);
//! ```
//!
//! ## Backends
//!
//! Decoding shells out to `ffmpeg`/`ffprobe`. Face detection uses the
//! SeetaFace model through `rustface`. Landmarks come from a dlib
//! `shape_predictor` model evaluated in Rust ([`DlibLandmarker`]), or from
//! OpenCV's FacemarkLBF when built with the `opencv` feature. Any type
//! implementing [`LandmarkPredictor`] can be used instead.

mod analyzer;
mod blink;
mod cache;
mod config;
mod detect;
mod dlib;
mod error;
mod logging;
mod metrics;
mod orientation;
mod pipeline;
mod record;
mod recipe;
mod segments;
mod shape;
mod stats;
mod target;
mod types;
mod video;

pub use analyzer::{FrameAnalysis, FrameAnalyzer, FrameFailure, FrameOutcome};
pub use blink::{count_blinks, BlinkCounter, BlinkEvent, BlinkSummary, FrameBlink};
pub use cache::{
    in_range, CacheEntry, CacheLock, CacheReader, CacheWriter, ContentKey, DIGEST_PREFIX_LEN,
};
pub use config::{CachePolicy, DataLayout, DetectorSettings, EngineConfig};
pub use detect::{DlibLandmarker, FaceDetector, LandmarkPredictor, RustfaceDetector};
pub use dlib::{load_shape_predictor, read_shape_predictor};
#[cfg(feature = "opencv")]
pub use detect::LbfLandmarker;
pub use error::{Error, Result};
pub use logging::{log_file_name, LogConfig, RunLog};
pub use metrics::{eye_aspect_ratio, EyeMetrics};
pub use orientation::{detect_orientation, OrientationVote, FALLBACK_ROTATION, VOTE_THRESHOLD};
pub use pipeline::{build_cache, BuildReport};
pub use record::{header as cache_header, FrameRecord, COLUMN_COUNT, SCHEMA_VERSION_LINE};
pub use recipe::{Recipe, RecipeEntry};
pub use segments::{
    best_fit, find_continuous_frames, find_frontal_frames, find_width_threshold_frames,
    frames_for, BestFit, SearchMode, Segment, FRONTAL_LOOSENESS, WIDTH_LOOSENESS,
};
pub use shape::{CascadeStage, RegressionTree, ShapePredictor, Similarity, Split};
pub use stats::{eye_to_mouth_motion, face_bounds, StatTriple, Statistics};
pub use target::{is_center_candidate, resolve_target, TargetSelection};
pub use types::{DetectorStage, Eye, EyePair, FaceBox, Landmarks, Point, LANDMARK_COUNT};
pub use video::{probe, FfmpegOpener, FfmpegVideo, Rotation, VideoInfo, VideoOpener, VideoSource};
