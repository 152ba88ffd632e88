//! Face detection and landmark capabilities.
//!
//! The analysis core only sees the [`FaceDetector`] and
//! [`LandmarkPredictor`] traits. Concrete backends:
//! - [`RustfaceDetector`]: SeetaFace detector from the `rustface` crate,
//!   tuned per tier with [`DetectorSettings`].
//! - [`DlibLandmarker`]: dlib's 68-point regression-tree model, run natively.
//! - `LbfLandmarker`: OpenCV FacemarkLBF 68-point model (feature `opencv`).

use std::path::Path;

use image::GrayImage;

use crate::config::DetectorSettings;
use crate::error::{Error, Result};
use crate::shape::ShapePredictor;
use crate::types::{FaceBox, Landmarks, LANDMARK_COUNT};

/// Finds face rectangles in a grayscale frame.
pub trait FaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox>;
}

/// Locates the 68 facial landmarks inside a face rectangle.
pub trait LandmarkPredictor {
    fn predict(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Landmarks>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
        (**self).detect(frame)
    }
}

impl<P: LandmarkPredictor + ?Sized> LandmarkPredictor for Box<P> {
    fn predict(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Landmarks> {
        (**self).predict(frame, face)
    }
}

/// SeetaFace frontal detector.
pub struct RustfaceDetector {
    detector: Box<dyn rustface::Detector>,
    settings: DetectorSettings,
}

impl RustfaceDetector {
    pub fn load<P: AsRef<Path>>(model: P, settings: DetectorSettings) -> Result<Self> {
        let model = model.as_ref();
        let path = model
            .to_str()
            .ok_or_else(|| Error::Detector(format!("invalid model path {model:?}")))?;
        let mut detector = rustface::create_detector(path)
            .map_err(|e| Error::Detector(format!("failed to load {path}: {e}")))?;

        detector.set_min_face_size(settings.min_face_size);
        detector.set_score_thresh(settings.score_thresh);
        detector.set_pyramid_scale_factor(settings.pyramid_scale_factor);
        detector.set_slide_window_step(settings.slide_window_step, settings.slide_window_step);

        Ok(Self { detector, settings })
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Vec<FaceBox> {
        let (width, height) = frame.dimensions();
        let image = rustface::ImageData::new(frame.as_raw(), width, height);

        self.detector
            .detect(&image)
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceBox::from_origin_size(bbox.x(), bbox.y(), bbox.width(), bbox.height())
            })
            .collect()
    }
}

/// dlib `shape_predictor` model, e.g. `shape_predictor_68_face_landmarks.dat.bz2`.
pub struct DlibLandmarker {
    model: ShapePredictor,
}

impl DlibLandmarker {
    pub fn load<P: AsRef<Path>>(model: P) -> Result<Self> {
        Self::new(ShapePredictor::load(model)?)
    }

    /// Only 68-point models can feed the eye metrics.
    pub fn new(model: ShapePredictor) -> Result<Self> {
        if model.num_landmarks() != LANDMARK_COUNT {
            return Err(Error::InvalidModel(format!(
                "expected a {LANDMARK_COUNT}-point model, got {} points",
                model.num_landmarks()
            )));
        }
        Ok(Self { model })
    }
}

impl LandmarkPredictor for DlibLandmarker {
    fn predict(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Landmarks> {
        let points = self.model.predict(frame, face);
        Landmarks::from_points(&points).ok_or_else(|| {
            Error::Landmark(format!("expected 68 landmarks, got {}", points.len()))
        })
    }
}

#[cfg(feature = "opencv")]
pub use self::lbf::LbfLandmarker;

#[cfg(feature = "opencv")]
mod lbf {
    use std::path::Path;

    use image::GrayImage;
    use opencv::core::{Mat, Point2f, Ptr, Rect, Vector};
    use opencv::face::{FacemarkLBF, FacemarkLBF_Params, FacemarkTrait};
    use opencv::prelude::*;

    use super::LandmarkPredictor;
    use crate::error::{Error, Result};
    use crate::types::{FaceBox, Landmarks, Point};

    fn cv_err(e: opencv::Error) -> Error {
        Error::Landmark(e.to_string())
    }

    /// OpenCV FacemarkLBF predictor (e.g. `lbfmodel.yaml`).
    pub struct LbfLandmarker {
        facemark: Ptr<FacemarkLBF>,
    }

    impl LbfLandmarker {
        pub fn load<P: AsRef<Path>>(model: P) -> Result<Self> {
            let model = model.as_ref();
            let path = model
                .to_str()
                .ok_or_else(|| Error::Landmark(format!("invalid model path {model:?}")))?;

            let params = FacemarkLBF_Params::default().map_err(cv_err)?;
            let mut facemark = FacemarkLBF::create(&params).map_err(cv_err)?;
            facemark.load_model(path).map_err(cv_err)?;

            Ok(Self { facemark })
        }
    }

    impl LandmarkPredictor for LbfLandmarker {
        fn predict(&mut self, frame: &GrayImage, face: &FaceBox) -> Result<Landmarks> {
            let (width, height) = frame.dimensions();
            let flat = Mat::from_slice(frame.as_raw()).map_err(cv_err)?;
            let mat = flat.reshape(1, height as i32).map_err(cv_err)?;
            debug_assert_eq!(mat.cols(), width as i32);

            let faces = Vector::<Rect>::from_iter([Rect::new(
                face.left,
                face.top,
                face.width(),
                face.height(),
            )]);
            let mut fitted = Vector::<Vector<Point2f>>::new();

            let ok = self.facemark.fit(&mat, &faces, &mut fitted).map_err(cv_err)?;
            if !ok || fitted.is_empty() {
                return Err(Error::Landmark("facemark fit returned no shape".into()));
            }

            let points: Vec<Point> = fitted
                .get(0)
                .map_err(cv_err)?
                .iter()
                .map(|p| Point::new(p.x, p.y))
                .collect();

            Landmarks::from_points(&points).ok_or_else(|| {
                Error::Landmark(format!("expected 68 landmarks, got {}", points.len()))
            })
        }
    }
}
