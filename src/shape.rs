//! Cascaded regression-tree landmark predictor.
//!
//! This is the model dlib calls a `shape_predictor` (Kazemi & Sullivan,
//! "One Millisecond Face Alignment with an Ensemble of Regression Trees").
//! Shapes are kept in face-box coordinates, where `(0, 0)` is the top-left
//! corner of the box and `(1, 1)` the bottom-right one, and are only mapped
//! into the frame once the cascade has run.
//!
//! ```ignore
//! let model = ShapePredictor::load("shape_predictor_68_face_landmarks.dat.bz2")?;
//! let points = model.predict(&gray, &FaceBox::new(120, 80, 320, 280));
//! ```

use std::path::Path;

use image::GrayImage;

use crate::error::{Error, Result};
use crate::types::{FaceBox, Point};

/// A node test: go left when `pixel[a] - pixel[b] > threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub a: usize,
    pub b: usize,
    pub threshold: f32,
}

/// A complete binary tree stored breadth-first.
///
/// Node `i` has children `2i + 1` and `2i + 2`; nodes past the last split
/// are leaves, each holding one offset per landmark.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    splits: Vec<Split>,
    leaves: Vec<Vec<Point>>,
}

impl RegressionTree {
    pub fn new(splits: Vec<Split>, leaves: Vec<Vec<Point>>) -> Result<Self> {
        if leaves.len() != splits.len() + 1 {
            return Err(Error::InvalidModel(format!(
                "tree with {} splits needs {} leaves, got {}",
                splits.len(),
                splits.len() + 1,
                leaves.len()
            )));
        }
        Ok(Self { splits, leaves })
    }

    /// A tree without splits that always returns `delta`.
    pub fn leaf(delta: Vec<Point>) -> Self {
        Self {
            splits: Vec::new(),
            leaves: vec![delta],
        }
    }

    pub fn depth(&self) -> usize {
        (self.leaves.len() as f64).log2().ceil() as usize + 1
    }

    fn walk(&self, pixels: &[f32]) -> &[Point] {
        let mut node = 0;
        while let Some(split) = self.splits.get(node) {
            node = if pixels[split.a] - pixels[split.b] > split.threshold {
                2 * node + 1
            } else {
                2 * node + 2
            };
        }
        &self.leaves[node - self.splits.len()]
    }
}

/// One cascade level: the pixels it samples and the trees voting on them.
#[derive(Debug, Clone)]
pub struct CascadeStage {
    /// Landmark each sampled pixel is attached to.
    anchors: Vec<usize>,
    /// Offset of each sampled pixel from its anchor, in mean-shape space.
    offsets: Vec<Point>,
    trees: Vec<RegressionTree>,
}

impl CascadeStage {
    pub fn new(anchors: Vec<usize>, offsets: Vec<Point>, trees: Vec<RegressionTree>) -> Self {
        Self {
            anchors,
            offsets,
            trees,
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    fn check(&self, num_landmarks: usize) -> Result<()> {
        if self.anchors.len() != self.offsets.len() {
            return Err(Error::InvalidModel(format!(
                "{} anchors but {} pixel offsets",
                self.anchors.len(),
                self.offsets.len()
            )));
        }
        if let Some(&bad) = self.anchors.iter().find(|&&a| a >= num_landmarks) {
            return Err(Error::InvalidModel(format!(
                "anchor {bad} out of range for {num_landmarks} landmarks"
            )));
        }
        for tree in &self.trees {
            for split in &tree.splits {
                if split.a >= self.anchors.len() || split.b >= self.anchors.len() {
                    return Err(Error::InvalidModel(format!(
                        "split on pixels ({}, {}) but only {} are sampled",
                        split.a,
                        split.b,
                        self.anchors.len()
                    )));
                }
            }
            if let Some(leaf) = tree.leaves.iter().find(|l| l.len() != num_landmarks) {
                return Err(Error::InvalidModel(format!(
                    "leaf with {} offsets in a {num_landmarks}-point model",
                    leaf.len()
                )));
            }
        }
        Ok(())
    }

    /// Intensities at every sampled pixel for the current shape estimate.
    fn sample(&self, frame: &GrayImage, face: &FaceBox, shape: &[Point], warp: Similarity) -> Vec<f32> {
        self.anchors
            .iter()
            .zip(&self.offsets)
            .map(|(&anchor, &offset)| {
                let p = to_frame(face, shape[anchor] + warp.apply(offset));
                intensity(frame, p)
            })
            .collect()
    }
}

/// Rotation plus uniform scale, `[a -b; b a]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
}

impl Similarity {
    pub const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0 };

    /// Least-squares fit of the rotation and scale taking `from` to `to`,
    /// after removing the centroid of each.
    pub fn between(from: &[Point], to: &[Point]) -> Self {
        let n = from.len().min(to.len());
        if n == 0 {
            return Self::IDENTITY;
        }
        let from_mean = centroid(&from[..n]);
        let to_mean = centroid(&to[..n]);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&f, &t) in from[..n].iter().zip(&to[..n]) {
            let f = f - from_mean;
            let t = t - to_mean;
            dot += f.x * t.x + f.y * t.y;
            cross += f.x * t.y - f.y * t.x;
            norm += f.x * f.x + f.y * f.y;
        }
        if norm <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            a: dot / norm,
            b: cross / norm,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(self.a * p.x - self.b * p.y, self.b * p.x + self.a * p.y)
    }
}

fn centroid(points: &[Point]) -> Point {
    let mut sum = Point::zero();
    for &p in points {
        sum += p;
    }
    sum * (1.0 / points.len() as f32)
}

/// Face-box coordinates to frame pixels. The far corner maps onto the last
/// pixel inside the box.
fn to_frame(face: &FaceBox, p: Point) -> Point {
    let span_x = (face.width() - 1).max(1) as f32;
    let span_y = (face.height() - 1).max(1) as f32;
    Point::new(face.left as f32 + p.x * span_x, face.top as f32 + p.y * span_y)
}

/// Nearest-pixel intensity, zero outside the frame.
fn intensity(frame: &GrayImage, p: Point) -> f32 {
    let (x, y) = (p.x.round(), p.y.round());
    if x < 0.0 || y < 0.0 || x >= frame.width() as f32 || y >= frame.height() as f32 {
        return 0.0;
    }
    f32::from(frame.get_pixel(x as u32, y as u32).0[0])
}

/// A mean shape refined by a cascade of tree ensembles.
#[derive(Debug, Clone)]
pub struct ShapePredictor {
    mean_shape: Vec<Point>,
    cascade: Vec<CascadeStage>,
}

impl ShapePredictor {
    pub fn new(mean_shape: Vec<Point>, cascade: Vec<CascadeStage>) -> Result<Self> {
        if mean_shape.is_empty() {
            return Err(Error::InvalidModel("empty mean shape".into()));
        }
        for stage in &cascade {
            stage.check(mean_shape.len())?;
        }
        Ok(Self {
            mean_shape,
            cascade,
        })
    }

    /// Load a dlib `.dat` model, or a `.dat.bz2` one.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::dlib::load_shape_predictor(path.as_ref())
    }

    pub fn num_landmarks(&self) -> usize {
        self.mean_shape.len()
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.cascade.len()
    }

    /// Landmark positions, in frame pixels, for the face inside `face`.
    pub fn predict(&self, frame: &GrayImage, face: &FaceBox) -> Vec<Point> {
        let mut shape = self.mean_shape.clone();

        for stage in &self.cascade {
            let warp = Similarity::between(&self.mean_shape, &shape);
            let pixels = stage.sample(frame, face, &shape, warp);

            for tree in &stage.trees {
                for (point, &delta) in shape.iter_mut().zip(tree.walk(&pixels)) {
                    *point += delta;
                }
            }
        }

        shape.into_iter().map(|p| to_frame(face, p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn grid(n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| Point::new((i % 10) as f32 / 10.0, (i / 10) as f32 / 10.0))
            .collect()
    }

    fn uniform(n: usize, d: Point) -> Vec<Point> {
        vec![d; n]
    }

    fn assert_close(a: Point, b: Point) {
        assert!(a.distance(&b) < 1e-4, "{a:?} != {b:?}");
    }

    #[test]
    fn split_goes_left_above_threshold() {
        //        [0: p0 - p1 > 50]
        //       /                 \
        //   [1: -0.1]          [2: +0.1]
        let tree = RegressionTree::new(
            vec![Split {
                a: 0,
                b: 1,
                threshold: 50.0,
            }],
            vec![uniform(1, Point::new(-0.1, 0.0)), uniform(1, Point::new(0.1, 0.0))],
        )
        .unwrap();

        assert_eq!(tree.walk(&[100.0, 0.0])[0].x, -0.1);
        assert_eq!(tree.walk(&[50.0, 0.0])[0].x, 0.1);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn tree_needs_one_more_leaf_than_splits() {
        let split = Split {
            a: 0,
            b: 0,
            threshold: 0.0,
        };
        let err = RegressionTree::new(vec![split], vec![uniform(1, Point::zero())]).unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
    }

    #[test]
    fn zero_stage_returns_mean_shape_in_the_box() {
        let stage = CascadeStage::new(
            vec![0],
            vec![Point::zero()],
            vec![RegressionTree::leaf(uniform(68, Point::zero()))],
        );
        let model = ShapePredictor::new(grid(68), vec![stage]).unwrap();
        assert_eq!(model.num_landmarks(), 68);
        assert_eq!(model.num_cascade_stages(), 1);

        let frame = GrayImage::new(200, 200);
        // 101px wide so one face-box unit is 100px
        let points = model.predict(&frame, &FaceBox::new(50, 20, 151, 121));
        assert_close(points[0], Point::new(50.0, 20.0));
        assert_close(points[13], Point::new(80.0, 30.0));
    }

    #[test]
    fn trees_in_a_stage_add_up() {
        let stage = CascadeStage::new(
            Vec::new(),
            Vec::new(),
            vec![
                RegressionTree::leaf(uniform(3, Point::new(0.1, 0.2))),
                RegressionTree::leaf(uniform(3, Point::new(0.3, 0.4))),
            ],
        );
        let model = ShapePredictor::new(uniform(3, Point::zero()), vec![stage]).unwrap();

        let points = model.predict(&GrayImage::new(20, 20), &FaceBox::new(0, 0, 11, 11));
        assert_close(points[2], Point::new(4.0, 6.0));
    }

    #[test]
    fn sampled_pixels_steer_the_tree() {
        // pixel 0 sits on the left of the box, pixel 1 on the right
        let stage = CascadeStage::new(
            vec![0, 0],
            vec![Point::new(-0.4, 0.0), Point::new(0.4, 0.0)],
            vec![RegressionTree::new(
                vec![Split {
                    a: 0,
                    b: 1,
                    threshold: 0.0,
                }],
                vec![uniform(1, Point::new(-0.1, 0.0)), uniform(1, Point::new(0.1, 0.0))],
            )
            .unwrap()],
        );
        let model = ShapePredictor::new(vec![Point::new(0.5, 0.5)], vec![stage]).unwrap();
        let face = FaceBox::new(0, 0, 101, 101);

        let bright_left = GrayImage::from_fn(101, 101, |x, _| Luma([if x < 50 { 200 } else { 0 }]));
        let bright_right = GrayImage::from_fn(101, 101, |x, _| Luma([if x > 50 { 200 } else { 0 }]));

        assert_close(model.predict(&bright_left, &face)[0], Point::new(40.0, 50.0));
        assert_close(model.predict(&bright_right, &face)[0], Point::new(60.0, 50.0));
    }

    #[test]
    fn similarity_recovers_rotation_and_scale() {
        let from = grid(12);
        // rotate 90 degrees and double
        let to: Vec<Point> = from
            .iter()
            .map(|p| Point::new(-2.0 * p.y + 3.0, 2.0 * p.x - 1.0))
            .collect();

        let s = Similarity::between(&from, &to);
        assert!((s.a - 0.0).abs() < 1e-4);
        assert!((s.b - 2.0).abs() < 1e-4);
        assert_close(s.apply(Point::new(1.0, 0.0)), Point::new(0.0, 2.0));

        let same = Similarity::between(&from, &from);
        assert!((same.a - 1.0).abs() < 1e-5 && same.b.abs() < 1e-5);

        // degenerate input leaves offsets untouched
        assert_eq!(Similarity::between(&uniform(4, Point::zero()), &from[..4]), Similarity::IDENTITY);
    }

    #[test]
    fn out_of_frame_pixels_read_as_black() {
        let frame = GrayImage::from_pixel(4, 4, Luma([90]));
        assert_eq!(intensity(&frame, Point::new(1.4, 2.6)), 90.0);
        assert_eq!(intensity(&frame, Point::new(-1.0, 0.0)), 0.0);
        assert_eq!(intensity(&frame, Point::new(0.0, 3.6)), 0.0);
    }

    #[test]
    fn inconsistent_models_are_rejected() {
        let leaf = || RegressionTree::leaf(uniform(2, Point::zero()));

        let anchor_out_of_range = CascadeStage::new(vec![2], vec![Point::zero()], vec![leaf()]);
        assert!(ShapePredictor::new(uniform(2, Point::zero()), vec![anchor_out_of_range]).is_err());

        let short_leaf = CascadeStage::new(Vec::new(), Vec::new(), vec![leaf()]);
        assert!(ShapePredictor::new(uniform(3, Point::zero()), vec![short_leaf]).is_err());

        let split_past_pixels = CascadeStage::new(
            vec![0],
            vec![Point::zero()],
            vec![RegressionTree::new(
                vec![Split {
                    a: 0,
                    b: 1,
                    threshold: 0.0,
                }],
                vec![uniform(2, Point::zero()), uniform(2, Point::zero())],
            )
            .unwrap()],
        );
        assert!(ShapePredictor::new(uniform(2, Point::zero()), vec![split_past_pixels]).is_err());

        assert!(ShapePredictor::new(Vec::new(), Vec::new()).is_err());
    }
}
