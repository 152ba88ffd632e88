//! Reader for dlib's serialized `shape_predictor` (`.dat`, or `.dat.bz2`).
//!
//! dlib writes integers as a control byte followed by little-endian value
//! bytes: bit 7 of the control byte is the sign, the low nibble the byte
//! count. A float is a `(mantissa, exponent)` integer pair and a matrix is
//! `(-rows, -cols)` followed by its values in row-major order.
//!
//! Pre-trained models: <https://github.com/davisking/dlib-models>
//! (`shape_predictor_68_face_landmarks.dat.bz2`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::shape::{CascadeStage, RegressionTree, ShapePredictor, Split};
use crate::types::Point;

const FORMAT_VERSION: i64 = 1;

struct DlibReader<R> {
    inner: R,
}

impl<R: Read> DlibReader<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }

    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn int(&mut self) -> Result<i64> {
        let control = self.byte()?;
        let len = usize::from(control & 0x0F);
        if len > 8 {
            return Err(Error::InvalidModel(format!("integer of {len} bytes")));
        }

        let mut value: u64 = 0;
        for i in 0..len {
            value |= u64::from(self.byte()?) << (8 * i);
        }
        let value = value as i64;
        Ok(if control & 0x80 != 0 { -value } else { value })
    }

    fn count(&mut self) -> Result<usize> {
        let value = self.int()?;
        usize::try_from(value).map_err(|_| Error::InvalidModel(format!("negative length {value}")))
    }

    fn float(&mut self) -> Result<f32> {
        let mantissa = self.int()?;
        let exponent = self.int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        let exponent = i32::try_from(exponent)
            .map_err(|_| Error::InvalidModel(format!("float exponent {exponent}")))?;
        Ok((mantissa as f64 * 2f64.powi(exponent)) as f32)
    }

    /// A column vector of `(x, y)` pairs, as dlib stores shapes.
    fn points(&mut self) -> Result<Vec<Point>> {
        let rows = -self.int()?;
        let cols = -self.int()?;
        if cols != 1 || rows < 0 || rows % 2 != 0 {
            return Err(Error::InvalidModel(format!(
                "expected a 2n x 1 shape matrix, got {rows}x{cols}"
            )));
        }

        (0..rows / 2)
            .map(|_| -> Result<Point> { Ok(Point::new(self.float()?, self.float()?)) })
            .collect()
    }

    fn tree(&mut self) -> Result<RegressionTree> {
        let splits = (0..self.count()?)
            .map(|_| -> Result<Split> {
                Ok(Split {
                    a: self.count()?,
                    b: self.count()?,
                    threshold: self.float()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let leaves = (0..self.count()?)
            .map(|_| self.points())
            .collect::<Result<Vec<_>>>()?;

        RegressionTree::new(splits, leaves)
    }
}

/// Load a model, decompressing it first when the name ends in `.bz2`.
pub fn load_shape_predictor(path: &Path) -> Result<ShapePredictor> {
    let file = BufReader::new(File::open(path)?);

    let model = if path.extension().is_some_and(|ext| ext == "bz2") {
        read_shape_predictor(BzDecoder::new(file))?
    } else {
        read_shape_predictor(file)?
    };

    debug!(
        path = %path.display(),
        landmarks = model.num_landmarks(),
        stages = model.num_cascade_stages(),
        "loaded shape predictor"
    );
    Ok(model)
}

/// Parse an uncompressed model stream.
pub fn read_shape_predictor<R: Read>(reader: R) -> Result<ShapePredictor> {
    let mut r = DlibReader::new(reader);

    let version = r.int()?;
    if version != FORMAT_VERSION {
        return Err(Error::InvalidModel(format!(
            "unsupported shape_predictor version {version}"
        )));
    }

    let mean_shape = r.points()?;

    let mut forests = Vec::new();
    for _ in 0..r.count()? {
        let trees = (0..r.count()?)
            .map(|_| r.tree())
            .collect::<Result<Vec<_>>>()?;
        forests.push(trees);
    }

    let mut anchors = Vec::new();
    for _ in 0..r.count()? {
        let level = (0..r.count()?)
            .map(|_| r.count())
            .collect::<Result<Vec<_>>>()?;
        anchors.push(level);
    }

    let mut offsets = Vec::new();
    for _ in 0..r.count()? {
        let level = (0..r.count()?)
            .map(|_| -> Result<Point> { Ok(Point::new(r.float()?, r.float()?)) })
            .collect::<Result<Vec<_>>>()?;
        offsets.push(level);
    }

    if anchors.len() != forests.len() || offsets.len() != forests.len() {
        return Err(Error::InvalidModel(format!(
            "{} cascade levels but {} anchor sets and {} offset sets",
            forests.len(),
            anchors.len(),
            offsets.len()
        )));
    }

    let cascade = forests
        .into_iter()
        .zip(anchors)
        .zip(offsets)
        .map(|((trees, anchors), offsets)| CascadeStage::new(anchors, offsets, trees))
        .collect();

    ShapePredictor::new(mean_shape, cascade)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Writes values in dlib's encoding.
    #[derive(Default)]
    pub(crate) struct DlibWriter {
        pub bytes: Vec<u8>,
    }

    impl DlibWriter {
        pub fn int(&mut self, value: i64) -> &mut Self {
            let magnitude = value.unsigned_abs();
            let len = (8 - magnitude.leading_zeros() as usize / 8) as u8;
            let sign = if value < 0 { 0x80 } else { 0 };
            self.bytes.push(sign | len);
            for i in 0..len {
                self.bytes.push((magnitude >> (8 * i)) as u8);
            }
            self
        }

        /// Exact for values with at most 24 significant bits.
        pub fn float(&mut self, value: f32) -> &mut Self {
            if value == 0.0 {
                return self.int(0).int(0);
            }
            let mantissa = (value as f64 * (1u64 << 24) as f64).round() as i64;
            self.int(mantissa).int(-24)
        }

        pub fn points(&mut self, points: &[Point]) -> &mut Self {
            self.int(-(points.len() as i64 * 2)).int(-1);
            for p in points {
                self.float(p.x).float(p.y);
            }
            self
        }
    }

    /// A model with `n` landmarks on a vertical line and one stage of one
    /// tree. The tree shifts every point by +0.25 in x when pixel 0 is more
    /// than 10 brighter than pixel 1, and by -0.25 otherwise.
    pub(crate) fn tiny_model(n: usize) -> Vec<u8> {
        let mean: Vec<Point> = (0..n)
            .map(|i| Point::new(0.5, (i + 1) as f32 / (n + 1) as f32))
            .collect();

        let mut w = DlibWriter::default();
        w.int(1).points(&mean);
        // forests: 1 stage, 1 tree, 1 split
        w.int(1).int(1).int(1);
        w.int(0).int(1).float(10.0);
        w.int(2)
            .points(&vec![Point::new(0.25, 0.0); n])
            .points(&vec![Point::new(-0.25, 0.0); n]);
        // anchors: pixel 0 and 1 hang off landmark 0
        w.int(1).int(2).int(0).int(0);
        // offsets: left and right of the anchor
        w.int(1).int(2);
        w.float(-0.25).float(0.0).float(0.25).float(0.0);
        w.bytes.clone()
    }

    #[test]
    fn integers_round_trip() {
        let values = [0, 1, 127, 128, 255, 256, 70_000, -1, -128, -70_000];
        let mut w = DlibWriter::default();
        for v in values {
            w.int(v);
        }

        let mut r = DlibReader::new(Cursor::new(w.bytes.clone()));
        for v in values {
            assert_eq!(r.int().unwrap(), v);
        }
        // 0 is a bare control byte
        assert_eq!(w.bytes[0], 0x00);
    }

    #[test]
    fn floats_and_negative_counts() {
        let mut w = DlibWriter::default();
        w.float(0.0).float(1.0).float(-0.5).float(0.125).int(-3);

        let mut r = DlibReader::new(Cursor::new(w.bytes));
        assert_eq!(r.float().unwrap(), 0.0);
        assert_eq!(r.float().unwrap(), 1.0);
        assert_eq!(r.float().unwrap(), -0.5);
        assert_eq!(r.float().unwrap(), 0.125);
        assert!(matches!(r.count(), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn parses_a_small_model() {
        let model = read_shape_predictor(Cursor::new(tiny_model(3))).unwrap();
        assert_eq!(model.num_landmarks(), 3);
        assert_eq!(model.num_cascade_stages(), 1);

        let face = crate::types::FaceBox::new(0, 0, 101, 101);
        // landmark 0 sits at (50, 25); only its left neighbour is bright
        let frame = image::GrayImage::from_fn(101, 101, |x, _| image::Luma([if x < 40 { 200 } else { 0 }]));
        let points = model.predict(&frame, &face);
        assert!((points[0].x - 75.0).abs() < 1e-3);
        assert!((points[2].y - 75.0).abs() < 1e-3);

        let dark = image::GrayImage::new(101, 101);
        assert!((model.predict(&dark, &face)[1].x - 25.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_truncated_and_foreign_streams() {
        let mut bytes = tiny_model(3);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            read_shape_predictor(Cursor::new(bytes)),
            Err(Error::Io(_))
        ));

        let mut w = DlibWriter::default();
        w.int(2);
        assert!(matches!(
            read_shape_predictor(Cursor::new(w.bytes)),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn loads_compressed_files() {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.dat.bz2");
        let mut encoder = BzEncoder::new(File::create(&path).unwrap(), Compression::fast());
        encoder.write_all(&tiny_model(5)).unwrap();
        encoder.finish().unwrap();

        let model = load_shape_predictor(&path).unwrap();
        assert_eq!(model.num_landmarks(), 5);

        let raw = dir.path().join("tiny.dat");
        std::fs::write(&raw, tiny_model(5)).unwrap();
        assert_eq!(load_shape_predictor(&raw).unwrap().num_landmarks(), 5);
    }
}
