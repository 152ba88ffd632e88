//! Persisted per-frame results and their flat CSV schema.
//!
//! A cache file starts with a version line followed by a header row:
//!
//! ```text
//! #blinkscan-cache v1
//! index,detector,total_face_num,center_face_num,target_left,target_top,target_right,target_bottom,time_stamp,mark_0_x,mark_0_y,...,mark_67_y
//! ```

use std::path::Path;

use csv::StringRecord;

use crate::analyzer::FrameAnalysis;
use crate::error::{Error, Result};
use crate::metrics::EyeMetrics;
use crate::types::{DetectorStage, FaceBox, Landmarks, Point, LANDMARK_COUNT};

/// First line of every cache file.
pub const SCHEMA_VERSION_LINE: &str = "#blinkscan-cache v1";

const FIXED_COLUMNS: [&str; 9] = [
    "index",
    "detector",
    "total_face_num",
    "center_face_num",
    "target_left",
    "target_top",
    "target_right",
    "target_bottom",
    "time_stamp",
];

/// Total number of columns in a row.
pub const COLUMN_COUNT: usize = FIXED_COLUMNS.len() + LANDMARK_COUNT * 2;

/// The header row of the cache schema.
pub fn header() -> StringRecord {
    let mut header = StringRecord::with_capacity(COLUMN_COUNT * 12, COLUMN_COUNT);
    for column in FIXED_COLUMNS {
        header.push_field(column);
    }
    for n in 0..LANDMARK_COUNT {
        header.push_field(&format!("mark_{n}_x"));
        header.push_field(&format!("mark_{n}_y"));
    }
    header
}

/// One successfully analyzed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// 1-based frame number.
    pub index: u32,
    pub stage: DetectorStage,
    pub total_faces: u32,
    pub center_faces: u32,
    pub target: FaceBox,
    /// Seconds from the start of the video, `index / fps`.
    pub time_stamp: f64,
    pub landmarks: Landmarks,
}

impl FrameRecord {
    pub fn from_analysis(index: u32, fps: f64, analysis: &FrameAnalysis) -> Self {
        let time_stamp = if fps > 0.0 { f64::from(index) / fps } else { 0.0 };

        Self {
            index,
            stage: analysis.stage,
            total_faces: analysis.total_faces as u32,
            center_faces: analysis.center_faces as u32,
            target: analysis.target,
            time_stamp,
            landmarks: analysis.landmarks,
        }
    }

    pub fn metrics(&self) -> EyeMetrics {
        EyeMetrics::from_landmarks(&self.landmarks)
    }

    pub fn to_row(&self) -> StringRecord {
        let mut row = StringRecord::with_capacity(COLUMN_COUNT * 8, COLUMN_COUNT);
        row.push_field(&self.index.to_string());
        row.push_field(self.stage.code());
        row.push_field(&self.total_faces.to_string());
        row.push_field(&self.center_faces.to_string());
        row.push_field(&self.target.left.to_string());
        row.push_field(&self.target.top.to_string());
        row.push_field(&self.target.right.to_string());
        row.push_field(&self.target.bottom.to_string());
        row.push_field(&format!("{:.6}", self.time_stamp));
        for p in self.landmarks.points() {
            row.push_field(&p.x.to_string());
            row.push_field(&p.y.to_string());
        }
        row
    }

    /// Parse one data row. `path` and `line` only feed error messages.
    pub fn from_row(row: &StringRecord, path: &Path, line: u64) -> Result<Self> {
        if row.len() != COLUMN_COUNT {
            return Err(Error::invalid_cache(
                path,
                line,
                format!("expected {COLUMN_COUNT} fields, found {}", row.len()),
            ));
        }

        let field = |i: usize| row.get(i).unwrap_or_default();
        let parse_err = |i: usize| {
            Error::invalid_cache(
                path,
                line,
                format!("bad value {:?} in column {}", field(i), header_name(i)),
            )
        };
        let int = |i: usize| field(i).parse::<i32>().map_err(|_| parse_err(i));
        let uint = |i: usize| field(i).parse::<u32>().map_err(|_| parse_err(i));
        let float = |i: usize| field(i).parse::<f32>().map_err(|_| parse_err(i));

        let stage = DetectorStage::from_code(field(1)).ok_or_else(|| parse_err(1))?;
        let time_stamp = field(8).parse::<f64>().map_err(|_| parse_err(8))?;

        let mut points = [Point::zero(); LANDMARK_COUNT];
        for (n, point) in points.iter_mut().enumerate() {
            let col = FIXED_COLUMNS.len() + n * 2;
            *point = Point::new(float(col)?, float(col + 1)?);
        }

        Ok(Self {
            index: uint(0)?,
            stage,
            total_faces: uint(2)?,
            center_faces: uint(3)?,
            target: FaceBox::new(int(4)?, int(5)?, int(6)?, int(7)?),
            time_stamp,
            landmarks: Landmarks::new(points),
        })
    }
}

fn header_name(i: usize) -> String {
    match FIXED_COLUMNS.get(i) {
        Some(name) => (*name).to_string(),
        None => {
            let n = (i - FIXED_COLUMNS.len()) / 2;
            let axis = if (i - FIXED_COLUMNS.len()) % 2 == 0 { "x" } else { "y" };
            format!("mark_{n}_{axis}")
        }
    }
}
