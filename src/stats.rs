//! Range statistics over cached frames.

use std::ops::RangeInclusive;

use serde::Serialize;

use crate::cache::in_range;
use crate::record::FrameRecord;
use crate::types::{EyePair, FaceBox};

/// Minimum, mean and maximum of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatTriple {
    pub min: f32,
    pub avg: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    min: f32,
    max: f32,
    sum: f64,
    count: u32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += f64::from(value);
        self.count += 1;
    }

    fn finish(&self) -> StatTriple {
        StatTriple {
            min: self.min,
            avg: (self.sum / f64::from(self.count)) as f32,
            max: self.max,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PairAccumulator(EyePair<Accumulator>);

impl PairAccumulator {
    fn push(&mut self, value: EyePair<f32>) {
        self.0.left.push(value.left);
        self.0.right.push(value.right);
    }

    fn finish(&self) -> EyePair<StatTriple> {
        EyePair::new(self.0.left.finish(), self.0.right.finish())
    }
}

/// Per-eye statistics of the derived eye metrics over a frame range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Statistics {
    /// First and last index of the queried range.
    pub start: u32,
    pub end: u32,
    /// Rows that contributed.
    pub frames: u32,
    pub ear: EyePair<StatTriple>,
    pub width: EyePair<StatTriple>,
    pub inner_height: EyePair<StatTriple>,
    pub eye_to_mouth: EyePair<StatTriple>,
}

impl Statistics {
    /// Single pass over rows in `range`. `None` if no row falls inside it.
    pub fn compute(records: &[FrameRecord], range: RangeInclusive<u32>) -> Option<Self> {
        let (start, end) = (*range.start(), *range.end());
        let rows = in_range(records, range);
        if rows.is_empty() {
            return None;
        }

        let mut ear = PairAccumulator::default();
        let mut width = PairAccumulator::default();
        let mut inner_height = PairAccumulator::default();
        let mut eye_to_mouth = PairAccumulator::default();

        for record in rows {
            let m = record.metrics();
            ear.push(m.ear);
            width.push(m.width);
            inner_height.push(m.inner_height);
            eye_to_mouth.push(m.eye_to_mouth);
        }

        Some(Self {
            start,
            end,
            frames: rows.len() as u32,
            ear: ear.finish(),
            width: width.finish(),
            inner_height: inner_height.finish(),
            eye_to_mouth: eye_to_mouth.finish(),
        })
    }

    /// Per-eye maximum width, the reference for width percentages.
    pub fn max_width(&self) -> EyePair<f32> {
        self.width.map(|t| t.max)
    }

    pub fn max_eye_to_mouth(&self) -> EyePair<f32> {
        self.eye_to_mouth.map(|t| t.max)
    }
}

/// Smallest box containing every target box in `range`.
pub fn face_bounds(records: &[FrameRecord], range: RangeInclusive<u32>) -> Option<FaceBox> {
    in_range(records, range)
        .iter()
        .map(|r| r.target)
        .reduce(|acc, b| acc.union(&b))
}

/// Total absolute change of eye-to-mouth length between consecutive rows,
/// per eye, divided by that eye's `max` length.
///
/// The first row in range has nothing to compare against and adds 0.
pub fn eye_to_mouth_motion(
    records: &[FrameRecord],
    range: RangeInclusive<u32>,
    max: &EyePair<f32>,
) -> Option<EyePair<f32>> {
    let rows = in_range(records, range);
    if rows.is_empty() {
        return None;
    }

    let mut total = EyePair::new(0.0f32, 0.0f32);
    let mut prev: Option<EyePair<f32>> = None;

    for record in rows {
        let length = record.metrics().eye_to_mouth;
        if let Some(p) = prev {
            total.left += (length.left - p.left).abs();
            total.right += (length.right - p.right).abs();
        }
        prev = Some(length);
    }

    let normalise = |sum: f32, max: f32| if max > 0.0 { sum / max } else { 0.0 };
    Some(EyePair::new(
        normalise(total.left, max.left),
        normalise(total.right, max.right),
    ))
}
