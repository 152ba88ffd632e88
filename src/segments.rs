//! Searches for frame ranges in a cache.
//!
//! All searches treat an absent index (a frame that failed analysis) as a
//! break: runs are made of consecutive indices only.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::cache::in_range;
use crate::record::FrameRecord;
use crate::types::EyePair;

/// Width thresholds in percent of the widest eye. Higher is stricter, so
/// the scan runs from the top down.
pub const WIDTH_LOOSENESS: RangeInclusive<u32> = 31..=90;
/// Allowed left/right width difference in percentage points. Lower is
/// stricter, so the scan runs from the bottom up.
pub const FRONTAL_LOOSENESS: RangeInclusive<u32> = 1..=49;

/// Inclusive frame-index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
}

impl Segment {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of frames covered.
    pub fn frame_count(&self) -> u32 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn contains(&self, index: u32) -> bool {
        (self.start..=self.end).contains(&index)
    }

    /// Start and end in seconds at `fps`.
    pub fn seconds(&self, fps: f64) -> (f64, f64) {
        (f64::from(self.start) / fps, f64::from(self.end) / fps)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Smallest frame count that lasts at least `seconds` at `fps`.
pub fn frames_for(seconds: f64, fps: f64) -> u32 {
    (seconds * fps).ceil().max(0.0) as u32
}

/// Maximal runs of `records` with consecutive indices and every row
/// accepted by `keep`, at least `min_len` long.
fn runs_where<F>(records: &[FrameRecord], min_len: u32, mut keep: F) -> Vec<Segment>
where
    F: FnMut(&FrameRecord) -> bool,
{
    let mut runs = Vec::new();
    let mut current: Option<Segment> = None;

    for record in records {
        if !keep(record) {
            if let Some(run) = current.take() {
                runs.push(run);
            }
            continue;
        }

        current = match current {
            Some(run) if record.index == run.end + 1 => Some(Segment::new(run.start, record.index)),
            Some(run) => {
                runs.push(run);
                Some(Segment::new(record.index, record.index))
            }
            None => Some(Segment::new(record.index, record.index)),
        };
    }
    runs.extend(current);

    runs.retain(|run| run.frame_count() >= min_len);
    runs
}

/// Every gap-free run of cached frames at least `min_len` frames long.
pub fn find_continuous_frames(records: &[FrameRecord], min_len: u32) -> Vec<Segment> {
    runs_where(records, min_len, |_| true)
}

/// Runs inside `segment` where both eyes are wider than `threshold` percent
/// of their maximum width.
pub fn find_width_threshold_frames(
    records: &[FrameRecord],
    segment: Segment,
    max_width: &EyePair<f32>,
    threshold: u32,
    min_len: u32,
) -> Vec<Segment> {
    let threshold = threshold as f32;
    runs_where(in_range(records, segment.start..=segment.end), min_len, |r| {
        let pct = r.metrics().width_percent(max_width);
        pct.left > threshold && pct.right > threshold
    })
}

/// Runs inside `segment` where left and right eye width percentages differ
/// by at most `threshold` points.
pub fn find_frontal_frames(
    records: &[FrameRecord],
    segment: Segment,
    max_width: &EyePair<f32>,
    threshold: u32,
    min_len: u32,
) -> Vec<Segment> {
    let threshold = threshold as f32;
    runs_where(in_range(records, segment.start..=segment.end), min_len, |r| {
        let pct = r.metrics().width_percent(max_width);
        (pct.left - pct.right).abs() <= threshold
    })
}

/// Which predicate a best-fit search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Both eyes open wide relative to their maximum.
    #[default]
    Width,
    /// Face pointed at the camera.
    Frontal,
}

impl SearchMode {
    /// Looseness values in scan order, strictest first.
    pub fn looseness(&self) -> Box<dyn Iterator<Item = u32>> {
        match self {
            SearchMode::Width => Box::new(WIDTH_LOOSENESS.rev()),
            SearchMode::Frontal => Box::new(FRONTAL_LOOSENESS),
        }
    }

    pub fn find(
        &self,
        records: &[FrameRecord],
        segment: Segment,
        max_width: &EyePair<f32>,
        looseness: u32,
        min_len: u32,
    ) -> Vec<Segment> {
        match self {
            SearchMode::Width => {
                find_width_threshold_frames(records, segment, max_width, looseness, min_len)
            }
            SearchMode::Frontal => {
                find_frontal_frames(records, segment, max_width, looseness, min_len)
            }
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Width => f.write_str("width"),
            SearchMode::Frontal => f.write_str("frontal"),
        }
    }
}

/// The run chosen for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BestFit {
    pub segment: Segment,
    pub looseness: u32,
    pub run: Segment,
}

/// Greedy best-fit search.
///
/// Looseness values are tried in [`SearchMode::looseness`] order; for each,
/// every unresolved segment is tried in the given order. The first run a
/// segment yields resolves it. Results are in resolution order, so the
/// first entry is the overall best. This is a greedy scan, not an optimal
/// one: an earlier segment can claim a looseness value a later segment
/// would have matched better.
pub fn best_fit(
    records: &[FrameRecord],
    segments: &[Segment],
    max_width: &EyePair<f32>,
    mode: SearchMode,
    min_len: u32,
) -> Vec<BestFit> {
    let mut unresolved: Vec<Segment> = segments.to_vec();
    let mut fits = Vec::new();

    for looseness in mode.looseness() {
        if unresolved.is_empty() {
            break;
        }

        unresolved.retain(|&segment| {
            let runs = mode.find(records, segment, max_width, looseness, min_len);
            match runs.first() {
                Some(&run) => {
                    fits.push(BestFit {
                        segment,
                        looseness,
                        run,
                    });
                    false
                }
                None => true,
            }
        });
    }

    fits
}
