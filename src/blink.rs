//! Blink counting over cached eye aspect ratios.
//!
//! Each eye keeps a short EAR history. A sharp drop below any remembered
//! value marks that eye as closing and opens a short window; a blink is
//! declared when both eyes' windows are open at the same time. Blinks that
//! follow a counted blink too closely are reported but not counted.

use std::ops::RangeInclusive;

use serde::Serialize;

use crate::cache::in_range;
use crate::record::FrameRecord;
use crate::types::EyePair;

/// EAR values remembered per eye.
pub const HISTORY_LEN: usize = 3;
/// Drop in EAR that marks an eye as closing.
pub const CLOSING_DELTA: f32 = 0.05;
/// Frames a closing eye waits for the other eye.
pub const PAIRING_WINDOW: u8 = 2;
/// Frames after a counted blink during which another one is rejected.
pub const REFRACTORY_FRAMES: u8 = 3;

#[derive(Debug, Clone, Copy, Default)]
struct EyeHistory {
    values: [f32; HISTORY_LEN],
}

impl EyeHistory {
    /// Returns whether `ear` is a closing candidate and the smallest delta
    /// against the history.
    fn observe(&mut self, ear: f32) -> (bool, f32) {
        let mut candidate = false;
        let mut min_delta = 1.0f32;

        for &old in &self.values {
            let delta = ear - old;
            if delta < -CLOSING_DELTA {
                candidate = true;
            }
            min_delta = min_delta.min(delta);
        }

        if candidate {
            self.values = [0.0; HISTORY_LEN];
        } else {
            self.push(ear);
        }
        (candidate, min_delta)
    }

    fn push(&mut self, value: f32) {
        self.values.rotate_left(1);
        self.values[HISTORY_LEN - 1] = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkEvent {
    None,
    /// A counted blink; carries the running count.
    Blink(u32),
    /// Both eyes closed again inside the refractory period.
    FalseBlink,
}

/// What one frame contributed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameBlink {
    pub candidate: EyePair<bool>,
    pub delta: EyePair<f32>,
    pub event: BlinkEvent,
}

/// Stateful blink detector. Create one per analyzed range.
#[derive(Debug, Clone, Default)]
pub struct BlinkCounter {
    history: EyePair<EyeHistory>,
    window: EyePair<u8>,
    refractory: u8,
    count: u32,
    false_blinks: u32,
}

impl BlinkCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn false_blinks(&self) -> u32 {
        self.false_blinks
    }

    /// Feed the EAR pair of an analyzed frame.
    pub fn observe(&mut self, ear: EyePair<f32>) -> FrameBlink {
        let (left, left_delta) = self.history.left.observe(ear.left);
        let (right, right_delta) = self.history.right.observe(ear.right);

        if left {
            self.window.left = PAIRING_WINDOW;
        }
        if right {
            self.window.right = PAIRING_WINDOW;
        }

        let paired = self.window.left != 0 && self.window.right != 0;
        if paired {
            self.window = EyePair::new(0, 0);
        }
        self.tick_windows();

        let event = if !paired {
            BlinkEvent::None
        } else if self.refractory > 0 {
            self.false_blinks += 1;
            BlinkEvent::FalseBlink
        } else {
            self.count += 1;
            self.refractory = REFRACTORY_FRAMES;
            BlinkEvent::Blink(self.count)
        };
        self.refractory = self.refractory.saturating_sub(1);

        FrameBlink {
            candidate: EyePair::new(left, right),
            delta: EyePair::new(left_delta, right_delta),
            event,
        }
    }

    /// Advance over a frame with no landmarks.
    pub fn skip(&mut self) {
        self.history.left.push(0.0);
        self.history.right.push(0.0);
        self.tick_windows();
        self.refractory = self.refractory.saturating_sub(1);
    }

    fn tick_windows(&mut self) {
        self.window.left = self.window.left.saturating_sub(1);
        self.window.right = self.window.right.saturating_sub(1);
    }
}

/// Blink results over a frame range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlinkSummary {
    pub start: u32,
    pub end: u32,
    pub blinks: u32,
    pub false_blinks: u32,
    /// Frames in range with no cached row.
    pub missing: u32,
    /// Frames where a blink or false blink was declared.
    pub events: Vec<(u32, BlinkEvent)>,
}

/// Run a fresh [`BlinkCounter`] over every frame index in `range`.
pub fn count_blinks(records: &[FrameRecord], range: RangeInclusive<u32>) -> BlinkSummary {
    let (start, end) = (*range.start(), *range.end());
    let mut rows = in_range(records, range).iter().peekable();
    let mut counter = BlinkCounter::new();
    let mut missing = 0;
    let mut events = Vec::new();

    for index in start..=end {
        match rows.next_if(|r| r.index == index) {
            Some(record) => {
                let frame = counter.observe(record.metrics().ear);
                if frame.event != BlinkEvent::None {
                    events.push((index, frame.event));
                }
            }
            None => {
                missing += 1;
                counter.skip();
            }
        }
    }

    BlinkSummary {
        start,
        end,
        blinks: counter.count(),
        false_blinks: counter.false_blinks(),
        missing,
        events,
    }
}
