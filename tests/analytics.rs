//! Queries over caches produced by a real build.

mod common;

use blinkscan::{
    best_fit, build_cache, count_blinks, face_bounds, find_continuous_frames,
    BlinkEvent, CacheEntry, CachePolicy, EngineConfig, FaceBox, SearchMode, Segment, Statistics,
};
use common::{analyzer, ear_at, face_level, frame, frames_from_plan, MemoryOpener, Workspace};
use image::RgbImage;

fn build(frames: Vec<RgbImage>) -> (Workspace, CacheEntry) {
    let ws = Workspace::new();
    let config = EngineConfig {
        policy: CachePolicy::Overwrite,
        ..EngineConfig::default()
    };
    let report = build_cache(
        &MemoryOpener { frames },
        &ws.video,
        &ws.layout,
        &mut analyzer(),
        &config,
    )
    .unwrap();
    let entry = CacheEntry::load(&report.cache_path).unwrap();
    (ws, entry)
}

/// Frames 1..=15 and 17..=40 have a face; frame 16 does not.
fn two_runs() -> Vec<RgbImage> {
    frames_from_plan(&(1..=40).map(|i| i != 16).collect::<Vec<_>>())
}

#[test]
fn continuous_runs_and_best_fit() {
    let (_ws, entry) = build(two_runs());
    let fps = entry.estimated_fps().unwrap();
    assert!((fps - 30.0).abs() < 1e-3);

    let min_len = 10;

    let segments = find_continuous_frames(entry.records(), min_len);
    assert_eq!(segments, vec![Segment::new(1, 15), Segment::new(17, 40)]);

    // longer than either run
    assert!(find_continuous_frames(entry.records(), 25).is_empty());

    let stats = Statistics::compute(entry.records(), 1..=40).unwrap();
    for mode in [SearchMode::Width, SearchMode::Frontal] {
        let fits = best_fit(entry.records(), &segments, &stats.max_width(), mode, min_len);
        assert_eq!(fits.len(), 2, "{mode}");
        // every eye is the same width, so the strictest looseness matches
        assert!(fits.iter().all(|f| f.looseness == mode.looseness().next().unwrap()));
        assert_eq!(fits[0].run, segments[0]);
        assert_eq!(fits[1].run, segments[1]);
    }
}

#[test]
fn statistics_skip_missing_frames() {
    let (_ws, entry) = build(two_runs());

    let ears: Vec<f32> = (10..=20)
        .filter(|&i| i != 16)
        .map(|i| ear_at(face_level(i)))
        .collect();
    let min = ears.iter().copied().fold(f32::INFINITY, f32::min);
    let max = ears.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let avg = ears.iter().sum::<f32>() / ears.len() as f32;

    let stats = Statistics::compute(entry.records(), 10..=20).unwrap();
    assert_eq!(stats.frames, 10);
    assert!((stats.ear.left.min - min).abs() < 1e-4);
    assert!((stats.ear.right.max - max).abs() < 1e-4);
    assert!((stats.ear.left.avg - avg).abs() < 1e-4);
    assert!((stats.width.right.avg - 40.0).abs() < 1e-4);

    assert!(Statistics::compute(entry.records(), 16..=16).is_none());
    assert_eq!(entry.in_range(14..=18).len(), 4);

    let bounds = face_bounds(entry.records(), 1..=40).unwrap();
    assert_eq!(bounds, FaceBox::new(16, 12, 48, 36));
}

#[test]
fn blink_in_cached_video() {
    // wide open, one shut frame, then open again
    let mut frames: Vec<RgbImage> = (0..5).map(|_| frame(Some(200))).collect();
    frames.push(frame(Some(110)));
    frames.extend((0..6).map(|_| frame(Some(200))));
    // a frame without a face at the end
    frames.push(frame(None));

    let (_ws, entry) = build(frames);
    assert_eq!(entry.last_index(), Some(12));

    assert!(ear_at(200) - ear_at(110) > 0.05);
    let summary = count_blinks(entry.records(), 1..=13);
    assert_eq!(summary.blinks, 1);
    assert_eq!(summary.false_blinks, 0);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.events, vec![(6, BlinkEvent::Blink(1))]);
}
