//! Cache build runs.
//!
//! One run infers orientation, then walks the video once in frame order and
//! writes a fresh cache file. Under [`CachePolicy::Update`] rows already in
//! the old cache are copied through unchanged instead of being recomputed.

use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analyzer::{FrameAnalyzer, FrameOutcome};
use crate::cache::{CacheLock, CacheReader, CacheWriter, ContentKey};
use crate::config::{CachePolicy, DataLayout, EngineConfig};
use crate::error::{Error, Result};
use crate::orientation::detect_orientation;
use crate::record::FrameRecord;
use crate::video::{Rotation, VideoInfo, VideoOpener, VideoSource};

/// Frames between progress messages.
const PROGRESS_INTERVAL: u32 = 500;

/// Summary of one cache build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub key: ContentKey,
    pub cache_path: PathBuf,
    pub policy: CachePolicy,
    pub rotation: Rotation,
    pub info: VideoInfo,
    /// Frames decoded from the video.
    pub frames_visited: u32,
    /// Frames handed to the analyzer.
    pub frames_analyzed: u32,
    /// Frames whose row was copied from the previous cache.
    pub frames_copied: u32,
    /// Analyzed frames that produced no row.
    pub frames_failed: u32,
    /// Rows past the frame limit kept from the previous cache.
    pub rows_carried: u32,
    /// Rows in the new cache.
    pub rows: u64,
}

impl BuildReport {
    pub fn failed_percent(&self) -> f64 {
        if self.frames_analyzed == 0 {
            0.0
        } else {
            f64::from(self.frames_failed) * 100.0 / f64::from(self.frames_analyzed)
        }
    }
}

/// Build (or rebuild, or extend) the cache for `video`.
///
/// The video is opened twice: once for orientation inference and once for
/// the analysis pass. `config.allow_fallback` overrides whatever fallback
/// setting the analyzer was built with.
pub fn build_cache<O: VideoOpener>(
    opener: &O,
    video: &Path,
    layout: &DataLayout,
    analyzer: &mut FrameAnalyzer,
    config: &EngineConfig,
) -> Result<BuildReport> {
    let key = ContentKey::from_file(video)?;
    layout.ensure()?;

    let cache_path = layout.cache_path(&key);
    let exists = cache_path.is_file();

    if exists && config.policy == CachePolicy::Abort {
        return Err(Error::PolicyConflict { path: cache_path });
    }

    let _lock = CacheLock::acquire(&cache_path)?;
    analyzer.set_fallback(config.allow_fallback);

    info!(
        video = %video.display(),
        cache = %cache_path.display(),
        policy = %config.policy,
        max_frames = ?config.max_frames,
        fallback = config.allow_fallback,
        "building cache"
    );

    let rotation = {
        let mut scan = opener.open(video)?;
        detect_orientation(&mut scan, analyzer.primary_mut())?
    };

    let mut source = opener.open(video)?;
    let info = source.info();

    let mut previous = match (config.policy, exists) {
        (CachePolicy::Update, true) => Some(CacheReader::open(&cache_path)?),
        (CachePolicy::Update, false) => {
            info!("no existing cache, building from scratch");
            None
        }
        _ => None,
    };
    let mut pending = next_previous(&mut previous)?;

    let mut writer = CacheWriter::create(&cache_path)?;
    let mut report = BuildReport {
        key,
        cache_path: cache_path.clone(),
        policy: config.policy,
        rotation,
        info,
        frames_visited: 0,
        frames_analyzed: 0,
        frames_copied: 0,
        frames_failed: 0,
        rows_carried: 0,
        rows: 0,
    };

    let mut hit_limit = false;
    loop {
        if config.max_frames.is_some_and(|max| report.frames_visited >= max) {
            hit_limit = true;
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        report.frames_visited += 1;
        let index = report.frames_visited;

        if report.frames_visited % PROGRESS_INTERVAL == 0 {
            info!(
                frame = index,
                total = info.frame_count,
                failed = report.frames_failed,
                "progress"
            );
        }

        while let Some((old, _)) = &pending {
            if old.index >= index {
                break;
            }
            warn!(index = old.index, "dropping cached row that matches no frame");
            pending = next_previous(&mut previous)?;
        }

        if let Some((old, row)) = &pending {
            if old.index == index {
                writer.write_raw(index, row)?;
                report.frames_copied += 1;
                pending = next_previous(&mut previous)?;
                continue;
            }
        }

        let upright = if rotation == Rotation::None {
            frame
        } else {
            rotation.apply(&frame)
        };

        report.frames_analyzed += 1;
        match analyzer.analyze(&upright)? {
            FrameOutcome::Success(analysis) => {
                writer.write_record(&FrameRecord::from_analysis(index, info.fps, &analysis))?;
            }
            FrameOutcome::Failed(reason) => {
                report.frames_failed += 1;
                debug!(frame = index, ?reason, "frame skipped");
            }
        }
    }

    if hit_limit {
        while let Some((old, row)) = pending.take() {
            writer.write_raw(old.index, &row)?;
            report.rows_carried += 1;
            pending = next_previous(&mut previous)?;
        }
    } else if let Some((old, _)) = &pending {
        warn!(
            from = old.index,
            "previous cache has rows past the end of the video, discarding them"
        );
    }

    report.rows = writer.rows();
    // release the old file before it is replaced
    drop(previous);
    writer.finish()?;

    info!(
        total = report.frames_visited,
        analyzed = report.frames_analyzed,
        copied = report.frames_copied,
        carried = report.rows_carried,
        failed = report.frames_failed,
        failed_percent = %format!("{:.2}", report.failed_percent()),
        rows = report.rows,
        "cache complete"
    );

    Ok(report)
}

fn next_previous(reader: &mut Option<CacheReader>) -> Result<Option<(FrameRecord, StringRecord)>> {
    match reader {
        Some(reader) => reader.next_row(),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(analyzed: u32, failed: u32) -> BuildReport {
        BuildReport {
            key: ContentKey::from_prefix("v", b"x"),
            cache_path: PathBuf::from("v.csv"),
            policy: CachePolicy::Overwrite,
            rotation: Rotation::None,
            info: VideoInfo {
                width: 1,
                height: 1,
                fps: 30.0,
                frame_count: analyzed,
            },
            frames_visited: analyzed,
            frames_analyzed: analyzed,
            frames_copied: 0,
            frames_failed: failed,
            rows_carried: 0,
            rows: u64::from(analyzed - failed),
        }
    }

    #[test]
    fn failed_percent() {
        assert_eq!(report(0, 0).failed_percent(), 0.0);
        assert!((report(8, 2).failed_percent() - 25.0).abs() < 1e-9);
    }
}
