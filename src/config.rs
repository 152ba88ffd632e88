use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What to do when a cache already exists for a video's content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Ignore the existing cache and recompute every frame.
    #[default]
    Overwrite,
    /// Fail before reading any frame.
    Abort,
    /// Reuse cached rows and analyze only the frames they do not cover.
    Update,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CachePolicy::Overwrite => "overwrite",
            CachePolicy::Abort => "abort",
            CachePolicy::Update => "update",
        };
        f.write_str(s)
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(CachePolicy::Overwrite),
            "abort" => Ok(CachePolicy::Abort),
            "update" => Ok(CachePolicy::Update),
            other => Err(format!("unknown cache policy {other:?}")),
        }
    }
}

/// Options for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub policy: CachePolicy,
    /// Stop after this many frames; `None` processes the whole video.
    pub max_frames: Option<u32>,
    /// Try the secondary detector when the primary finds nothing usable.
    pub allow_fallback: bool,
}

/// Tuning knobs for a rustface detector instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale_factor: f32,
    pub slide_window_step: u32,
}

impl DetectorSettings {
    /// Fast, approximate settings for the first detection attempt.
    pub fn primary() -> Self {
        Self {
            min_face_size: 40,
            score_thresh: 2.0,
            pyramid_scale_factor: 0.8,
            slide_window_step: 4,
        }
    }

    /// Slow, accurate settings for the fallback detector.
    pub fn secondary() -> Self {
        Self {
            min_face_size: 20,
            score_thresh: 1.0,
            pyramid_scale_factor: 0.9,
            slide_window_step: 2,
        }
    }
}

/// On-disk layout of the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub root: PathBuf,
    pub csv_dir: PathBuf,
    pub log_dir: PathBuf,
    pub video_dir: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            csv_dir: root.join("csv"),
            log_dir: root.join("log"),
            video_dir: root.join("video"),
            root,
        }
    }

    /// Create any missing directories.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.root, &self.csv_dir, &self.log_dir, &self.video_dir] {
            std::fs::create_dir_all(dir).map_err(|e| Error::cache_io(dir, e))?;
        }
        Ok(())
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new("./data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parsing() {
        assert_eq!("update".parse::<CachePolicy>(), Ok(CachePolicy::Update));
        assert_eq!("abort".parse::<CachePolicy>(), Ok(CachePolicy::Abort));
        assert_eq!(
            "overwrite".parse::<CachePolicy>(),
            Ok(CachePolicy::Overwrite)
        );
        assert!("merge".parse::<CachePolicy>().is_err());
        assert_eq!(CachePolicy::Update.to_string(), "update");
    }

    #[test]
    fn layout_creates_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let layout = DataLayout::new(tmp.path().join("data"));
        layout.ensure().unwrap();

        assert!(layout.csv_dir.is_dir());
        assert!(layout.log_dir.is_dir());
        assert!(layout.video_dir.is_dir());
    }

    #[test]
    fn layout_failure_is_cache_io() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let layout = DataLayout::new(blocker.join("data"));
        assert!(matches!(layout.ensure(), Err(Error::CacheIo { .. })));
    }

    #[test]
    fn secondary_is_finer_than_primary() {
        let p = DetectorSettings::primary();
        let s = DetectorSettings::secondary();
        assert!(s.min_face_size < p.min_face_size);
        assert!(s.slide_window_step < p.slide_window_step);
    }
}
