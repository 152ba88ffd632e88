//! Training recipe files.
//!
//! A recipe is a CSV list of videos with the clip each one contributes:
//!
//! ```text
//! file_name,start_time,duration,pd_stage
//! videos/p01.mp4,12.400,30.0,2
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::{Error, Result};

fn three_decimals<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:.3}"))
}

/// One video in a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub file_name: String,
    /// Clip start in seconds.
    #[serde(serialize_with = "three_decimals")]
    pub start_time: f64,
    /// Clip length in seconds.
    pub duration: f64,
    pub pd_stage: String,
}

impl RecipeEntry {
    pub fn video_path(&self) -> PathBuf {
        PathBuf::from(&self.file_name)
    }

    /// Set the start from a 0-based frame offset, as `(frame + 1) / fps`.
    pub fn set_start_frame(&mut self, start_frame: u32, fps: f64) {
        self.start_time = (f64::from(start_frame) + 1.0) / fps;
    }
}

#[derive(Debug, Clone)]
pub struct Recipe {
    path: PathBuf,
    pub entries: Vec<RecipeEntry>,
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut entries = Vec::new();
        for row in reader.deserialize() {
            let entry: RecipeEntry =
                row.map_err(|e| Error::Recipe(format!("{}: {e}", path.display())))?;
            entries.push(entry);
        }

        debug!(path = %path.display(), entries = entries.len(), "recipe loaded");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the recipe file in place via a temporary file.
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".recipe-")
            .suffix(".csv.tmp")
            .tempfile_in(dir)
            .map_err(|e| Error::cache_io(dir, e))?;

        let mut writer = csv::Writer::from_writer(tmp);
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        let tmp = writer
            .into_inner()
            .map_err(|e| Error::cache_io(&self.path, e.into_error()))?;

        tmp.persist(&self.path)
            .map_err(|e| Error::cache_io(&self.path, e.error))?;
        Ok(())
    }
}
