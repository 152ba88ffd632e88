//! Content-addressed result cache.
//!
//! A cache is identified by the video's file stem plus the MD5 digest of
//! its first 64 KiB. New caches are always written to a temporary file in
//! the cache directory and renamed over the canonical path once complete,
//! so readers only ever see a whole cache or the previous one.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use md5::{Digest, Md5};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::DataLayout;
use crate::error::{Error, Result};
use crate::record::{header, FrameRecord, SCHEMA_VERSION_LINE};

/// Number of leading bytes hashed into the content key.
pub const DIGEST_PREFIX_LEN: usize = 64 * 1024;

/// Identity of a source video's cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentKey {
    /// File name without directory or extension.
    pub stem: String,
    /// Lowercase hex MD5 of the first [`DIGEST_PREFIX_LEN`] bytes.
    pub digest: String,
}

impl ContentKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::video_open(path, "path has no file name"))?;

        let file = File::open(path).map_err(|e| Error::video_open(path, e.to_string()))?;
        let mut prefix = Vec::with_capacity(DIGEST_PREFIX_LEN);
        file.take(DIGEST_PREFIX_LEN as u64)
            .read_to_end(&mut prefix)
            .map_err(|e| Error::video_open(path, e.to_string()))?;

        Ok(Self::from_prefix(stem, &prefix))
    }

    /// Key for already-read leading bytes (truncated to the digest length).
    pub fn from_prefix(stem: impl Into<String>, bytes: &[u8]) -> Self {
        let prefix = &bytes[..bytes.len().min(DIGEST_PREFIX_LEN)];
        Self {
            stem: stem.into(),
            digest: hex::encode(Md5::digest(prefix)),
        }
    }

    pub fn csv_file_name(&self) -> String {
        format!("{}-{}.csv", self.stem, self.digest)
    }

    pub fn video_file_name(&self) -> String {
        format!("{}-{}.mp4", self.stem, self.digest)
    }
}

impl DataLayout {
    /// Canonical cache path for `key`.
    pub fn cache_path(&self, key: &ContentKey) -> PathBuf {
        self.csv_dir.join(key.csv_file_name())
    }
}

/// Streaming reader over a cache file.
///
/// Rows are yielded together with their raw fields so they can be copied
/// into a new cache unchanged.
pub struct CacheReader {
    path: PathBuf,
    reader: csv::Reader<BufReader<File>>,
    row: StringRecord,
    last_index: Option<u32>,
}

impl CacheReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::cache_io(path, e))?;
        let mut input = BufReader::new(file);

        let mut version = String::new();
        input
            .read_line(&mut version)
            .map_err(|e| Error::cache_io(path, e))?;
        if version.trim_end_matches(['\r', '\n']) != SCHEMA_VERSION_LINE {
            return Err(Error::invalid_cache(
                path,
                1,
                format!("expected {SCHEMA_VERSION_LINE:?}, found {:?}", version.trim_end()),
            ));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(input);
        if reader.headers()? != &header() {
            return Err(Error::invalid_cache(path, 2, "unexpected header row"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            row: StringRecord::new(),
            last_index: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next row, or `None` at end of file.
    pub fn next_row(&mut self) -> Result<Option<(FrameRecord, StringRecord)>> {
        if !self.reader.read_record(&mut self.row)? {
            return Ok(None);
        }

        // the version line precedes what the csv reader counts
        let line = self.row.position().map_or(0, |p| p.line() + 1);
        let record = FrameRecord::from_row(&self.row, &self.path, line)?;

        if let Some(last) = self.last_index {
            if record.index <= last {
                return Err(Error::invalid_cache(
                    &self.path,
                    line,
                    format!("index {} does not follow {last}", record.index),
                ));
            }
        }
        self.last_index = Some(record.index);

        Ok(Some((record, self.row.clone())))
    }
}

/// Writes a new cache into a temporary file next to its final location.
///
/// Nothing is visible at the canonical path until [`CacheWriter::finish`];
/// dropping an unfinished writer deletes the temporary file.
pub struct CacheWriter {
    target: PathBuf,
    writer: csv::Writer<NamedTempFile>,
    rows: u64,
    last_index: Option<u32>,
}

impl CacheWriter {
    pub fn create(target: &Path) -> Result<Self> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".blinkscan-")
            .suffix(".csv.tmp")
            .tempfile_in(dir)
            .map_err(|e| Error::cache_io(dir, e))?;

        writeln!(tmp, "{SCHEMA_VERSION_LINE}").map_err(|e| Error::cache_io(tmp.path(), e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp);
        writer.write_record(&header())?;

        Ok(Self {
            target: target.to_path_buf(),
            writer,
            rows: 0,
            last_index: None,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn write_record(&mut self, record: &FrameRecord) -> Result<()> {
        self.check_order(record.index)?;
        self.writer.write_record(&record.to_row())?;
        self.rows += 1;
        Ok(())
    }

    /// Copy a row read from another cache without reformatting it.
    pub fn write_raw(&mut self, index: u32, row: &StringRecord) -> Result<()> {
        self.check_order(index)?;
        self.writer.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    fn check_order(&mut self, index: u32) -> Result<()> {
        if let Some(last) = self.last_index {
            if index <= last {
                return Err(Error::invalid_cache(
                    &self.target,
                    self.rows + 3,
                    format!("index {index} written after {last}"),
                ));
            }
        }
        self.last_index = Some(index);
        Ok(())
    }

    /// Flush and atomically move the cache into place.
    pub fn finish(self) -> Result<PathBuf> {
        let tmp = self
            .writer
            .into_inner()
            .map_err(|e| Error::cache_io(&self.target, e.into_error()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::cache_io(tmp.path(), e))?;

        tmp.persist(&self.target)
            .map_err(|e| Error::cache_io(&self.target, e.error))?;

        debug!(path = %self.target.display(), rows = self.rows, "cache written");
        Ok(self.target)
    }
}

/// Exclusive claim on a cache path for the duration of a build.
#[derive(Debug)]
pub struct CacheLock {
    lock_path: PathBuf,
}

impl CacheLock {
    pub fn acquire(cache_path: &Path) -> Result<Self> {
        let mut name = OsString::from(cache_path.as_os_str());
        name.push(".lock");
        let lock_path = PathBuf::from(name);

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::CacheLocked {
                    path: cache_path.to_path_buf(),
                });
            }
            Err(e) => return Err(Error::cache_io(&lock_path, e)),
        };

        writeln!(file, "{}", std::process::id()).map_err(|e| Error::cache_io(&lock_path, e))?;
        Ok(Self { lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release cache lock");
        }
    }
}

/// A cache loaded fully into memory for read-only analysis.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    path: PathBuf,
    records: Vec<FrameRecord>,
}

impl CacheEntry {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = CacheReader::open(path)?;
        let mut records = Vec::new();
        while let Some((record, _)) = reader.next_row()? {
            records.push(record);
        }

        debug!(path = %path.display(), rows = records.len(), "cache loaded");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Load the cache for `key` from the layout's cache directory.
    pub fn open(layout: &DataLayout, key: &ContentKey) -> Result<Self> {
        Self::load(&layout.cache_path(key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_index(&self) -> Option<u32> {
        self.records.first().map(|r| r.index)
    }

    pub fn last_index(&self) -> Option<u32> {
        self.records.last().map(|r| r.index)
    }

    /// Rows whose index falls in `range`.
    pub fn in_range(&self, range: RangeInclusive<u32>) -> &[FrameRecord] {
        in_range(&self.records, range)
    }

    /// Frame rate recovered from the stored time stamps.
    pub fn estimated_fps(&self) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .find(|r| r.time_stamp > 0.0)
            .map(|r| f64::from(r.index) / r.time_stamp)
    }
}

/// Sub-slice of index-sorted `records` inside `range`.
pub fn in_range(records: &[FrameRecord], range: RangeInclusive<u32>) -> &[FrameRecord] {
    let start = records.partition_point(|r| r.index < *range.start());
    let end = records.partition_point(|r| r.index <= *range.end());
    if start >= end {
        &[]
    } else {
        &records[start..end]
    }
}
