//! Per-run log files.
//!
//! Each run gets its own file under the log directory, named after the UTC
//! start minute plus the first unused numeric suffix:
//! `2024-0315-0942-1.log`, `2024-0315-0942-2.log`, ...
//!
//! The subscriber is only active inside [`RunLog::in_scope`]; nothing is
//! installed globally.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::error::{Error, Result};

/// Highest numeric suffix tried before giving up.
const MAX_SUFFIX: u32 = 99;

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub log_dir: PathBuf,
    /// Mirror events to stderr as well as the file.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("./data/log"),
            console: true,
        }
    }
}

/// An open run log. Events are flushed and the file closed on drop.
pub struct RunLog {
    path: PathBuf,
    dispatch: Dispatch,
    _guard: WorkerGuard,
}

impl RunLog {
    pub fn create(config: &LogConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.log_dir)
            .map_err(|e| Error::cache_io(&config.log_dir, e))?;
        let (path, file) = open_next_log(&config.log_dir, Utc::now())?;

        let (writer, guard) = tracing_appender::non_blocking(file);

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let console_layer = config
            .console
            .then(|| fmt::layer().with_writer(io::stderr).with_target(false));
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false);

        let subscriber = Registry::default()
            .with(filter)
            .with(console_layer)
            .with(file_layer);

        Ok(Self {
            path,
            dispatch: Dispatch::new(subscriber),
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with this log as the active subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

/// Log file name for a run started at `now` with the given suffix.
pub fn log_file_name(now: DateTime<Utc>, suffix: u32) -> String {
    format!("{}-{suffix}.log", now.format("%Y-%m%d-%H%M"))
}

/// Create the first log file in `dir` whose name is not already taken.
fn open_next_log(dir: &Path, now: DateTime<Utc>) -> Result<(PathBuf, File)> {
    for suffix in 1..=MAX_SUFFIX {
        let path = dir.join(log_file_name(now, suffix));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::cache_io(path, e)),
        }
    }

    Err(Error::cache_io(
        dir,
        io::Error::new(ErrorKind::AlreadyExists, "no free log file name"),
    ))
}
