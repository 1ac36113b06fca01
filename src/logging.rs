//! Tracing setup for evaluation binaries.
//!
//! Events go to stderr, keeping stdout free for the printed scores, and to a
//! per-run file named `covermatch_<timestamp>.log`. Only files carrying that
//! prefix are pruned; anything else in the log directory is left alone.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;

const RUN_LOG_PREFIX: &str = "covermatch_";
const RUN_LOG_EXT: &str = "log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Dir(#[from] app_dirs::AppDirError),
    #[error("Failed to list run logs in {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to delete old run log {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format run log timestamp: {0}")]
    FormatTime(time::error::Format),
    #[error("A global tracing subscriber is already installed: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
    #[error("Failed to create run log {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Directory for run logs; `None` uses [`app_dirs::logs_dir`].
    pub dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Number of run logs kept after pruning, this run included.
    pub keep: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: None,
            default_filter: "info".to_string(),
            keep: 10,
        }
    }
}

/// Install the global subscriber with [`LogOptions::default`].
pub fn init() -> Result<PathBuf, LoggingError> {
    init_with(LogOptions::default())
}

/// Install the global subscriber and return the run log path.
///
/// Only the first successful call installs anything; later calls return the
/// path that would have been used without touching the subscriber.
pub fn init_with(options: LogOptions) -> Result<PathBuf, LoggingError> {
    let dir = match options.dir {
        Some(dir) => dir,
        None => app_dirs::logs_dir()?,
    };
    let file_name = run_log_name(now_local_or_utc())?;
    let path = dir.join(&file_name);
    if FILE_GUARD.get().is_some() {
        return Ok(path);
    }

    fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateLogFile {
        path: path.clone(),
        source,
    })?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.clone(),
            source,
        })?;
    prune_run_logs(&dir, options.keep)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &file_name));
    let timer = local_timer();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));
    let subscriber = Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = FILE_GUARD.set(guard);

    tracing::info!("Run log at {}", path.display());
    Ok(path)
}

fn is_run_log(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(RUN_LOG_PREFIX));
    name_ok && path.extension().and_then(|ext| ext.to_str()) == Some(RUN_LOG_EXT)
}

/// Delete the oldest run logs until at most `keep` remain.
fn prune_run_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let listing = fs::read_dir(dir).map_err(|source| LoggingError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut logs: Vec<(SystemTime, PathBuf)> = listing
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_run_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    if logs.len() <= keep {
        return Ok(());
    }
    logs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let excess = logs.len() - keep;
    for (_, path) in logs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn run_log_name(now: OffsetDateTime) -> Result<String, LoggingError> {
    const STAMP: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(STAMP).map_err(LoggingError::FormatTime)?;
    Ok(format!("{RUN_LOG_PREFIX}{stamp}.{RUN_LOG_EXT}"))
}

fn local_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const EVENT_STAMP: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, EVENT_STAMP.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn run_log_name_uses_prefix_and_timestamp() {
        let fixed = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            run_log_name(fixed).unwrap(),
            "covermatch_2023-11-14_22-13-20.log"
        );
    }

    #[test]
    fn pruning_keeps_newest_run_logs_only() {
        let dir = tempfile::tempdir().unwrap();
        for idx in 0..12 {
            fs::write(dir.path().join(format!("covermatch_{idx:02}.log")), "").unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        fs::write(dir.path().join("other_tool.log"), "keep").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        prune_run_logs(dir.path(), 10).unwrap();
        let remaining = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| is_run_log(&entry.path()))
            .count();
        assert_eq!(remaining, 10);
        assert!(!dir.path().join("covermatch_00.log").exists());
        assert!(!dir.path().join("covermatch_01.log").exists());
        assert!(dir.path().join("covermatch_11.log").exists());
        assert!(dir.path().join("other_tool.log").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
