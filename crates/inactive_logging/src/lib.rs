//! Logging setup shared by the inactive-store binaries.
//!
//! Events go to stderr and, optionally, to a size-rotated file under
//! `$INACTIVE_HOME/logs` (default `~/.inactive/logs`). Both layers honour
//! `RUST_LOG`; without it [`DEFAULT_LOG_FILTER`] applies.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "inactive=info,inactive_store=info,inactive_db=warn";

const HOME_ENV: &str = "INACTIVE_HOME";
const HOME_DIR_NAME: &str = ".inactive";

/// How many files to keep and how large each may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_files: usize,
    pub max_size: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Show the full filter on stderr instead of warnings only.
    pub verbose: bool,
    pub log_to_file: bool,
    pub rotation: RotationPolicy,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            log_to_file: true,
            rotation: RotationPolicy::default(),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber. Calling it twice is an error.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let console_filter = if config.verbose {
        env_filter()
    } else {
        EnvFilter::new("warn")
    };
    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    let file = if config.log_to_file {
        let dir = ensure_logs_dir().context("Failed to ensure log directory")?;
        let writer = SharedLogWriter::open(&dir, config.app_name, config.rotation)?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Logging already initialized")?;
    Ok(())
}

/// `$INACTIVE_HOME`, else `~/.inactive`, else `./.inactive` when no home
/// directory is known.
pub fn inactive_home() -> PathBuf {
    if let Some(path) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR_NAME)
}

pub fn logs_dir() -> PathBuf {
    inactive_home().join("logs")
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file that rotates to `<name>.log.1 .. .N` when full.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    policy: RotationPolicy,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, app_name: &str, policy: RotationPolicy) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut this = Self {
            dir: dir.to_path_buf(),
            stem: sanitize_name(app_name),
            policy: RotationPolicy {
                max_files: policy.max_files.max(1),
                ..policy
            },
            file: None,
            written: 0,
        };
        this.reopen()?;
        if this.written > this.policy.max_size {
            this.rotate()?;
        }
        Ok(this)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{}", self.stem, n)),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Shift every generation up by one, dropping the oldest.
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let keep = self.policy.max_files - 1;
        if keep > 0 {
            let oldest = self.path(keep);
            if oldest.exists() {
                fs::remove_file(oldest)?;
            }
            for generation in (0..keep).rev() {
                let from = self.path(generation);
                if from.exists() {
                    fs::rename(from, self.path(generation + 1))?;
                }
            }
        } else {
            // Single-file policy: start over.
            fs::remove_file(self.path(0)).or_else(|e| match e.kind() {
                io::ErrorKind::NotFound => Ok(()),
                _ => Err(e),
            })?;
        }

        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.policy.max_size {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out handles to one shared [`RotatingFile`].
#[derive(Clone)]
struct SharedLogWriter(Arc<Mutex<RotatingFile>>);

impl SharedLogWriter {
    fn open(dir: &Path, app_name: &str, policy: RotationPolicy) -> Result<Self> {
        let file = RotatingFile::open(dir, app_name, policy)
            .with_context(|| format!("Failed to open log file for {}", app_name))?;
        Ok(Self(Arc::new(Mutex::new(file))))
    }

    fn with_file<T>(&self, op: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        op(&mut guard)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogWriter {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

/// Replace anything but `[A-Za-z0-9_-]` with `_` so the name is a safe file stem.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_replaces_path_characters() {
        assert_eq!(sanitize_name("inactive"), "inactive");
        assert_eq!(sanitize_name("../evil name"), "___evil_name");
    }

    #[test]
    fn writes_append_to_current_file() {
        let tmp = TempDir::new().unwrap();
        let mut file = RotatingFile::open(tmp.path(), "inactive", RotationPolicy::default()).unwrap();
        file.write_all(b"one\n").unwrap();
        file.write_all(b"two\n").unwrap();
        file.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("inactive.log")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[test]
    fn full_file_rotates_and_oldest_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let policy = RotationPolicy {
            max_files: 3,
            max_size: 4,
        };
        let mut file = RotatingFile::open(tmp.path(), "app", policy).unwrap();
        for line in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            file.write_all(line).unwrap();
        }
        file.flush().unwrap();

        let read = |name: &str| fs::read_to_string(tmp.path().join(name)).unwrap();
        assert_eq!(read("app.log"), "dddd");
        assert_eq!(read("app.log.1"), "cccc");
        assert_eq!(read("app.log.2"), "bbbb");
        assert!(!tmp.path().join("app.log.3").exists());
    }

    #[test]
    fn single_file_policy_truncates() {
        let tmp = TempDir::new().unwrap();
        let policy = RotationPolicy {
            max_files: 1,
            max_size: 4,
        };
        let mut file = RotatingFile::open(tmp.path(), "app", policy).unwrap();
        file.write_all(b"aaaa").unwrap();
        file.write_all(b"bbbb").unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(tmp.path().join("app.log")).unwrap(), "bbbb");
        assert!(!tmp.path().join("app.log.1").exists());
    }

    #[test]
    fn shared_writer_writes_through() {
        let tmp = TempDir::new().unwrap();
        let writer = SharedLogWriter::open(tmp.path(), "shared", RotationPolicy::default()).unwrap();
        let mut handle = tracing_subscriber::fmt::MakeWriter::make_writer(&writer);
        handle.write_all(b"hello\n").unwrap();
        handle.flush().unwrap();

        let content = fs::read_to_string(tmp.path().join("shared.log")).unwrap();
        assert_eq!(content, "hello\n");
    }
}
