//! Log sink construction.
//!
//! Two sinks are combined: concise human-readable lines on the console, and a
//! detailed timestamped file that rotates by size. The result is a
//! [`tracing::Dispatch`] handed to whoever runs the pipeline instead of being
//! installed globally.

use crate::config::LoggingConfig;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that overrides the configured level filter.
pub const LOG_ENV: &str = "DIRPACK_LOG";

/// Builds the console + rotating file subscriber.
///
/// The returned guard flushes the file sink when dropped; keep it alive for as
/// long as the dispatch is in use.
pub fn build_dispatch(config: &LoggingConfig) -> io::Result<(Dispatch, WorkerGuard)> {
    let file = RotatingFile::open(&config.file, config.max_bytes, config.max_files)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stdout)
                .with_target(false)
                .without_time()
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(false)
                .with_ansi(false),
        );

    Ok((Dispatch::new(subscriber), guard))
}

/// A log file that rotates once it grows past `max_bytes`.
///
/// On rotation `name` becomes `name.1`, `name.1` becomes `name.2`, and so on; at
/// most `max_files` rotated files are kept and older ones are deleted. With
/// `max_files == 0` the file is simply truncated.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Opens (or creates) `path` for appending, creating parent directories.
    pub fn open(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = Self::open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes: max_bytes.max(1),
            max_files,
            file,
            written,
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Path of the `index`-th rotated file (`name.index`).
    pub fn rotated_path(&self, index: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_files == 0 {
            self.file = File::create(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.rotated_path(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.max_files).rev() {
            let from = self.rotated_path(index);
            if from.exists() {
                fs::rename(&from, self.rotated_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.rotated_path(1))?;

        self.file = Self::open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(n: usize) -> Vec<u8> {
        format!("line {:04}\n", n).into_bytes()
    }

    #[test]
    fn test_no_rotation_below_limit() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("run.log");
        let mut file = RotatingFile::open(&path, 1024, 3).expect("Open failed");

        file.write_all(&line(1)).unwrap();
        file.flush().unwrap();

        assert!(path.exists());
        assert!(!file.rotated_path(1).exists());
    }

    #[test]
    fn test_rotates_when_full() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("run.log");
        // Each line is 10 bytes, so two lines fit per file
        let mut file = RotatingFile::open(&path, 20, 3).expect("Open failed");

        for n in 0..3 {
            file.write_all(&line(n)).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line 0002\n");
        assert_eq!(
            fs::read_to_string(file.rotated_path(1)).unwrap(),
            "line 0000\nline 0001\n"
        );
    }

    #[test]
    fn test_retention_limit() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("run.log");
        let mut file = RotatingFile::open(&path, 10, 2).expect("Open failed");

        for n in 0..6 {
            file.write_all(&line(n)).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line 0005\n");
        assert_eq!(fs::read_to_string(file.rotated_path(1)).unwrap(), "line 0004\n");
        assert_eq!(fs::read_to_string(file.rotated_path(2)).unwrap(), "line 0003\n");
        assert!(!file.rotated_path(3).exists());
    }

    #[test]
    fn test_zero_retention_truncates() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("run.log");
        let mut file = RotatingFile::open(&path, 10, 0).expect("Open failed");

        file.write_all(&line(1)).unwrap();
        file.write_all(&line(2)).unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "line 0002\n");
        assert!(!file.rotated_path(1).exists());
    }

    #[test]
    fn test_existing_size_counts_toward_limit() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("run.log");
        fs::write(&path, "previous\n").unwrap();

        let mut file = RotatingFile::open(&path, 12, 1).expect("Open failed");
        file.write_all(&line(1)).unwrap();
        file.flush().unwrap();

        assert_eq!(fs::read_to_string(file.rotated_path(1)).unwrap(), "previous\n");
    }

    #[test]
    fn test_creates_parent_directories() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("nested/logs/run.log");

        RotatingFile::open(&path, 100, 1).expect("Open failed");
        assert!(path.exists());
    }

    #[test]
    fn test_build_dispatch_writes_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = LoggingConfig {
            file: temp_dir.path().join("dirpack.log"),
            ..Default::default()
        };

        let (dispatch, guard) = build_dispatch(&config).expect("Dispatch failed");
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("hello from the test");
        });
        drop(guard);

        let contents = fs::read_to_string(&config.file).expect("Failed to read log");
        assert!(contents.contains("hello from the test"));
    }
}
