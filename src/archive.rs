//! Compressed archive construction for scanned directories.
//!
//! The builder streams every [`FileEntry`] of a [`ScanResult`] into a single ZIP
//! file next to the scanned directory. Unreadable entries are skipped and
//! reported; anything that prevents the archive itself from being finalized
//! removes the partial file and fails the whole build.

use crate::config::CompressConfig;
use crate::fs_ops;
use crate::scanner::{FileEntry, ScanResult};
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Extension of produced archives.
pub const ARCHIVE_EXTENSION: &str = "zip";

const MIB: u64 = 1024 * 1024;

/// Result of a successful archive build.
///
/// Success means the archive exists and is valid. It may still be incomplete;
/// check [`failed_source_paths`](Self::failed_source_paths).
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    /// Location of the finished archive.
    pub archive_path: PathBuf,
    /// Files that were left out, either unreadable at scan time or failed while writing.
    pub failed_source_paths: Vec<PathBuf>,
    /// The failed-files report, if one was written.
    pub failed_log: Option<PathBuf>,
    /// Number of entries stored in the archive.
    pub entries_written: usize,
    /// Uncompressed bytes stored in the archive.
    pub processed_bytes: u64,
}

impl ArchiveOutcome {
    /// True when every scanned file made it into the archive.
    pub fn is_complete(&self) -> bool {
        self.failed_source_paths.is_empty()
    }
}

/// Errors that prevent an archive from being finalized.
#[derive(Debug)]
pub enum ArchiveError {
    /// The archive file could not be created.
    Create { path: PathBuf, source: io::Error },
    /// Writing into the archive failed (disk full, I/O error).
    Write { path: PathBuf, source: io::Error },
    /// The ZIP container rejected an operation or could not be finished.
    Finalize {
        path: PathBuf,
        source: zip::result::ZipError,
    },
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { path, source } => {
                write!(f, "Failed to create archive {}: {}", path.display(), source)
            }
            Self::Write { path, source } => {
                write!(f, "Failed to write archive {}: {}", path.display(), source)
            }
            Self::Finalize { path, source } => {
                write!(f, "Failed to finalize archive {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Create { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Finalize { source, .. } => Some(source),
        }
    }
}

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Why a single entry could not be added.
enum EntryError {
    /// Reading the source file failed; the entry is skipped.
    Source(io::Error),
    /// The container cannot hold this entry under its name; the entry is skipped.
    Rejected(String),
    /// Writing into the archive failed; the archive is unusable.
    Sink(io::Error),
    Zip(zip::result::ZipError),
}

/// Counters produced while writing entries.
#[derive(Debug, Default)]
struct WriteReport {
    failed: Vec<PathBuf>,
    entries_written: usize,
    processed_bytes: u64,
}

/// Builds one ZIP archive per scanned directory.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    buffer_size: usize,
    progress_interval: u64,
    compression_level: i64,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(&CompressConfig::default())
    }
}

impl ArchiveBuilder {
    pub fn new(config: &CompressConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            progress_interval: config.progress_interval_mb.max(1) * MIB,
            compression_level: config.compression_level,
        }
    }

    /// Archives `directory` using the entries of `scan`.
    ///
    /// Creates `parent(directory)/{name}_{YYYYMMDD_HHMMSS}.zip`. When entries fail, a
    /// `failed_files_{timestamp}.log` report is written beside the archive and the
    /// build still succeeds.
    pub fn build(&self, directory: &Path, scan: &ScanResult) -> ArchiveResult<ArchiveOutcome> {
        self.build_with_progress(directory, scan, &ProgressBar::hidden())
    }

    /// Same as [`build`](Self::build), advancing `progress` by the bytes written.
    pub fn build_with_progress(
        &self,
        directory: &Path,
        scan: &ScanResult,
        progress: &ProgressBar,
    ) -> ArchiveResult<ArchiveOutcome> {
        let started = Instant::now();
        let timestamp = fs_ops::timestamp();
        let (parent, name) = split_directory(directory)?;
        let archive_path = fs_ops::unique_path(
            parent,
            &format!("{}_{}", name, timestamp),
            Some(ARCHIVE_EXTENSION),
        );

        tracing::info!(archive = %archive_path.display(), "creating archive");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&archive_path)
            .map_err(|e| ArchiveError::Create {
                path: archive_path.clone(),
                source: e,
            })?;

        let report = match self
            .write_archive(file, &archive_path, scan, progress)
            .and_then(|(file, report)| {
                file.sync_all().map_err(|e| ArchiveError::Write {
                    path: archive_path.clone(),
                    source: e,
                })?;
                Ok(report)
            }) {
            Ok(report) => report,
            Err(e) => {
                discard_partial(&archive_path);
                return Err(e);
            }
        };

        // Only a file that is actually on disk counts as an archive.
        if let Err(e) = fs::metadata(&archive_path) {
            return Err(ArchiveError::Write {
                path: archive_path,
                source: e,
            });
        }

        let mut failed_source_paths = scan.skipped.clone();
        failed_source_paths.extend(report.failed);

        tracing::info!(
            archive = %archive_path.display(),
            entries = report.entries_written,
            elapsed_secs = %format!("{:.2}", started.elapsed().as_secs_f64()),
            processed_mb = %format!("{:.2}", report.processed_bytes as f64 / MIB as f64),
            "compression completed"
        );

        let failed_log = if failed_source_paths.is_empty() {
            None
        } else {
            tracing::warn!(
                count = failed_source_paths.len(),
                "some files could not be added to the archive"
            );
            write_failed_log(parent, &timestamp, &failed_source_paths)
        };

        Ok(ArchiveOutcome {
            archive_path,
            failed_source_paths,
            failed_log,
            entries_written: report.entries_written,
            processed_bytes: report.processed_bytes,
        })
    }

    /// Writes every entry into a ZIP container on top of `sink` and finishes it.
    fn write_archive<W: Write + Seek>(
        &self,
        sink: W,
        archive_path: &Path,
        scan: &ScanResult,
        progress: &ProgressBar,
    ) -> ArchiveResult<(W, WriteReport)> {
        let total_size = scan.total_size();
        let mut zip = ZipWriter::new(sink);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut report = WriteReport::default();
        let mut next_progress = self.progress_interval;
        let mut names = HashSet::new();

        for entry in &scan.entries {
            match self.add_entry(&mut zip, entry, &mut names, &mut buffer, progress) {
                Ok(bytes) => {
                    report.entries_written += 1;
                    report.processed_bytes += bytes;
                }
                Err(EntryError::Source(e)) => {
                    tracing::error!(
                        path = %entry.source_path.display(),
                        error = %e,
                        "error adding file to archive"
                    );
                    report.failed.push(entry.source_path.clone());
                    continue;
                }
                Err(EntryError::Rejected(reason)) => {
                    tracing::warn!(
                        path = %entry.source_path.display(),
                        reason = %reason,
                        "file cannot be stored in the archive"
                    );
                    report.failed.push(entry.source_path.clone());
                    continue;
                }
                Err(EntryError::Sink(e)) => {
                    return Err(ArchiveError::Write {
                        path: archive_path.to_path_buf(),
                        source: e,
                    });
                }
                Err(EntryError::Zip(e)) => {
                    return Err(ArchiveError::Finalize {
                        path: archive_path.to_path_buf(),
                        source: e,
                    });
                }
            }

            if report.processed_bytes >= next_progress {
                let percent = if total_size == 0 {
                    100.0
                } else {
                    report.processed_bytes as f64 / total_size as f64 * 100.0
                };
                tracing::info!("compression progress: {:.1}%", percent.min(100.0));
                while next_progress <= report.processed_bytes {
                    next_progress += self.progress_interval;
                }
            }
        }

        let sink = zip.finish().map_err(|e| ArchiveError::Finalize {
            path: archive_path.to_path_buf(),
            source: e,
        })?;
        Ok((sink, report))
    }

    /// Streams one file into the archive through the shared buffer.
    ///
    /// Names that are not valid UTF-8 or already taken are rejected before anything
    /// is written. A read failure after the entry was started rolls the entry back
    /// so the archive stays consistent.
    fn add_entry<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        entry: &FileEntry,
        names: &mut HashSet<String>,
        buffer: &mut [u8],
        progress: &ProgressBar,
    ) -> Result<u64, EntryError> {
        let name = entry
            .archive_name()
            .ok_or_else(|| EntryError::Rejected("name is not valid UTF-8".to_string()))?;
        if names.contains(&name) {
            return Err(EntryError::Rejected(format!("duplicate entry name {}", name)));
        }

        let mut source = File::open(&entry.source_path).map_err(EntryError::Source)?;
        let metadata = source.metadata().map_err(EntryError::Source)?;

        zip.start_file(name.as_str(), self.entry_options(&metadata))
            .map_err(|e| match e {
                zip::result::ZipError::Io(e) => EntryError::Sink(e),
                other => EntryError::Zip(other),
            })?;
        names.insert(name);

        let mut written = 0u64;
        loop {
            let n = match source.read(buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    zip.abort_file().map_err(EntryError::Zip)?;
                    return Err(EntryError::Source(e));
                }
            };
            zip.write_all(&buffer[..n]).map_err(EntryError::Sink)?;
            written += n as u64;
            progress.inc(n as u64);
        }

        Ok(written)
    }

    fn entry_options(&self, metadata: &fs::Metadata) -> SimpleFileOptions {
        // Deflate has no level 0; that level means storing as-is.
        let options = if self.compression_level == 0 {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level))
        }
        .large_file(metadata.len() >= u64::from(u32::MAX));

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(metadata.permissions().mode())
        };

        options
    }
}

fn split_directory(directory: &Path) -> ArchiveResult<(&Path, String)> {
    let invalid = || ArchiveError::Create {
        path: directory.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::InvalidInput,
            "directory has no parent or name component",
        ),
    };
    let parent = directory.parent().ok_or_else(invalid)?;
    let name = directory.file_name().ok_or_else(invalid)?;
    Ok((parent, name.to_string_lossy().into_owned()))
}

/// Removes a partially written archive, logging if that fails too.
fn discard_partial(archive_path: &Path) {
    if archive_path.exists()
        && let Err(e) = fs::remove_file(archive_path)
    {
        tracing::error!(
            archive = %archive_path.display(),
            error = %e,
            "could not remove partial archive"
        );
    }
}

/// Persists the failed source paths, one per line.
fn write_failed_log(dir: &Path, timestamp: &str, failed: &[PathBuf]) -> Option<PathBuf> {
    let log_path = fs_ops::unique_path(dir, &format!("failed_files_{}", timestamp), Some("log"));
    let mut contents = failed
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    contents.push('\n');

    match fs::write(&log_path, contents) {
        Ok(()) => Some(log_path),
        Err(e) => {
            tracing::warn!(path = %log_path.display(), error = %e, "could not write failed-files report");
            None
        }
    }
}
