//! Recursive directory scanning with a per-run cache.
//!
//! The scanner turns a tier-1 directory into an ordered list of [`FileEntry`]
//! values. Results are memoized per directory for the lifetime of the
//! [`DirectoryScanner`]; there is no filesystem change detection.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

/// A single file discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Where the file lives on disk.
    pub source_path: PathBuf,
    /// Path recorded inside the archive, relative to the tier-1 directory's parent.
    pub archive_path: PathBuf,
    /// Size in bytes at scan time.
    pub size: u64,
}

impl FileEntry {
    /// Returns the archive path as a `/`-separated entry name.
    ///
    /// `None` when a component is not valid UTF-8, since such a name cannot be
    /// stored in the archive exactly.
    ///
    /// # Examples
    ///
    /// ```
    /// use dirpack::scanner::FileEntry;
    /// use std::path::PathBuf;
    ///
    /// let entry = FileEntry {
    ///     source_path: PathBuf::from("/data/logs/app/today.log"),
    ///     archive_path: PathBuf::from("logs").join("app").join("today.log"),
    ///     size: 12,
    /// };
    /// assert_eq!(entry.archive_name().as_deref(), Some("logs/app/today.log"));
    /// ```
    pub fn archive_name(&self) -> Option<String> {
        let parts = self
            .archive_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_str()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

/// The outcome of scanning one directory.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// The scanned directory.
    pub directory: PathBuf,
    /// Readable files, in traversal order (sorted by name within each directory).
    pub entries: Vec<FileEntry>,
    /// Files or subdirectories that could not be read and were left out.
    pub skipped: Vec<PathBuf>,
}

impl ScanResult {
    /// Number of readable files.
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of all readable file sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Errors that prevent a directory from being scanned at all.
#[derive(Debug)]
pub enum ScanError {
    /// The directory does not exist.
    NotFound { path: PathBuf },
    /// The path exists but is not a directory.
    NotADirectory { path: PathBuf },
    /// The directory exists but cannot be traversed.
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "Directory not found: {}", path.display()),
            Self::NotADirectory { path } => write!(f, "Not a directory: {}", path.display()),
            Self::Unreadable { path, source } => {
                write!(f, "Cannot traverse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Memoized directory listings keyed by path.
///
/// Only get-or-compute is exposed. The lock is held while a missing entry is
/// computed, so concurrent callers asking for the same directory wait for the
/// first scan and then share its result.
#[derive(Debug, Default)]
pub struct ScanCache {
    entries: Mutex<HashMap<PathBuf, Arc<ScanResult>>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `key`, computing it with `compute` if absent.
    ///
    /// Errors are not cached; a later call retries the computation.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &Path,
        compute: impl FnOnce() -> Result<ScanResult, E>,
    ) -> Result<Arc<ScanResult>, E> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = entries.get(key) {
            return Ok(Arc::clone(hit));
        }
        let result = Arc::new(compute()?);
        entries.insert(key.to_path_buf(), Arc::clone(&result));
        Ok(result)
    }

    /// Number of cached directories.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walks directories and caches the results.
#[derive(Debug, Default)]
pub struct DirectoryScanner {
    cache: ScanCache,
    traversals: AtomicUsize,
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `directory` recursively, serving repeated requests from the cache.
    ///
    /// Individual files that vanish or cannot be opened are recorded in
    /// [`ScanResult::skipped`] and logged; only a directory that cannot be
    /// traversed at all yields a [`ScanError`].
    pub fn scan(&self, directory: &Path) -> Result<Arc<ScanResult>, ScanError> {
        self.cache
            .get_or_try_insert_with(directory, || self.walk(directory))
    }

    /// Returns `(file count, total size in bytes)` for `directory`.
    pub fn count_files(&self, directory: &Path) -> Result<(usize, u64), ScanError> {
        let result = self.scan(directory)?;
        Ok((result.file_count(), result.total_size()))
    }

    /// How many filesystem walks have been performed (cache misses).
    pub fn traversals(&self) -> usize {
        self.traversals.load(Ordering::Relaxed)
    }

    fn walk(&self, directory: &Path) -> Result<ScanResult, ScanError> {
        self.traversals.fetch_add(1, Ordering::Relaxed);

        let metadata = fs::metadata(directory).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScanError::NotFound {
                path: directory.to_path_buf(),
            },
            _ => ScanError::Unreadable {
                path: directory.to_path_buf(),
                source: e,
            },
        })?;
        if !metadata.is_dir() {
            return Err(ScanError::NotADirectory {
                path: directory.to_path_buf(),
            });
        }
        fs::read_dir(directory).map_err(|e| ScanError::Unreadable {
            path: directory.to_path_buf(),
            source: e,
        })?;

        let base = directory.parent().unwrap_or(directory);
        let mut result = ScanResult {
            directory: directory.to_path_buf(),
            ..Default::default()
        };

        let walker = WalkDir::new(directory)
            .follow_links(false)
            .sort_by_file_name();

        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| directory.to_path_buf());
                    if e.depth() == 0 {
                        return Err(ScanError::Unreadable {
                            path,
                            source: e.into(),
                        });
                    }
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    result.skipped.push(path);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if file_type.is_symlink() {
                tracing::debug!(path = %entry.path().display(), "not following symlink");
                continue;
            }

            let source_path = entry.into_path();
            match Self::inspect(&source_path) {
                Ok(size) => {
                    let archive_path = source_path
                        .strip_prefix(base)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| {
                            source_path
                                .file_name()
                                .map(PathBuf::from)
                                .unwrap_or_default()
                        });
                    result.entries.push(FileEntry {
                        source_path,
                        archive_path,
                        size,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %source_path.display(), error = %e, "skipping unreadable file");
                    result.skipped.push(source_path);
                }
            }
        }

        tracing::debug!(
            directory = %directory.display(),
            files = result.entries.len(),
            skipped = result.skipped.len(),
            "scan complete"
        );
        Ok(result)
    }

    /// Confirms the file still exists and can be opened, returning its size.
    fn inspect(path: &Path) -> std::io::Result<u64> {
        let file = File::open(path)?;
        Ok(file.metadata()?.len())
    }
}
