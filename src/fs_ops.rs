//! Filesystem helpers shared by the archive builder, the relocator and the pipeline.
//!
//! Everything here is synchronous and blocks for the duration of the I/O.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Timestamp format used in archive names, backup suffixes and report files.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Returns the current local time formatted as `YYYYMMDD_HHMMSS`.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Picks a path under `parent` that does not exist yet.
///
/// Tries `stem[.ext]` first, then `stem_1[.ext]`, `stem_2[.ext]`, and so on.
///
/// # Examples
///
/// ```
/// use dirpack::fs_ops::unique_path;
/// use std::path::Path;
///
/// let path = unique_path(Path::new("/nonexistent/parent"), "logs_20250101_120000", Some("zip"));
/// assert_eq!(path, Path::new("/nonexistent/parent/logs_20250101_120000.zip"));
/// ```
pub fn unique_path(parent: &Path, stem: &str, extension: Option<&str>) -> PathBuf {
    let build = |suffix: Option<usize>| {
        let mut name = match suffix {
            Some(n) => format!("{}_{}", stem, n),
            None => stem.to_string(),
        };
        if let Some(ext) = extension {
            name.push('.');
            name.push_str(ext);
        }
        parent.join(name)
    };

    let first = build(None);
    if !exists(&first) {
        return first;
    }

    let mut n = 1;
    loop {
        let candidate = build(Some(n));
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// `Path::exists` follows symlinks; a dangling link still occupies the name.
fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Verifies that new entries can be created inside `dir`.
///
/// Permission bits alone are not reliable (ACLs, read-only mounts, root), so this
/// creates and removes a probe file.
pub fn ensure_writable(dir: &Path) -> io::Result<()> {
    let probe = dir.join(format!(".dirpack_probe_{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)?;
    fs::remove_file(&probe)
}

/// Verifies that the entries of `dir` can be listed.
pub fn ensure_readable(dir: &Path) -> io::Result<()> {
    fs::read_dir(dir).map(|_| ())
}

/// Why a directory move did not complete.
#[derive(Debug)]
pub enum MoveError {
    /// Nothing was moved; the source is intact.
    NotMoved(io::Error),
    /// The destination holds a complete copy, but the source could only be partly
    /// removed. Both paths now hold data.
    SourceLeftBehind(io::Error),
}

impl MoveError {
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::NotMoved(e) | Self::SourceLeftBehind(e) => e,
        }
    }
}

impl std::fmt::Display for MoveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotMoved(e) => write!(f, "{}", e),
            Self::SourceLeftBehind(e) => {
                write!(f, "copied, but the source could not be fully removed: {}", e)
            }
        }
    }
}

impl std::error::Error for MoveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.io_error())
    }
}

impl From<io::Error> for MoveError {
    fn from(e: io::Error) -> Self {
        Self::NotMoved(e)
    }
}

/// Moves a directory tree from `from` to `to`.
///
/// Uses `rename` when both paths are on the same filesystem. Across filesystems the
/// tree is copied and the source removed afterwards; if the copy fails the partial
/// destination is removed and the source is left untouched. If only the removal
/// fails, [`MoveError::SourceLeftBehind`] is returned and `to` is complete.
pub fn move_dir(from: &Path, to: &Path) -> Result<(), MoveError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                "rename crosses filesystems, copying instead"
            );
            copy_then_remove(from, to, |p: &Path| fs::remove_dir_all(p))
        }
        Err(e) => Err(MoveError::NotMoved(e)),
    }
}

fn copy_then_remove(
    from: &Path,
    to: &Path,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> Result<(), MoveError> {
    if let Err(copy_err) = copy_tree(from, to) {
        if let Err(cleanup_err) = fs::remove_dir_all(to) {
            tracing::error!(
                path = %to.display(),
                error = %cleanup_err,
                "could not remove partial copy"
            );
        }
        return Err(MoveError::NotMoved(copy_err));
    }
    remove(from).map_err(|e| {
        tracing::error!(
            source = %from.display(),
            copy = %to.display(),
            error = %e,
            "copy is complete but the source was only partly removed"
        );
        MoveError::SourceLeftBehind(e)
    })
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let destination = fs::read_link(link)?;
    std::os::unix::fs::symlink(destination, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}
