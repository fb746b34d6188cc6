//! Backup relocation of tier-1 directories.
//!
//! A directory is moved into the backup root in two phases: first to a
//! temporary name inside the backup root, then atomically renamed to its final
//! name. The result is durable only after the rename. Any failure in between
//! tries to move the directory back; if that also fails, the data stays at the
//! temporary location and the error says where.

use crate::fs_ops::{self, MoveError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Result of a successful relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationOutcome {
    /// Final location of the directory under the backup root.
    pub backup_path: PathBuf,
}

/// Errors that can occur while relocating a directory.
#[derive(Debug)]
pub enum RelocationError {
    /// The backup root could not be created.
    BackupRoot { path: PathBuf, source: io::Error },
    /// No write access to the backup root.
    Permission { path: PathBuf, source: io::Error },
    /// Moving the directory to its temporary name failed; the original is in place.
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// The final rename failed and the directory was restored to its original path.
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// The backup is complete at `backup`, but the original directory could only be
    /// partly removed and its remnant is still at `original`.
    SourceLeftBehind {
        original: PathBuf,
        backup: PathBuf,
        source: io::Error,
    },
    /// The final rename failed and the directory could not be restored.
    ///
    /// The data is left at `stranded` and needs manual intervention.
    Unrecoverable {
        original: PathBuf,
        stranded: PathBuf,
        source: io::Error,
        restore_error: io::Error,
    },
}

impl RelocationError {
    /// True when the original directory is neither in place nor backed up.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable { .. })
    }

    /// True when leftovers on disk have to be cleaned up by hand.
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(
            self,
            Self::Unrecoverable { .. } | Self::SourceLeftBehind { .. }
        )
    }
}

impl std::fmt::Display for RelocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackupRoot { path, source } => {
                write!(f, "Failed to create backup root {}: {}", path.display(), source)
            }
            Self::Permission { path, source } => {
                write!(
                    f,
                    "No write access to backup directory {}: {}",
                    path.display(),
                    source
                )
            }
            Self::Move { from, to, source } => {
                write!(
                    f,
                    "Failed to move {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            Self::Rename { from, to, source } => {
                write!(
                    f,
                    "Failed to rename {} to {} (original restored): {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            Self::SourceLeftBehind {
                original,
                backup,
                source,
            } => {
                write!(
                    f,
                    "Backed up {} to {}, but the original could only be partly removed ({}); remove the remnant manually",
                    original.display(),
                    backup.display(),
                    source
                )
            }
            Self::Unrecoverable {
                original,
                stranded,
                source,
                restore_error,
            } => {
                write!(
                    f,
                    "Backup of {} failed ({}) and restoring it failed ({}); data left at {}, manual intervention required",
                    original.display(),
                    source,
                    restore_error,
                    stranded.display()
                )
            }
        }
    }
}

impl std::error::Error for RelocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BackupRoot { source, .. }
            | Self::Permission { source, .. }
            | Self::Move { source, .. }
            | Self::Rename { source, .. }
            | Self::SourceLeftBehind { source, .. }
            | Self::Unrecoverable { source, .. } => Some(source),
        }
    }
}

/// Result type for relocation operations.
pub type RelocationResult<T> = Result<T, RelocationError>;

/// The two filesystem primitives a relocation is built from.
pub trait DirectoryMover {
    /// Moves a directory tree, possibly across filesystems. Need not be atomic.
    ///
    /// [`MoveError::SourceLeftBehind`] means `to` is complete but `from` still
    /// partly exists.
    fn transfer(&self, from: &Path, to: &Path) -> Result<(), MoveError>;

    /// Renames within one filesystem. Must be atomic.
    fn commit(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`DirectoryMover`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMover;

impl DirectoryMover for FsMover {
    fn transfer(&self, from: &Path, to: &Path) -> Result<(), MoveError> {
        fs_ops::move_dir(from, to)
    }

    fn commit(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Moves tier-1 directories into a reserved backup root.
#[derive(Debug, Clone)]
pub struct BackupRelocator<M = FsMover> {
    backup_root: PathBuf,
    mover: M,
}

impl BackupRelocator<FsMover> {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self::with_mover(backup_root, FsMover)
    }
}

impl<M: DirectoryMover> BackupRelocator<M> {
    pub fn with_mover(backup_root: impl Into<PathBuf>, mover: M) -> Self {
        Self {
            backup_root: backup_root.into(),
            mover,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Moves `directory` under the backup root.
    ///
    /// The target keeps the directory's name unless that name is taken, in which
    /// case `_{YYYYMMDD_HHMMSS}` is appended. Existing backups are never overwritten.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dirpack::relocate::BackupRelocator;
    /// use std::path::Path;
    ///
    /// let relocator = BackupRelocator::new("/data/.backups");
    /// match relocator.backup(Path::new("/data/logs")) {
    ///     Ok(outcome) => println!("Moved to {}", outcome.backup_path.display()),
    ///     Err(e) => eprintln!("Backup failed: {}", e),
    /// }
    /// ```
    pub fn backup(&self, directory: &Path) -> RelocationResult<RelocationOutcome> {
        fs::create_dir_all(&self.backup_root).map_err(|e| RelocationError::BackupRoot {
            path: self.backup_root.clone(),
            source: e,
        })?;

        fs_ops::ensure_writable(&self.backup_root).map_err(|e| RelocationError::Permission {
            path: self.backup_root.clone(),
            source: e,
        })?;

        let name = directory
            .file_name()
            .ok_or_else(|| RelocationError::Move {
                from: directory.to_path_buf(),
                to: self.backup_root.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "directory has no name component",
                ),
            })?
            .to_string_lossy()
            .into_owned();

        let target = self.target_path(&name);
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(name);
        let temp = fs_ops::unique_path(&self.backup_root, &format!("{}.tmp", target_name), None);

        tracing::info!(
            directory = %directory.display(),
            backup = %target.display(),
            "moving directory to backup location"
        );

        // Phase one: nothing has moved on `NotMoved`.
        let left_behind = match self.mover.transfer(directory, &temp) {
            Ok(()) => None,
            Err(MoveError::NotMoved(e)) => {
                return Err(RelocationError::Move {
                    from: directory.to_path_buf(),
                    to: temp.clone(),
                    source: e,
                });
            }
            Err(MoveError::SourceLeftBehind(e)) => {
                tracing::error!(
                    directory = %directory.display(),
                    temp = %temp.display(),
                    error = %e,
                    "directory copied but only partly removed"
                );
                Some(e)
            }
        };

        // Phase two: the data sits at `temp` until this rename lands.
        if let Err(e) = self.mover.commit(&temp, &target) {
            tracing::error!(
                temp = %temp.display(),
                backup = %target.display(),
                error = %e,
                "rename into backup root failed, restoring original"
            );
            return Err(match left_behind {
                // The remnant occupies the original path, so the copy cannot go back.
                Some(remove_error) => {
                    tracing::error!(
                        directory = %directory.display(),
                        stranded = %temp.display(),
                        "UNRECOVERABLE: complete copy left at temporary location, manual intervention required"
                    );
                    RelocationError::Unrecoverable {
                        original: directory.to_path_buf(),
                        stranded: temp,
                        source: e,
                        restore_error: remove_error,
                    }
                }
                None => self.restore(directory, &temp, &target, e),
            });
        }

        if let Some(e) = left_behind {
            return Err(RelocationError::SourceLeftBehind {
                original: directory.to_path_buf(),
                backup: target,
                source: e,
            });
        }

        Ok(RelocationOutcome {
            backup_path: target,
        })
    }

    fn target_path(&self, name: &str) -> PathBuf {
        let plain = self.backup_root.join(name);
        if fs::symlink_metadata(&plain).is_err() {
            return plain;
        }
        fs_ops::unique_path(
            &self.backup_root,
            &format!("{}_{}", name, fs_ops::timestamp()),
            None,
        )
    }

    fn restore(
        &self,
        original: &Path,
        temp: &Path,
        target: &Path,
        cause: io::Error,
    ) -> RelocationError {
        match self.mover.transfer(temp, original) {
            Ok(()) => {
                tracing::warn!(directory = %original.display(), "original directory restored");
                RelocationError::Rename {
                    from: temp.to_path_buf(),
                    to: target.to_path_buf(),
                    source: cause,
                }
            }
            Err(MoveError::SourceLeftBehind(e)) => {
                tracing::warn!(
                    directory = %original.display(),
                    remnant = %temp.display(),
                    error = %e,
                    "original directory restored, temporary copy only partly removed"
                );
                RelocationError::Rename {
                    from: temp.to_path_buf(),
                    to: target.to_path_buf(),
                    source: cause,
                }
            }
            Err(MoveError::NotMoved(restore_error)) => {
                tracing::error!(
                    directory = %original.display(),
                    stranded = %temp.display(),
                    error = %restore_error,
                    "UNRECOVERABLE: failed to restore directory, manual intervention required"
                );
                RelocationError::Unrecoverable {
                    original: original.to_path_buf(),
                    stranded: temp.to_path_buf(),
                    source: cause,
                    restore_error,
                }
            }
        }
    }
}
