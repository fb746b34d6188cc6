//! The scan → archive → relocate controller.
//!
//! [`Pipeline::run`] walks the immediate children of an input root one at a
//! time. Each tier-1 directory gets a [`DirectoryTask`] that moves through the
//! [`TaskStatus`] state machine; failures are recorded on the task and never
//! stop the remaining directories from being processed.

use crate::archive::{ArchiveBuilder, ArchiveOutcome};
use crate::config::{CompressConfig, ConfigError, SkipRules};
use crate::fs_ops;
use crate::output::OutputFormatter;
use crate::relocate::{BackupRelocator, RelocationError};
use crate::scanner::DirectoryScanner;
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::Dispatch;

/// Lifecycle of a tier-1 directory within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Scanned,
    /// File count at or below the threshold. Terminal.
    Skipped,
    /// The directory could not be traversed. Terminal failure.
    ScanFailed,
    Compressing,
    Compressed,
    /// No archive was produced and the directory was not touched. Terminal failure.
    CompressFailed,
    BackingUp,
    /// Archived and relocated. Terminal success.
    BackedUp,
    /// Archived but not relocated: no data lost, nothing reclaimed. Terminal failure.
    BackupFailed,
}

impl TaskStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Scanned)
                | (Pending, ScanFailed)
                | (Scanned, Skipped)
                | (Scanned, Compressing)
                | (Compressing, Compressed)
                | (Compressing, CompressFailed)
                | (Compressed, BackingUp)
                | (BackingUp, BackedUp)
                | (BackingUp, BackupFailed)
        )
    }

    /// True once no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Skipped
                | TaskStatus::ScanFailed
                | TaskStatus::CompressFailed
                | TaskStatus::BackedUp
                | TaskStatus::BackupFailed
        )
    }

    /// True for terminal states that count against the run.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::ScanFailed | TaskStatus::CompressFailed | TaskStatus::BackupFailed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scanned => "scanned",
            TaskStatus::Skipped => "skipped",
            TaskStatus::ScanFailed => "scan failed",
            TaskStatus::Compressing => "compressing",
            TaskStatus::Compressed => "compressed",
            TaskStatus::CompressFailed => "compress failed",
            TaskStatus::BackingUp => "backing up",
            TaskStatus::BackedUp => "backed up",
            TaskStatus::BackupFailed => "backup failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-directory record for one run.
#[derive(Debug, Clone)]
pub struct DirectoryTask {
    pub tier1_path: PathBuf,
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub status: TaskStatus,
    /// Archive produced for this directory, if any.
    pub archive_path: Option<PathBuf>,
    /// Where the original now lives, if relocated.
    pub backup_path: Option<PathBuf>,
    /// Files missing from the archive.
    pub failed_files: Vec<PathBuf>,
    /// Why the task failed.
    pub error: Option<String>,
    /// The original could not be restored after a failed relocation.
    pub needs_manual_intervention: bool,
}

impl DirectoryTask {
    pub fn new(tier1_path: PathBuf) -> Self {
        Self {
            tier1_path,
            file_count: 0,
            total_size_bytes: 0,
            status: TaskStatus::Pending,
            archive_path: None,
            backup_path: None,
            failed_files: Vec::new(),
            error: None,
            needs_manual_intervention: false,
        }
    }

    /// Moves to `next`, which must be a legal successor.
    fn advance(&mut self, next: TaskStatus) {
        debug_assert!(
            self.status.can_advance_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }

    fn fail(&mut self, next: TaskStatus, error: impl std::fmt::Display) {
        self.advance(next);
        self.error = Some(error.to_string());
    }

    /// Directory name for display.
    pub fn name(&self) -> String {
        self.tier1_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.tier1_path.display().to_string())
    }
}

/// Aggregated outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tasks: Vec<DirectoryTask>,
    /// Bytes across all scanned tier-1 directories.
    pub total_bytes: u64,
    /// Files across all scanned tier-1 directories.
    pub total_files: usize,
    /// Uncompressed bytes written into archives.
    pub archived_bytes: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when every directory that crossed the threshold reached `BackedUp`.
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| !t.status.is_failure())
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Tasks that ended in a failure state.
    pub fn failures(&self) -> impl Iterator<Item = &DirectoryTask> {
        self.tasks.iter().filter(|t| t.status.is_failure())
    }
}

/// Failures at the input-root level that abort the whole run.
#[derive(Debug)]
pub enum PipelineError {
    /// The input directory does not exist.
    InputMissing(PathBuf),
    /// The input path is not a directory.
    NotADirectory(PathBuf),
    /// Missing read or write access to the input directory.
    Permission {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Listing the input directory failed.
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputMissing(path) => {
                write!(f, "Input directory {} does not exist", path.display())
            }
            Self::NotADirectory(path) => write!(f, "{} is not a directory", path.display()),
            Self::Permission { path, source } => write!(
                f,
                "Insufficient permissions for directory {}: {}",
                path.display(),
                source
            ),
            Self::ReadFailed { path, source } => {
                write!(f, "Failed to list {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Permission { source, .. } | Self::ReadFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Sequences scanning, archiving and relocation for every tier-1 directory.
pub struct Pipeline {
    config: CompressConfig,
    skip_rules: SkipRules,
    builder: ArchiveBuilder,
    dispatch: Dispatch,
}

impl Pipeline {
    /// Creates a pipeline that logs through `dispatch`.
    ///
    /// Pass [`Dispatch::none`] to run silently.
    pub fn new(config: CompressConfig, dispatch: Dispatch) -> Result<Self, ConfigError> {
        config.validate()?;
        let skip_rules = config.skip_rules()?;
        Ok(Self {
            builder: ArchiveBuilder::new(&config),
            skip_rules,
            config,
            dispatch,
        })
    }

    /// Processes every tier-1 directory under `input_root`.
    ///
    /// Directories with strictly more than `threshold` files are archived and
    /// then relocated under `input_root/<backup_dir>`. Per-directory failures are
    /// recorded in the summary; only input-root problems return `Err`.
    ///
    /// Each call scans with a fresh cache, so repeated runs see the current tree.
    pub fn run(&self, input_root: &Path, threshold: u64) -> Result<RunSummary, PipelineError> {
        tracing::dispatcher::with_default(&self.dispatch, || {
            let result = self.process(input_root, threshold);
            if let Err(e) = &result {
                tracing::error!("critical error processing directories: {}", e);
            }
            result
        })
    }

    fn process(&self, input_root: &Path, threshold: u64) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let candidates = self.tier1_candidates(input_root)?;
        let relocator = BackupRelocator::new(input_root.join(&self.config.backup_dir));
        let scanner = DirectoryScanner::new();
        let mut summary = RunSummary::default();

        for tier1 in candidates {
            let task = self.process_directory(tier1, threshold, &scanner, &relocator, &mut summary);
            summary.tasks.push(task);
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            "directory processing completed in {:.2}s",
            summary.elapsed.as_secs_f64()
        );
        tracing::info!(
            "total processed: {:.2} MB",
            summary.total_bytes as f64 / (1024.0 * 1024.0)
        );
        Ok(summary)
    }

    /// Validates the input root and lists its eligible children in name order.
    fn tier1_candidates(&self, input_root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let metadata = fs::metadata(input_root).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::InputMissing(input_root.to_path_buf()),
            _ => PipelineError::Permission {
                path: input_root.to_path_buf(),
                source: e,
            },
        })?;
        if !metadata.is_dir() {
            return Err(PipelineError::NotADirectory(input_root.to_path_buf()));
        }
        fs_ops::ensure_readable(input_root)
            .and_then(|()| fs_ops::ensure_writable(input_root))
            .map_err(|e| PipelineError::Permission {
                path: input_root.to_path_buf(),
                source: e,
            })?;

        let entries = fs::read_dir(input_root).map_err(|e| PipelineError::ReadFailed {
            path: input_root.to_path_buf(),
            source: e,
        })?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::ReadFailed {
                path: input_root.to_path_buf(),
                source: e,
            })?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name();
            if !is_dir || self.skip_rules.is_reserved(&name.to_string_lossy()) {
                continue;
            }
            candidates.push(entry.path());
        }
        candidates.sort();
        Ok(candidates)
    }

    fn process_directory(
        &self,
        tier1: PathBuf,
        threshold: u64,
        scanner: &DirectoryScanner,
        relocator: &BackupRelocator,
        summary: &mut RunSummary,
    ) -> DirectoryTask {
        let mut task = DirectoryTask::new(tier1);
        tracing::info!("processing directory: {}", task.tier1_path.display());

        let scan = match scanner.scan(&task.tier1_path) {
            Ok(scan) => scan,
            Err(e) => {
                tracing::error!("error processing {}: {}", task.tier1_path.display(), e);
                task.fail(TaskStatus::ScanFailed, e);
                return task;
            }
        };
        task.file_count = scan.file_count();
        task.total_size_bytes = scan.total_size();
        task.advance(TaskStatus::Scanned);
        summary.total_files += task.file_count;
        summary.total_bytes += task.total_size_bytes;

        tracing::info!(
            "found {} files in {} (size: {:.2} MB)",
            task.file_count,
            task.tier1_path.display(),
            task.total_size_bytes as f64 / (1024.0 * 1024.0)
        );

        if task.file_count as u64 <= threshold {
            tracing::info!("skipping {} (below threshold)", task.tier1_path.display());
            task.advance(TaskStatus::Skipped);
            return task;
        }

        tracing::info!(
            "directory {} exceeds threshold; compressing",
            task.tier1_path.display()
        );
        task.advance(TaskStatus::Compressing);

        let progress = self.progress_bar(task.total_size_bytes);
        let archived = self
            .builder
            .build_with_progress(&task.tier1_path, &scan, &progress);
        progress.finish_and_clear();

        let outcome: ArchiveOutcome = match archived {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("failed to compress {}: {}", task.tier1_path.display(), e);
                task.fail(TaskStatus::CompressFailed, e);
                return task;
            }
        };
        tracing::info!("successfully compressed to {}", outcome.archive_path.display());
        summary.archived_bytes += outcome.processed_bytes;
        task.archive_path = Some(outcome.archive_path);
        task.failed_files = outcome.failed_source_paths;
        task.advance(TaskStatus::Compressed);

        task.advance(TaskStatus::BackingUp);
        match relocator.backup(&task.tier1_path) {
            Ok(relocated) => {
                tracing::info!("successfully moved to {}", relocated.backup_path.display());
                task.backup_path = Some(relocated.backup_path);
                task.advance(TaskStatus::BackedUp);
            }
            Err(e) => {
                tracing::error!(
                    "failed to backup {}, but compression succeeded: {}",
                    task.tier1_path.display(),
                    e
                );
                task.needs_manual_intervention = e.needs_manual_intervention();
                if let RelocationError::SourceLeftBehind { backup, .. } = &e {
                    task.backup_path = Some(backup.clone());
                }
                task.fail(TaskStatus::BackupFailed, e);
            }
        }
        task
    }

    fn progress_bar(&self, total_bytes: u64) -> ProgressBar {
        if self.config.show_progress {
            OutputFormatter::create_byte_progress_bar(total_bytes)
        } else {
            ProgressBar::hidden()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quiet_config() -> CompressConfig {
        CompressConfig {
            show_progress: false,
            ..Default::default()
        }
    }

    fn populate(dir: &Path, files: usize) {
        fs::create_dir_all(dir).expect("Failed to create dir");
        for i in 0..files {
            fs::write(dir.join(format!("file_{}.txt", i)), format!("content {}", i))
                .expect("Failed to write file");
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            TaskStatus::Pending,
            TaskStatus::Scanned,
            TaskStatus::Compressing,
            TaskStatus::Compressed,
            TaskStatus::BackingUp,
            TaskStatus::BackedUp,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(TaskStatus::BackedUp.is_terminal());
        assert!(!TaskStatus::BackedUp.is_failure());
    }

    #[test]
    fn test_relocation_never_precedes_archive() {
        assert!(!TaskStatus::Scanned.can_advance_to(TaskStatus::BackingUp));
        assert!(!TaskStatus::Compressing.can_advance_to(TaskStatus::BackingUp));
        assert!(!TaskStatus::CompressFailed.can_advance_to(TaskStatus::BackingUp));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::Scanned,
            TaskStatus::Skipped,
            TaskStatus::ScanFailed,
            TaskStatus::Compressing,
            TaskStatus::Compressed,
            TaskStatus::CompressFailed,
            TaskStatus::BackingUp,
            TaskStatus::BackedUp,
            TaskStatus::BackupFailed,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in &all {
                assert!(!from.can_advance_to(*to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_summary_success_ignores_skipped() {
        let mut skipped = DirectoryTask::new(PathBuf::from("a"));
        skipped.status = TaskStatus::Skipped;
        let mut done = DirectoryTask::new(PathBuf::from("b"));
        done.status = TaskStatus::BackedUp;

        let mut summary = RunSummary {
            tasks: vec![skipped, done],
            ..Default::default()
        };
        assert!(summary.is_success());

        let mut failed = DirectoryTask::new(PathBuf::from("c"));
        failed.status = TaskStatus::BackupFailed;
        summary.tasks.push(failed);
        assert!(!summary.is_success());
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn test_threshold_is_strictly_greater_than() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        populate(&temp_dir.path().join("exact"), 3);
        populate(&temp_dir.path().join("over"), 4);

        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();
        let summary = pipeline.run(temp_dir.path(), 3).expect("Run failed");

        let status_of = |name: &str| {
            summary
                .tasks
                .iter()
                .find(|t| t.name() == name)
                .map(|t| t.status)
        };
        assert_eq!(status_of("exact"), Some(TaskStatus::Skipped));
        assert_eq!(status_of("over"), Some(TaskStatus::BackedUp));
        assert!(summary.is_success());
        assert_eq!(summary.total_files, 7);
    }

    #[test]
    fn test_reserved_entries_are_not_candidates() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        populate(&temp_dir.path().join(".backups/old"), 10);
        populate(&temp_dir.path().join(".hidden"), 10);
        populate(&temp_dir.path().join("keep-me"), 10);
        fs::write(temp_dir.path().join("loose.txt"), "x").unwrap();

        let config = CompressConfig {
            skip_patterns: vec!["keep-*".to_string()],
            ..quiet_config()
        };
        let pipeline = Pipeline::new(config, Dispatch::none()).unwrap();
        let summary = pipeline.run(temp_dir.path(), 1).expect("Run failed");

        assert!(summary.tasks.is_empty());
        assert!(temp_dir.path().join(".hidden").exists());
        assert!(temp_dir.path().join("keep-me").exists());
    }

    #[test]
    fn test_candidates_sorted_by_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        for name in ["charlie", "alpha", "bravo"] {
            populate(&temp_dir.path().join(name), 1);
        }

        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();
        let summary = pipeline.run(temp_dir.path(), 10).expect("Run failed");

        let names: Vec<String> = summary.tasks.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }

    #[test]
    fn test_missing_root_aborts_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();

        let result = pipeline.run(&temp_dir.path().join("missing"), 10);
        assert!(matches!(result, Err(PipelineError::InputMissing(_))));
    }

    #[test]
    fn test_root_must_be_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();

        assert!(matches!(
            pipeline.run(&file, 10),
            Err(PipelineError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CompressConfig {
            threshold: 0,
            ..Default::default()
        };
        assert!(Pipeline::new(config, Dispatch::none()).is_err());
    }

    #[test]
    fn test_backup_failure_keeps_archive() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        populate(&temp_dir.path().join("logs"), 5);
        // A file squatting on the backup root name blocks relocation
        fs::write(temp_dir.path().join(".backups"), "in the way").unwrap();

        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();
        let summary = pipeline.run(temp_dir.path(), 2).expect("Run failed");

        let task = &summary.tasks[0];
        assert_eq!(task.status, TaskStatus::BackupFailed);
        assert!(!task.needs_manual_intervention);
        assert!(task.error.is_some());
        let archive = task.archive_path.as_ref().expect("Archive should exist");
        assert!(archive.exists());
        assert!(temp_dir.path().join("logs").exists());
        assert!(!summary.is_success());
    }

    #[test]
    fn test_repeated_runs_rescan_the_tree() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let logs = temp_dir.path().join("logs");
        populate(&logs, 2);
        let pipeline = Pipeline::new(quiet_config(), Dispatch::none()).unwrap();

        let first = pipeline.run(temp_dir.path(), 3).expect("Run failed");
        assert_eq!(first.tasks[0].status, TaskStatus::Skipped);

        populate(&logs, 6);
        let second = pipeline.run(temp_dir.path(), 3).expect("Run failed");
        assert_eq!(second.tasks[0].file_count, 6);
        assert_eq!(second.tasks[0].status, TaskStatus::BackedUp);
    }

    #[test]
    fn test_uncompressed_level_archives_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        populate(&temp_dir.path().join("logs"), 5);
        let config = CompressConfig {
            compression_level: 0,
            ..quiet_config()
        };

        let pipeline = Pipeline::new(config, Dispatch::none()).unwrap();
        let summary = pipeline.run(temp_dir.path(), 2).expect("Run failed");

        assert_eq!(summary.tasks[0].status, TaskStatus::BackedUp);
        assert!(summary.is_success());
    }
}
