//! dirpack - relieve file-count pressure by archiving crowded directories
//!
//! This library scans the immediate subdirectories of an input root, and for
//! every one holding more files than a threshold writes a ZIP archive of its
//! contents and then moves the original into a reserved backup directory.

pub mod archive;
pub mod cli;
pub mod config;
pub mod fs_ops;
pub mod generate;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod relocate;
pub mod scanner;

pub use archive::{ArchiveBuilder, ArchiveError, ArchiveOutcome};
pub use config::{CompressConfig, Config, ConfigError, LoggingConfig};
pub use pipeline::{DirectoryTask, Pipeline, PipelineError, RunSummary, TaskStatus};
pub use relocate::{BackupRelocator, DirectoryMover, RelocationError, RelocationOutcome};
pub use scanner::{DirectoryScanner, FileEntry, ScanError, ScanResult};

pub use cli::{Cli, run_cli};
