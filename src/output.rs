//! Output formatting and styling module.
//!
//! Provides the human-readable end-of-run report and the byte progress bar
//! shown while archiving. Detailed events go through `tracing`; this module
//! only renders what a user reads at the end.

use crate::pipeline::{DirectoryTask, RunSummary, TaskStatus};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

/// Manages CLI report output with consistent styling.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates a progress bar measured in bytes.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dirpack::output::OutputFormatter;
    /// let pb = OutputFormatter::create_byte_progress_bar(1024 * 1024);
    /// pb.inc(4096);
    /// pb.finish_and_clear();
    /// ```
    pub fn create_byte_progress_bar(total_bytes: u64) -> ProgressBar {
        let pb = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// One-line description of what happened to a directory.
    pub fn task_detail(task: &DirectoryTask) -> String {
        match task.status {
            TaskStatus::Skipped => "below threshold".to_string(),
            TaskStatus::BackedUp => {
                let mut detail = match &task.backup_path {
                    Some(path) => format!("moved to {}", path.display()),
                    None => String::new(),
                };
                if !task.failed_files.is_empty() {
                    detail.push_str(&format!(
                        " ({} {} missing from archive)",
                        task.failed_files.len(),
                        if task.failed_files.len() == 1 { "file" } else { "files" }
                    ));
                }
                detail
            }
            TaskStatus::BackupFailed if task.needs_manual_intervention => format!(
                "MANUAL INTERVENTION REQUIRED: {}",
                task.error.as_deref().unwrap_or("unknown error")
            ),
            TaskStatus::BackupFailed => format!(
                "archived but not moved: {}",
                task.error.as_deref().unwrap_or("unknown error")
            ),
            _ => task.error.clone().unwrap_or_default(),
        }
    }

    /// Prints the per-directory table and run totals.
    pub fn run_summary(summary: &RunSummary) {
        Self::header("SUMMARY");

        if summary.tasks.is_empty() {
            println!("No tier-1 directories found.");
            return;
        }

        let name_width = summary
            .tasks
            .iter()
            .map(|t| t.name().len())
            .max()
            .unwrap_or(0)
            .max(9); // At least "Directory" width
        let status_width = 15;

        println!(
            "{:<name_width$} | {:<status_width$} | {}",
            "Directory".bold(),
            "Status".bold(),
            "Detail".bold(),
        );
        println!("{}", "-".repeat(name_width + status_width + 20));

        for task in &summary.tasks {
            let label = format!("{:<status_width$}", task.status.label());
            let status = match task.status {
                TaskStatus::BackedUp => label.green(),
                TaskStatus::Skipped => label.normal(),
                TaskStatus::BackupFailed => label.yellow(),
                _ => label.red(),
            };
            println!(
                "{:<name_width$} | {} | {}",
                task.name(),
                status,
                Self::task_detail(task),
            );
        }

        println!("{}", "-".repeat(name_width + status_width + 20));
        println!(
            "Directories: {} seen, {} archived, {} skipped, {} failed",
            summary.tasks.len(),
            summary.count(TaskStatus::BackedUp),
            summary.count(TaskStatus::Skipped),
            summary.failures().count(),
        );
        println!(
            "Files: {}  Size: {:.2} MB  Archived: {:.2} MB  Elapsed: {:.2}s",
            summary.total_files,
            summary.total_bytes as f64 / (1024.0 * 1024.0),
            summary.archived_bytes as f64 / (1024.0 * 1024.0),
            summary.elapsed.as_secs_f64(),
        );

        if summary.is_success() {
            Self::success("All directories over the threshold were archived and relocated.");
        } else {
            Self::warning("Some directories could not be processed. See details above.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detail_for_backed_up_with_failures() {
        let mut task = DirectoryTask::new(PathBuf::from("/data/logs"));
        task.status = TaskStatus::BackedUp;
        task.backup_path = Some(PathBuf::from("/data/.backups/logs"));
        task.failed_files = vec![PathBuf::from("/data/logs/locked.txt")];

        let detail = OutputFormatter::task_detail(&task);
        assert!(detail.contains("/data/.backups/logs"));
        assert!(detail.contains("1 file missing"));
    }

    #[test]
    fn test_detail_flags_manual_intervention() {
        let mut task = DirectoryTask::new(PathBuf::from("/data/logs"));
        task.status = TaskStatus::BackupFailed;
        task.needs_manual_intervention = true;
        task.error = Some("restore failed".to_string());

        assert!(OutputFormatter::task_detail(&task).starts_with("MANUAL INTERVENTION"));
    }

    #[test]
    fn test_detail_for_skipped() {
        let mut task = DirectoryTask::new(PathBuf::from("/data/cache"));
        task.status = TaskStatus::Skipped;
        assert_eq!(OutputFormatter::task_detail(&task), "below threshold");
    }
}
