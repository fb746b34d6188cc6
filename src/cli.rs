//! Command-line interface module for dirpack.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing and validation
//! - Configuration and log sink wiring
//! - Dispatch to the compress pipeline or the tree generator

use crate::config::Config;
use crate::generate::{TreeSpec, generate_tree};
use crate::logging;
use crate::output::OutputFormatter;
use crate::pipeline::Pipeline;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Archive and relocate tier-1 directories that hold too many files.
#[derive(Debug, Parser)]
#[command(name = "dirpack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Represents a CLI command to execute.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Archive and relocate tier-1 directories above the file-count threshold.
    Compress {
        /// Directory whose immediate subdirectories are inspected.
        directory: PathBuf,
        /// File count above which a directory is archived [default: 3000].
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        threshold: Option<u64>,
        /// Path to a TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Do not draw a progress bar.
        #[arg(long)]
        no_progress: bool,
    },
    /// Generate a random directory tree for testing.
    Generate {
        /// Base directory for the generated tree.
        directory: PathBuf,
        /// Maximum depth of the directory tree.
        #[arg(long, default_value_t = 3)]
        max_depth: usize,
        /// Maximum number of child directories per directory.
        #[arg(long, default_value_t = 3)]
        max_children: usize,
        /// Seed for reproducible trees.
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Runs the parsed command.
///
/// Returns `Ok(true)` when everything succeeded, `Ok(false)` when the command
/// ran but some directories failed, and `Err` when it could not run at all.
pub fn run_cli(cli: Cli) -> Result<bool, String> {
    match cli.command {
        Command::Compress {
            directory,
            threshold,
            config,
            no_progress,
        } => run_compress(&directory, threshold, config.as_deref(), no_progress),
        Command::Generate {
            directory,
            max_depth,
            max_children,
            seed,
        } => run_generate(&directory, max_depth, max_children, seed),
    }
}

/// Loads configuration, wires the log sinks and runs the pipeline once.
pub fn run_compress(
    directory: &Path,
    threshold: Option<u64>,
    config_path: Option<&Path>,
    no_progress: bool,
) -> Result<bool, String> {
    let mut config =
        Config::load(config_path).map_err(|e| format!("Error loading configuration: {}", e))?;
    if let Some(threshold) = threshold {
        config.compress.threshold = threshold;
    }
    if no_progress {
        config.compress.show_progress = false;
    }

    let (dispatch, _guard) = logging::build_dispatch(&config.logging).map_err(|e| {
        format!(
            "Error opening log file {}: {}",
            config.logging.file.display(),
            e
        )
    })?;

    let threshold = config.compress.threshold;
    let pipeline = Pipeline::new(config.compress, dispatch)
        .map_err(|e| format!("Invalid configuration: {}", e))?;
    let summary = pipeline
        .run(directory, threshold)
        .map_err(|e| e.to_string())?;

    OutputFormatter::run_summary(&summary);
    Ok(summary.is_success())
}

fn run_generate(
    directory: &Path,
    max_depth: usize,
    max_children: usize,
    seed: Option<u64>,
) -> Result<bool, String> {
    println!("Generating test directory structure in {}", directory.display());
    println!(
        "Max depth: {}, Max children per directory: {}",
        max_depth, max_children
    );

    let shape = TreeSpec {
        max_depth,
        max_children,
        ..Default::default()
    };
    let report = generate_tree(directory, shape, seed)
        .map_err(|e| format!("Error generating tree in {}: {}", directory.display(), e))?;

    OutputFormatter::success(&format!(
        "Test directory structure created: {} files in {} directories",
        report.files, report.directories
    ));
    Ok(true)
}
