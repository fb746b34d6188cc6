//! Synthetic directory trees for exercising the pipeline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::Path;

const CONTENT_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789\n";

/// Shape of a generated tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeSpec {
    /// Deepest level that still receives files (the base is level 0).
    pub max_depth: usize,
    /// Upper bound on subdirectories per directory.
    pub max_children: usize,
    /// Upper bound on files per directory.
    pub max_files: usize,
}

impl Default for TreeSpec {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_children: 3,
            max_files: 10,
        }
    }
}

/// Counts of what was written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenerateReport {
    pub files: usize,
    pub directories: usize,
}

/// Fills `base` with random files and subdirectories.
///
/// Every directory gets `file_NNNN.txt` files holding 100 to 1000 random
/// characters, and `dir_NNNN` children down to `shape.max_depth`. Randomly
/// repeated names overwrite or merge rather than fail.
pub fn generate_tree(base: &Path, shape: TreeSpec, seed: Option<u64>) -> io::Result<GenerateReport> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    fs::create_dir_all(base)?;
    let mut report = GenerateReport::default();
    fill(base, 0, shape, &mut rng, &mut report)?;
    Ok(report)
}

fn fill(
    dir: &Path,
    depth: usize,
    shape: TreeSpec,
    rng: &mut StdRng,
    report: &mut GenerateReport,
) -> io::Result<()> {
    if depth > shape.max_depth {
        return Ok(());
    }

    for _ in 0..rng.gen_range(0..=shape.max_files) {
        let path = dir.join(format!("file_{}.txt", rng.gen_range(1000..=9999)));
        let len = rng.gen_range(100..=1000);
        let content: Vec<u8> = (0..len)
            .map(|_| CONTENT_CHARS[rng.gen_range(0..CONTENT_CHARS.len())])
            .collect();
        if !path.exists() {
            report.files += 1;
        }
        fs::write(&path, content)?;
    }

    for _ in 0..rng.gen_range(0..=shape.max_children) {
        let child = dir.join(format!("dir_{}", rng.gen_range(1000..=9999)));
        if !child.exists() {
            fs::create_dir(&child)?;
            report.directories += 1;
        }
        fill(&child, depth + 1, shape, rng, report)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::DirectoryScanner;
    use tempfile::TempDir;

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let first = TempDir::new().expect("Failed to create temp directory");
        let second = TempDir::new().expect("Failed to create temp directory");

        let a = generate_tree(first.path(), TreeSpec::default(), Some(42)).unwrap();
        let b = generate_tree(second.path(), TreeSpec::default(), Some(42)).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_report_matches_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path().join("tree");

        let report = generate_tree(&base, TreeSpec::default(), Some(7)).unwrap();
        let (count, _) = DirectoryScanner::new().count_files(&base).unwrap();

        assert_eq!(report.files, count);
    }

    #[test]
    fn test_zero_depth_stays_flat() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let shape = TreeSpec {
            max_depth: 0,
            max_children: 3,
            max_files: 5,
        };

        generate_tree(temp_dir.path(), shape, Some(1)).unwrap();

        for entry in fs::read_dir(temp_dir.path()).unwrap().flatten() {
            if entry.path().is_dir() {
                assert_eq!(fs::read_dir(entry.path()).unwrap().count(), 0);
            }
        }
    }

    #[test]
    fn test_file_sizes_within_bounds() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        generate_tree(temp_dir.path(), TreeSpec::default(), Some(3)).unwrap();

        let scan = DirectoryScanner::new().scan(temp_dir.path()).unwrap();
        for entry in &scan.entries {
            assert!((100..=1000).contains(&entry.size), "{:?}", entry);
        }
    }
}
