//! Run configuration.
//!
//! Settings are read from a TOML file and fall back to built-in defaults for
//! anything not specified.
//!
//! # Configuration File Format
//!
//! ```toml
//! [compress]
//! threshold = 3000
//! backup_dir = ".backups"
//! buffer_size = 1048576
//! progress_interval_mb = 100
//! compression_level = 6
//! skip_patterns = ["node_modules", "keep-*"]
//! show_progress = true
//!
//! [logging]
//! file = "directory_compressor.log"
//! max_bytes = 10485760
//! max_files = 3
//! level = "info"
//! ```

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    ConfigInvalid(String),
    /// Invalid glob pattern in `skip_patterns`.
    InvalidGlobPattern(String),
    /// A setting is outside its allowed range.
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// IO error while reading configuration.
    IoError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::InvalidGlobPattern(pattern) => {
                write!(f, "Invalid glob pattern '{}'", pattern)
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "Invalid value for '{}': {}", key, reason)
            }
            ConfigError::IoError(msg) => write!(f, "IO error reading configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compress: CompressConfig,
    pub logging: LoggingConfig,
}

/// Settings for the scan, archive and relocate pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Tier-1 directories with more files than this are archived.
    pub threshold: u64,
    /// Name of the backup root created under the input directory.
    pub backup_dir: String,
    /// Transfer buffer size in bytes used while archiving.
    pub buffer_size: usize,
    /// Emit a progress event every this many megabytes.
    pub progress_interval_mb: u64,
    /// Deflate level, 0 to 9.
    pub compression_level: i64,
    /// Glob patterns; matching tier-1 directory names are never processed.
    pub skip_patterns: Vec<String>,
    /// Draw a progress bar while archiving.
    pub show_progress: bool,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            threshold: 3000,
            backup_dir: ".backups".to_string(),
            buffer_size: 1024 * 1024,
            progress_interval_mb: 100,
            compression_level: 6,
            skip_patterns: Vec::new(),
            show_progress: true,
        }
    }
}

/// Settings for the detailed log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path of the rotating log file.
    pub file: PathBuf,
    /// Rotate once the file reaches this many bytes.
    pub max_bytes: u64,
    /// Number of rotated files to keep.
    pub max_files: usize,
    /// Default level filter, overridden by `DIRPACK_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("directory_compressor.log"),
            max_bytes: 10 * 1024 * 1024,
            max_files: 3,
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.dirpackrc.toml` in the current directory
    /// 3. Look for `~/.config/dirpack/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be
    /// read, if any file found is malformed, or if validation fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::locate(config_path)?;
        config.validate()?;
        Ok(config)
    }

    fn locate(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(".dirpackrc.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("dirpack")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Check every setting against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.compress.validate()?;
        if self.logging.max_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "logging.max_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl CompressConfig {
    /// Check the pipeline settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::InvalidValue {
                key: "compress.threshold",
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "compress.buffer_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(0..=9).contains(&self.compression_level) {
            return Err(ConfigError::InvalidValue {
                key: "compress.compression_level",
                reason: format!("{} is outside 0..=9", self.compression_level),
            });
        }
        let name = self.backup_dir.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                key: "compress.backup_dir",
                reason: format!("'{}' must be a single directory name", name),
            });
        }
        self.skip_rules().map(|_| ())
    }

    /// Compile the tier-1 exclusion rules.
    pub fn skip_rules(&self) -> Result<SkipRules, ConfigError> {
        let patterns = self
            .skip_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SkipRules {
            backup_dir: self.backup_dir.clone(),
            patterns,
        })
    }
}

/// Decides which tier-1 names are reserved and never processed.
#[derive(Debug, Clone)]
pub struct SkipRules {
    backup_dir: String,
    patterns: Vec<Pattern>,
}

impl SkipRules {
    /// True for the backup root, hidden (dot-prefixed) names, and configured patterns.
    pub fn is_reserved(&self, name: &str) -> bool {
        name == self.backup_dir
            || name.starts_with('.')
            || self.patterns.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.compress.threshold, 3000);
        assert_eq!(config.compress.backup_dir, ".backups");
        assert_eq!(config.compress.buffer_size, 1024 * 1024);
        assert_eq!(config.logging.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.logging.max_files, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml("[compress]\nthreshold = 50\n").unwrap();
        assert_eq!(config.compress.threshold, 50);
        assert_eq!(config.compress.compression_level, 6);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_full_file() {
        let toml = r#"
            [compress]
            threshold = 10
            backup_dir = ".archive"
            buffer_size = 4096
            progress_interval_mb = 5
            compression_level = 9
            skip_patterns = ["keep-*"]
            show_progress = false

            [logging]
            file = "logs/run.log"
            max_bytes = 2048
            max_files = 5
            level = "debug"
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.compress.backup_dir, ".archive");
        assert!(!config.compress.show_progress);
        assert_eq!(config.logging.file, PathBuf::from("logs/run.log"));
        assert_eq!(config.logging.max_files, 5);
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml("[compress\nthreshold = ");
        assert!(matches!(result, Err(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = Config::from_toml("[compress]\nthreshold = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "compress.threshold",
                ..
            })
        ));
    }

    #[test]
    fn test_compression_level_zero_is_valid() {
        let config = CompressConfig {
            compression_level: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_compression_level_out_of_range() {
        let config = CompressConfig {
            compression_level: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_dir_must_be_a_single_name() {
        for bad in ["", ".", "..", "a/b", "..\\up"] {
            let config = CompressConfig {
                backup_dir: bad.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn test_invalid_skip_pattern() {
        let config = CompressConfig {
            skip_patterns: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.skip_rules(),
            Err(ConfigError::InvalidGlobPattern(_))
        ));
    }

    #[test]
    fn test_skip_rules() {
        let config = CompressConfig {
            skip_patterns: vec!["keep-*".to_string()],
            ..Default::default()
        };
        let rules = config.skip_rules().unwrap();

        assert!(rules.is_reserved(".backups"));
        assert!(rules.is_reserved(".git"));
        assert!(rules.is_reserved("keep-forever"));
        assert!(!rules.is_reserved("logs"));
        assert!(!rules.is_reserved("keeper"));
    }

    #[test]
    fn test_custom_backup_dir_is_reserved() {
        let config = CompressConfig {
            backup_dir: "archived".to_string(),
            ..Default::default()
        };
        let rules = config.skip_rules().unwrap();
        assert!(rules.is_reserved("archived"));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = Config::load(Some(&temp_dir.path().join("nope.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("dirpack.toml");
        fs::write(&path, "[compress]\nthreshold = 7\n").expect("Failed to write config");

        let config = Config::load(Some(&path)).expect("Load failed");
        assert_eq!(config.compress.threshold, 7);
    }

    #[test]
    fn test_load_explicit_file_fails_validation() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("dirpack.toml");
        fs::write(&path, "[compress]\nbuffer_size = 0\n").expect("Failed to write config");

        assert!(Config::load(Some(&path)).is_err());
    }
}
