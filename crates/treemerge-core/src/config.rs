//! Merge and scan configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::entry::{HashAlgorithm, RelativePath};
use crate::error::MergeError;

/// How the comparator decides that two existing files are the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Equal size and equal bytes.
    #[default]
    Content,
    /// Equal size and equal modification time.
    Shallow,
    /// No comparison; an existing destination always counts as identical.
    AssumeSame,
}

/// Policy for a merge run.
///
/// Every `perform_*` flag defaults to `false`: a default config only prints
/// the shell directives it would execute.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
#[serde(default)]
pub struct MergeConfig {
    /// Copy files into the destination.
    #[builder(default = "false")]
    pub perform_copy: bool,

    /// Delete source files once handled.
    #[builder(default = "false")]
    pub perform_delete: bool,

    /// Create missing destination directories.
    #[builder(default = "false")]
    pub perform_mkdir: bool,

    /// Remove emptied source directories after the walk.
    #[builder(default = "false")]
    pub perform_cleanup: bool,

    /// Comparison used when the destination already exists.
    #[builder(default)]
    pub compare: CompareMode,

    /// Treat AppleDouble `._*` files as ignorable.
    #[builder(default = "false")]
    pub ignore_dot_underscore: bool,

    /// Log and continue past unclassified I/O failures.
    ///
    /// Loosens the no-data-loss guarantee: a failed copy is skipped rather
    /// than aborting the run.
    #[builder(default = "false")]
    pub suppress_unknown_errors: bool,

    /// Write vanished-file events to the audit log.
    #[builder(default = "true")]
    pub log_missing_files: bool,

    /// Files smaller than this are never hashed.
    #[builder(default = "4096")]
    pub hash_threshold: u64,

    /// Digest algorithm for content identity.
    #[builder(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Glob patterns; a file is ignored when any path segment matches.
    #[builder(default)]
    pub ignore_patterns: Vec<String>,

    /// Ceiling on conflict-name regeneration.
    #[builder(default = "16")]
    pub max_rename_attempts: u32,
}

impl MergeConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        check_merge_flags(
            self.perform_copy.unwrap_or(false),
            self.perform_delete.unwrap_or(false),
            self.perform_cleanup.unwrap_or(false),
            self.max_rename_attempts.unwrap_or(16),
        )
    }
}

fn check_merge_flags(
    copy: bool,
    delete: bool,
    cleanup: bool,
    max_rename_attempts: u32,
) -> Result<(), String> {
    if delete && !copy {
        return Err("source deletion requires copying".to_string());
    }
    if cleanup && !delete {
        return Err("source cleanup requires source deletion".to_string());
    }
    if max_rename_attempts == 0 {
        return Err("max_rename_attempts must be at least 1".to_string());
    }
    Ok(())
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            perform_copy: false,
            perform_delete: false,
            perform_mkdir: false,
            perform_cleanup: false,
            compare: CompareMode::Content,
            ignore_dot_underscore: false,
            suppress_unknown_errors: false,
            log_missing_files: true,
            hash_threshold: 4096,
            hash_algorithm: HashAlgorithm::Blake3,
            ignore_patterns: Vec::new(),
            max_rename_attempts: 16,
        }
    }
}

impl MergeConfig {
    /// Create a new merge config builder.
    pub fn builder() -> MergeConfigBuilder {
        MergeConfigBuilder::default()
    }

    /// Config that copies, deletes, creates directories and cleans up.
    pub fn live() -> Self {
        Self {
            perform_copy: true,
            perform_delete: true,
            perform_mkdir: true,
            perform_cleanup: true,
            ..Self::default()
        }
    }

    /// Load a config from a TOML file. Missing keys take default values.
    pub fn from_toml_file(path: &Path) -> Result<Self, MergeError> {
        let text = std::fs::read_to_string(path).map_err(|e| MergeError::InvalidConfig {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, MergeError> {
        let config: Self = toml::from_str(text).map_err(|e| MergeError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check flag combinations.
    pub fn validate(&self) -> Result<(), MergeError> {
        check_merge_flags(
            self.perform_copy,
            self.perform_delete,
            self.perform_cleanup,
            self.max_rename_attempts,
        )
        .map_err(|message| MergeError::InvalidConfig { message })
    }

    /// Compile the ignore patterns.
    pub fn ignore_matcher(&self) -> Result<IgnoreMatcher, MergeError> {
        IgnoreMatcher::new(&self.ignore_patterns)
    }

    /// Whether any step mutates the filesystem.
    pub fn is_dry_run(&self) -> bool {
        !(self.perform_copy || self.perform_delete || self.perform_mkdir || self.perform_cleanup)
    }
}

/// Configuration for read-only duplicate scans.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Roots to scan.
    pub roots: Vec<PathBuf>,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Follow symbolic links.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Glob patterns; a file is skipped when any path segment matches.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Number of hashing threads (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub threads: usize,

    /// Files smaller than this are recorded without hashing.
    #[builder(default = "4096")]
    #[serde(default = "default_hash_threshold")]
    pub hash_threshold: u64,

    /// Digest algorithm.
    #[builder(default)]
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Skip AppleDouble `._*` files.
    #[builder(default = "false")]
    #[serde(default)]
    pub ignore_dot_underscore: bool,

    /// Log and continue past unclassified I/O failures.
    #[builder(default = "false")]
    #[serde(default)]
    pub suppress_unknown_errors: bool,

    /// Write vanished-file events to the audit log.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub log_missing_files: bool,
}

fn default_true() -> bool {
    true
}

fn default_hash_threshold() -> u64 {
    4096
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.roots {
            Some(ref roots) if roots.is_empty() => Err("At least one root is required".to_string()),
            Some(ref roots) if roots.iter().any(|r| r.as_os_str().is_empty()) => {
                Err("Root path cannot be empty".to_string())
            }
            Some(_) => Ok(()),
            None => Err("Root path is required".to_string()),
        }
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning one path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![root.into()],
            include_hidden: true,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            threads: 0,
            hash_threshold: 4096,
            hash_algorithm: HashAlgorithm::Blake3,
            ignore_dot_underscore: false,
            suppress_unknown_errors: false,
            log_missing_files: true,
        }
    }

    /// Compile the ignore patterns.
    pub fn ignore_matcher(&self) -> Result<IgnoreMatcher, MergeError> {
        IgnoreMatcher::new(&self.ignore_patterns)
    }
}

/// Compiled ignore patterns.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    set: GlobSet,
}

impl IgnoreMatcher {
    /// Compile glob patterns.
    pub fn new(patterns: &[String]) -> Result<Self, MergeError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| MergeError::InvalidConfig {
                message: format!("bad ignore pattern {pattern:?}: {e}"),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| MergeError::InvalidConfig {
            message: e.to_string(),
        })?;
        Ok(Self { set })
    }

    /// A matcher that ignores nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    /// Whether the relative path or any of its segments matches.
    pub fn is_ignored(&self, path: &RelativePath) -> bool {
        if self.set.is_empty() {
            return false;
        }
        self.set.is_match(path.as_path()) || path.segments().any(|s| self.set.is_match(s))
    }
}
