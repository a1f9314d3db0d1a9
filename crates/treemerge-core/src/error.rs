//! Error types for merge and scan operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while merging or scanning.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Entry existed during enumeration but was gone when processed.
    #[error("Path vanished during walk: {path}")]
    PathVanished { path: PathBuf },

    /// One of two files could not be read for comparison.
    #[error("Cannot compare {left} with {right}: {source}")]
    ComparisonFailed {
        left: PathBuf,
        right: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copying a file failed.
    #[error("Copy {from} -> {to} failed: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing a file or directory failed.
    #[error("Delete of {path} failed: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating a directory failed.
    #[error("Mkdir of {path} failed: {source}")]
    MkdirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a file for hashing failed.
    #[error("Hashing {path} failed: {source}")]
    HashFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cleanup found a directory that still has entries.
    #[error("Directory not empty after merge: {path}")]
    DirectoryNotEmpty { path: PathBuf },

    /// No free conflict name was found within the retry ceiling.
    #[error("No free name for {path} after {attempts} attempts")]
    NameResolutionExhausted { path: PathBuf, attempts: u32 },

    /// A root is missing or not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Source and destination roots are the same tree or nested.
    #[error("Source {source_root} and destination {destination_root} overlap")]
    OverlappingRoots {
        source_root: PathBuf,
        destination_root: PathBuf,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Content index backend failure.
    #[error("Content index error: {message}")]
    Index { message: String },

    /// The audit log could not be written.
    #[error("Audit log {path} unavailable: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation was interrupted.
    #[error("Operation interrupted")]
    Interrupted,

    /// Unclassified I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    /// Create an I/O error with path context.
    ///
    /// `NotFound` becomes [`MergeError::PathVanished`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::PathVanished { path },
            _ => Self::Io { path, source },
        }
    }

    /// Classify a failed copy.
    pub fn copy(from: impl Into<PathBuf>, to: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let from = from.into();
        if source.kind() == std::io::ErrorKind::NotFound && !from.exists() {
            return Self::PathVanished { path: from };
        }
        Self::CopyFailed {
            from,
            to: to.into(),
            source,
        }
    }

    /// Classify a failed delete.
    pub fn delete(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::PathVanished { path },
            std::io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty { path },
            _ => Self::DeleteFailed { path, source },
        }
    }

    /// Classify a failed hash read.
    pub fn hash(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::PathVanished { path },
            _ => Self::HashFailed { path, source },
        }
    }

    /// Errors local to one file that never stop a walk.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PathVanished { .. } | Self::ComparisonFailed { .. })
    }

    /// Errors that abort a run even when unknown errors are suppressed.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            Self::NameResolutionExhausted { .. }
                | Self::NotADirectory { .. }
                | Self::OverlappingRoots { .. }
                | Self::InvalidConfig { .. }
                | Self::Interrupted
        )
    }

    /// Path the error is attached to, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::PathVanished { path }
            | Self::DeleteFailed { path, .. }
            | Self::MkdirFailed { path, .. }
            | Self::HashFailed { path, .. }
            | Self::DirectoryNotEmpty { path }
            | Self::NameResolutionExhausted { path, .. }
            | Self::NotADirectory { path }
            | Self::Audit { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::ComparisonFailed { left, .. } => Some(left),
            Self::CopyFailed { from, .. } => Some(from),
            Self::OverlappingRoots { source_root, .. } => Some(source_root),
            Self::InvalidConfig { .. } | Self::Index { .. } | Self::Interrupted => None,
        }
    }
}

/// Kind of walk warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// Error reading a directory.
    ReadError,
    /// Error reading metadata.
    MetadataError,
    /// Entry disappeared between enumeration and processing.
    Vanished,
}

/// Non-fatal problem reported by the walk-error hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl WalkWarning {
    /// Create a new walk warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Classify an I/O error raised while walking.
    pub fn from_io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        let kind = match error.kind() {
            std::io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            std::io::ErrorKind::NotFound => WarningKind::Vanished,
            _ => WarningKind::ReadError,
        };
        Self {
            message: format!("{error}"),
            path,
            kind,
        }
    }
}

impl std::fmt::Display for WalkWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
