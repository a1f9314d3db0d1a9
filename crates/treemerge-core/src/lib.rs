//! Core types for treemerge.
//!
//! This crate holds the data model shared by the walker, the content index
//! and the merge engine: file entries and decisions, run statistics,
//! configuration, the error taxonomy and the exception policy that decides
//! which errors a run survives.

mod audit;
mod config;
mod entry;
mod error;
mod policy;
mod stats;

pub use audit::AuditLog;
pub use config::{
    CompareMode, IgnoreMatcher, MergeConfig, MergeConfigBuilder, ScanConfig, ScanConfigBuilder,
};
pub use entry::{
    ContentDigest, FileEntry, HashAlgorithm, InodeInfo, MergeDecision, RelativePath,
    SessionTag, is_dot_underscore,
};
pub use error::{MergeError, WalkWarning, WarningKind};
pub use policy::ExceptionPolicy;
pub use stats::{Counter, ProcessStats};
