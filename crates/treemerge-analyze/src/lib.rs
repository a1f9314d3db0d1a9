//! Content identity for treemerge.
//!
//! This crate provides:
//!
//! - **Hashing** - streaming BLAKE3, SHA-256 or XXH64 digests in 64 KiB blocks
//! - **Content index** - atomic first-seen lookup keyed by session, size and
//!   digest, held in memory or in SQLite
//! - **Duplicate scan** - a read-only pass that records every file and groups
//!   the results
//!
//! Files below the hashing threshold are recorded with a sentinel digest and
//! never reported as duplicates.
//!
//! ```rust,no_run
//! use treemerge_analyze::{DuplicateScanner, SqliteIndex};
//! use treemerge_core::{AuditLog, ScanConfig};
//!
//! let index = SqliteIndex::open("treemerge.db").unwrap();
//! let scanner = DuplicateScanner::new(ScanConfig::new("/backups"));
//! let scan = scanner.scan(&index, &AuditLog::disabled()).unwrap();
//!
//! println!("Session {}: {} duplicate groups", scan.session, scan.report.group_count);
//! for group in &scan.report.groups {
//!     println!("keep {}", group.keeper().display());
//! }
//! ```

mod duplicates;
mod hasher;
pub mod index;

pub use duplicates::{DuplicateGroup, DuplicateReport, DuplicateScanner, ScanReport};
pub use hasher::{BLOCK_SIZE, FileHasher};
pub use index::{
    ContentIndex, ErrorRecord, IndexDigest, IndexError, IndexKey, IndexRecord, MemoryIndex,
    SessionSummary, SqliteIndex,
};

// Re-export core types
pub use treemerge_core::{ContentDigest, HashAlgorithm, SessionTag};
