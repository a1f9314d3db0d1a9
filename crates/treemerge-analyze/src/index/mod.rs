//! Content-addressed index of seen files.
//!
//! The index answers one question atomically: "has this session already seen
//! a file with this size and digest?" The first path inserted for a key wins
//! and is returned to every later caller with the same key.

mod memory;
mod sqlite;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use treemerge_core::{ContentDigest, MergeError, SessionTag};

use crate::duplicates::DuplicateGroup;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Column value stored for files below the hashing threshold.
pub const BELOW_THRESHOLD: &str = "-";

/// Digest part of an index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexDigest {
    Content(ContentDigest),
    /// File too small to hash. Never matches anything, including itself.
    BelowThreshold,
}

impl IndexDigest {
    /// Text form used by durable backends.
    pub fn to_column(&self) -> String {
        match self {
            Self::Content(digest) => digest.to_hex(),
            Self::BelowThreshold => BELOW_THRESHOLD.to_string(),
        }
    }

    /// Parse the text form written by [`IndexDigest::to_column`].
    pub fn from_column(text: &str) -> Result<Self, IndexError> {
        if text == BELOW_THRESHOLD {
            return Ok(Self::BelowThreshold);
        }
        ContentDigest::from_hex(text)
            .map(Self::Content)
            .ok_or_else(|| IndexError::Corrupt(format!("bad digest column {text:?}")))
    }

    pub fn content(&self) -> Option<&ContentDigest> {
        match self {
            Self::Content(digest) => Some(digest),
            Self::BelowThreshold => None,
        }
    }
}

/// Key of the check-and-insert primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub session: SessionTag,
    pub size: u64,
    pub digest: IndexDigest,
}

impl IndexKey {
    pub fn new(session: SessionTag, size: u64, digest: IndexDigest) -> Self {
        Self {
            session,
            size,
            digest,
        }
    }
}

/// One file recorded in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub session: SessionTag,
    pub path: PathBuf,
    pub size: u64,
    pub digest: IndexDigest,
    pub recorded_at: DateTime<Utc>,
}

/// An error absorbed during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub session: SessionTag,
    pub path: PathBuf,
    pub message: String,
    pub recoverable: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Per-session totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: SessionTag,
    pub files: u64,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
}

/// Errors from an index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("index lock poisoned")]
    Poisoned,

    #[error("corrupt index record: {0}")]
    Corrupt(String),
}

impl From<IndexError> for MergeError {
    fn from(e: IndexError) -> Self {
        MergeError::Index {
            message: e.to_string(),
        }
    }
}

/// Storage for first-seen content.
pub trait ContentIndex: Send + Sync {
    /// Record `path` under `key`.
    ///
    /// Returns `None` when this call is the first for `key` in its session,
    /// otherwise the path of the first caller. The check and the insert are a
    /// single atomic step. Every call is kept as a record, winners and losers
    /// alike.
    fn check_and_insert(&self, key: &IndexKey, path: &Path) -> Result<Option<PathBuf>, IndexError>;

    /// Every record, optionally restricted to one session, in insertion order.
    fn records(&self, session: Option<&SessionTag>) -> Result<Vec<IndexRecord>, IndexError>;

    /// Sessions present in the index, oldest first.
    fn sessions(&self) -> Result<Vec<SessionSummary>, IndexError>;

    /// Store an error absorbed while scanning.
    fn record_error(
        &self,
        session: &SessionTag,
        path: &Path,
        message: &str,
        recoverable: bool,
    ) -> Result<(), IndexError>;

    /// Errors, optionally restricted to one session.
    fn errors(&self, session: Option<&SessionTag>) -> Result<Vec<ErrorRecord>, IndexError>;

    /// Groups of paths sharing size and digest.
    ///
    /// An empty `sessions` slice means all sessions. Below-threshold records
    /// never group.
    fn duplicate_groups(&self, sessions: &[SessionTag]) -> Result<Vec<DuplicateGroup>, IndexError> {
        let records = self
            .records(None)?
            .into_iter()
            .filter(|r| sessions.is_empty() || sessions.contains(&r.session));
        Ok(group_records(records))
    }
}

/// Group records by `(size, digest)`, keeping groups with two or more
/// distinct paths.
pub fn group_records(records: impl IntoIterator<Item = IndexRecord>) -> Vec<DuplicateGroup> {
    let mut keyed: Vec<(u64, ContentDigest, PathBuf)> = records
        .into_iter()
        .filter_map(|r| match r.digest {
            IndexDigest::Content(digest) => Some((r.size, digest, r.path)),
            IndexDigest::BelowThreshold => None,
        })
        .collect();
    keyed.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for ((size, digest), members) in &keyed.into_iter().chunk_by(|(size, digest, _)| (*size, digest.clone())) {
        let paths: Vec<PathBuf> = members.map(|(_, _, path)| path).collect();
        if let Some(group) = DuplicateGroup::new(digest, size, paths) {
            groups.push(group);
        }
    }

    groups.sort_by(|a, b| {
        b.wasted_bytes
            .cmp(&a.wasted_bytes)
            .then_with(|| a.keeper().as_os_str().cmp(b.keeper().as_os_str()))
    });
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, size: u64, digest: IndexDigest) -> IndexRecord {
        IndexRecord {
            session: SessionTag::new("s1"),
            path: PathBuf::from(path),
            size,
            digest,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_digest_column_roundtrip() {
        let digest = IndexDigest::Content(ContentDigest::new(vec![0xde, 0xad]));
        assert_eq!(IndexDigest::from_column(&digest.to_column()).unwrap(), digest);
        assert_eq!(
            IndexDigest::from_column(BELOW_THRESHOLD).unwrap(),
            IndexDigest::BelowThreshold
        );
        assert!(IndexDigest::from_column("xyz").is_err());
    }

    #[test]
    fn test_group_records() {
        let d1 = IndexDigest::Content(ContentDigest::new(vec![1]));
        let d2 = IndexDigest::Content(ContentDigest::new(vec![2]));
        let groups = group_records(vec![
            record("/b/one", 100, d1.clone()),
            record("/a/one", 100, d1.clone()),
            record("/c/two", 10, d2.clone()),
            record("/d/two", 10, d2.clone()),
            record("/e/two", 10, d2),
            record("/solo", 100, IndexDigest::Content(ContentDigest::new(vec![3]))),
            record("/tiny1", 1, IndexDigest::BelowThreshold),
            record("/tiny2", 1, IndexDigest::BelowThreshold),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].wasted_bytes, 100);
        assert_eq!(groups[0].keeper(), Path::new("/a/one"));
        assert_eq!(groups[1].count(), 3);
        assert_eq!(groups[1].wasted_bytes, 20);
    }
}
