//! Run counters.

use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::entry::MergeDecision;

/// A file count and the bytes those files hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub count: u64,
    pub bytes: u64,
}

impl Counter {
    /// Count one file of `size` bytes.
    pub fn add(&mut self, size: u64) {
        self.count += 1;
        self.bytes += size;
    }
}

impl AddAssign for Counter {
    fn add_assign(&mut self, rhs: Self) {
        self.count += rhs.count;
        self.bytes += rhs.bytes;
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} files ({} bytes)", self.count, self.bytes)
    }
}

/// Counters accumulated across one merge run.
///
/// Every processed file lands in exactly one of `copied`, `ignored` or
/// `duplicated`, so `processed == copied + ignored + duplicated` holds once
/// each decision has been recorded. `deleted` is tracked independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub processed: Counter,
    pub copied: Counter,
    pub deleted: Counter,
    pub ignored: Counter,
    pub duplicated: Counter,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a file as seen.
    pub fn record_processed(&mut self, size: u64) {
        self.processed.add(size);
    }

    /// Count the outcome of a decision for a file of `size` bytes.
    ///
    /// A renamed copy counts as duplicated, not copied.
    pub fn record_decision(&mut self, decision: &MergeDecision, size: u64) {
        match decision {
            MergeDecision::Copy => self.copied.add(size),
            MergeDecision::CopyRenamed(_) => self.duplicated.add(size),
            MergeDecision::SkipIdentical | MergeDecision::SkipIgnoredPath => self.ignored.add(size),
        }
    }

    /// Count a source removal.
    pub fn record_deleted(&mut self, size: u64) {
        self.deleted.add(size);
    }

    /// Whether the processed counter equals the sum of outcome counters.
    pub fn is_conserved(&self) -> bool {
        self.processed.count == self.copied.count + self.ignored.count + self.duplicated.count
            && self.processed.bytes
                == self.copied.bytes + self.ignored.bytes + self.duplicated.bytes
    }

    /// Fold another run's counters into this one.
    pub fn merge(&mut self, other: &ProcessStats) {
        self.processed += other.processed;
        self.copied += other.copied;
        self.deleted += other.deleted;
        self.ignored += other.ignored;
        self.duplicated += other.duplicated;
    }

    /// Label/counter pairs in display order.
    pub fn rows(&self) -> [(&'static str, Counter); 5] {
        [
            ("processed", self.processed),
            ("copied", self.copied),
            ("deleted", self.deleted),
            ("ignored", self.ignored),
            ("duplicated", self.duplicated),
        ]
    }
}

impl fmt::Display for ProcessStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, counter) in self.rows() {
            writeln!(f, "{label:>10}: {counter}")?;
        }
        Ok(())
    }
}
