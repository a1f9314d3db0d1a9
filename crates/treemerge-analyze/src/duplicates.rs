//! Read-only duplicate scan over one or more roots.
//!
//! Enumeration runs serially through the source walker; hashing and the
//! check-and-insert into the content index run in parallel. The index keeps
//! every record, so grouping by `(size, digest)` afterwards yields the
//! duplicate groups with a stable keeper per group.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use treemerge_core::{
    AuditLog, ContentDigest, ExceptionPolicy, FileEntry, MergeError, ScanConfig, SessionTag,
    WalkWarning,
};
use treemerge_scan::{
    InodeTracker, MergeProgress, ProgressPhase, SourceWalker, WalkEvent, progress_channel,
};

use crate::hasher::FileHasher;
use crate::index::{ContentIndex, IndexDigest, IndexKey};

/// Hashing snapshot interval, in files.
const PROGRESS_EVERY: u64 = 256;

/// A group of files sharing size and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Content digest shared by all files in this group.
    pub digest: ContentDigest,

    /// Size of each file in bytes.
    pub size: u64,

    /// Distinct paths, lexicographically ascending. The first is the keeper.
    pub paths: Vec<PathBuf>,

    /// Wasted space: size * (count - 1).
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    /// Build a group from unsorted paths. Returns `None` when fewer than two
    /// distinct paths remain.
    pub fn new(digest: ContentDigest, size: u64, mut paths: Vec<PathBuf>) -> Option<Self> {
        paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
        paths.dedup();
        if paths.len() < 2 {
            return None;
        }
        let wasted_bytes = size * (paths.len() as u64 - 1);
        Some(Self {
            digest,
            size,
            paths,
            wasted_bytes,
        })
    }

    /// Get the number of duplicate files.
    pub fn count(&self) -> usize {
        self.paths.len()
    }

    /// Path kept when the group is pruned: the lexicographically smallest.
    pub fn keeper(&self) -> &Path {
        &self.paths[0]
    }

    /// Every path except the keeper.
    pub fn redundant(&self) -> &[PathBuf] {
        &self.paths[1..]
    }

    /// Check if keeping one file, how many could be deleted.
    pub fn deletable_count(&self) -> usize {
        self.paths.len().saturating_sub(1)
    }
}

/// Duplicate groups with totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// Groups of duplicate files, sorted by wasted space descending.
    pub groups: Vec<DuplicateGroup>,

    /// Total size of all duplicate files.
    pub total_duplicate_size: u64,

    /// Total wasted space (could be reclaimed).
    pub total_wasted_space: u64,

    /// Number of files that have duplicates.
    pub files_with_duplicates: u64,

    /// Number of unique duplicate groups.
    pub group_count: usize,
}

impl DuplicateReport {
    pub fn new(groups: Vec<DuplicateGroup>) -> Self {
        let total_duplicate_size = groups.iter().map(|g| g.size * g.paths.len() as u64).sum();
        let total_wasted_space = groups.iter().map(|g| g.wasted_bytes).sum();
        let files_with_duplicates = groups.iter().map(|g| g.paths.len() as u64).sum();
        let group_count = groups.len();
        Self {
            groups,
            total_duplicate_size,
            total_wasted_space,
            files_with_duplicates,
            group_count,
        }
    }

    /// Check if any duplicates were found.
    pub fn has_duplicates(&self) -> bool {
        !self.groups.is_empty()
    }
}

/// Outcome of one scan session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub session: SessionTag,
    pub files_scanned: u64,
    pub bytes_scanned: u64,
    /// Files left out by ignore patterns or marker-file policy.
    pub files_skipped: u64,
    /// Files whose key already had a first-seen path.
    pub duplicates_seen: u64,
    /// Errors absorbed by the exception policy.
    pub errors_absorbed: u64,
    pub warnings: Vec<WalkWarning>,
    pub elapsed: Duration,
    pub report: DuplicateReport,
}

enum FileOutcome {
    Novel,
    Duplicate,
    Skipped,
}

/// Records every file under the configured roots in a content index.
pub struct DuplicateScanner {
    config: ScanConfig,
    progress_tx: broadcast::Sender<MergeProgress>,
    cancel: Option<Arc<AtomicBool>>,
}

impl DuplicateScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            progress_tx: progress_channel(),
            cancel: None,
        }
    }

    /// Subscribe to walking and hashing progress.
    pub fn subscribe(&self) -> broadcast::Receiver<MergeProgress> {
        self.progress_tx.subscribe()
    }

    /// Stop between files once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Scan every root under a fresh session.
    pub fn scan(&self, index: &dyn ContentIndex, audit: &AuditLog) -> Result<ScanReport, MergeError> {
        self.scan_session(SessionTag::generate(), index, audit)
    }

    /// Scan every root, recording under `session`.
    pub fn scan_session(
        &self,
        session: SessionTag,
        index: &dyn ContentIndex,
        audit: &AuditLog,
    ) -> Result<ScanReport, MergeError> {
        let start = Instant::now();
        let policy = ExceptionPolicy::from(&self.config);
        let matcher = self.config.ignore_matcher()?;
        info!(session = %session, roots = self.config.roots.len(), "duplicate scan started");

        let mut files: Vec<FileEntry> = Vec::new();
        let mut warnings = Vec::new();
        let mut files_skipped = 0u64;
        let inodes = InodeTracker::new();

        for root in &self.config.roots {
            let root = root.canonicalize().map_err(|e| match MergeError::io(root, e) {
                MergeError::PathVanished { path } => MergeError::NotADirectory { path },
                other => other,
            })?;
            if !root.is_dir() {
                return Err(MergeError::NotADirectory { path: root });
            }

            let walker = SourceWalker::new(&root)
                .include_hidden(self.config.include_hidden)
                .follow_symlinks(self.config.follow_symlinks)
                .threads(self.config.threads)
                .with_progress(self.progress_tx.clone());

            for event in walker.events() {
                if self.cancelled() {
                    return Err(MergeError::Interrupted);
                }
                match event {
                    WalkEvent::File(entry) => {
                        let marker = self.config.ignore_dot_underscore && entry.is_dot_underscore();
                        if marker || matcher.is_ignored(&entry.relative_path) {
                            debug!(path = %entry.path.display(), "skipping ignored file");
                            files_skipped += 1;
                        } else if !inodes.first_visit(&entry) {
                            debug!(path = %entry.path.display(), "skipping second path to a seen file");
                            files_skipped += 1;
                        } else {
                            files.push(entry);
                        }
                    }
                    WalkEvent::Special(_) => files_skipped += 1,
                    WalkEvent::Warning(warning) => {
                        index.record_error(&session, &warning.path, &warning.message, true)?;
                        warnings.push(warning);
                    }
                }
            }
        }

        let hasher = FileHasher::new(self.config.hash_algorithm);
        let done = AtomicU64::new(0);
        let bytes_done = AtomicU64::new(0);

        let hash_one = |entry: &FileEntry| -> Result<FileOutcome, MergeError> {
            if self.cancelled() {
                return Err(MergeError::Interrupted);
            }

            let digest = if entry.size < self.config.hash_threshold {
                Ok(IndexDigest::BelowThreshold)
            } else {
                hasher.digest(&entry.path).map(IndexDigest::Content)
            };
            let digest = match digest {
                Ok(digest) => digest,
                Err(error) if policy.tolerates(&error) => {
                    policy.report(&error, audit);
                    index.record_error(
                        &session,
                        &entry.path,
                        &error.to_string(),
                        error.is_recoverable(),
                    )?;
                    return Ok(FileOutcome::Skipped);
                }
                Err(error) => return Err(error),
            };

            let key = IndexKey::new(session.clone(), entry.size, digest);
            let existing = index.check_and_insert(&key, &entry.path)?;

            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            let bytes = bytes_done.fetch_add(entry.size, Ordering::Relaxed) + entry.size;
            if n % PROGRESS_EVERY == 0 {
                let _ = self.progress_tx.send(MergeProgress {
                    phase: ProgressPhase::Hashing,
                    files: n,
                    bytes,
                    current_path: entry.path.clone(),
                    warnings: warnings.len() as u64,
                    elapsed: start.elapsed(),
                });
            }

            Ok(match existing {
                Some(first) => {
                    debug!(path = %entry.path.display(), first = %first.display(), "duplicate content");
                    FileOutcome::Duplicate
                }
                None => FileOutcome::Novel,
            })
        };

        let outcomes: Vec<FileOutcome> = if self.config.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.threads)
                .build()
                .map_err(|e| MergeError::InvalidConfig {
                    message: format!("cannot build hashing pool: {e}"),
                })?;
            pool.install(|| files.par_iter().map(&hash_one).collect::<Result<_, _>>())?
        } else {
            files.par_iter().map(&hash_one).collect::<Result<_, _>>()?
        };

        let mut report = ScanReport {
            session: session.clone(),
            files_scanned: 0,
            bytes_scanned: 0,
            files_skipped,
            duplicates_seen: 0,
            errors_absorbed: 0,
            warnings,
            elapsed: Duration::ZERO,
            report: DuplicateReport::default(),
        };
        for (entry, outcome) in files.iter().zip(&outcomes) {
            match outcome {
                FileOutcome::Novel => {
                    report.files_scanned += 1;
                    report.bytes_scanned += entry.size;
                }
                FileOutcome::Duplicate => {
                    report.files_scanned += 1;
                    report.bytes_scanned += entry.size;
                    report.duplicates_seen += 1;
                }
                FileOutcome::Skipped => report.errors_absorbed += 1,
            }
        }

        report.report = DuplicateReport::new(index.duplicate_groups(std::slice::from_ref(&session))?);
        report.elapsed = start.elapsed();
        info!(
            session = %session,
            files = report.files_scanned,
            groups = report.report.group_count,
            "duplicate scan finished"
        );
        Ok(report)
    }
}
