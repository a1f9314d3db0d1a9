//! Progress snapshots for long runs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

/// Stage of a run a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressPhase {
    /// Enumerating source files.
    Walking,
    /// Digesting file contents.
    Hashing,
    /// Removing emptied directories.
    Cleanup,
}

/// Progress information published during a merge or scan.
#[derive(Debug, Clone, Serialize)]
pub struct MergeProgress {
    pub phase: ProgressPhase,
    /// Files handled so far in this phase.
    pub files: u64,
    /// Bytes held by those files.
    pub bytes: u64,
    /// Most recent path.
    pub current_path: PathBuf,
    /// Walk warnings seen so far.
    pub warnings: u64,
    pub elapsed: Duration,
}

impl MergeProgress {
    /// Files per second since the phase started.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Accumulates counts for one phase and publishes throttled snapshots.
#[derive(Debug)]
pub struct ProgressTracker {
    phase: ProgressPhase,
    start_time: Instant,
    files: u64,
    bytes: u64,
    warnings: u64,
    every: u64,
    tx: Option<broadcast::Sender<MergeProgress>>,
}

impl ProgressTracker {
    /// Create a tracker that publishes every `every` files (at least 1).
    pub fn new(
        phase: ProgressPhase,
        tx: Option<broadcast::Sender<MergeProgress>>,
        every: u64,
    ) -> Self {
        Self {
            phase,
            start_time: Instant::now(),
            files: 0,
            bytes: 0,
            warnings: 0,
            every: every.max(1),
            tx,
        }
    }

    /// Count one file and publish when the throttle allows.
    pub fn record_file(&mut self, path: &std::path::Path, size: u64) {
        self.files += 1;
        self.bytes += size;
        if self.files % self.every == 0 {
            self.publish(path);
        }
    }

    pub fn record_warning(&mut self) {
        self.warnings += 1;
    }

    pub fn files(&self) -> u64 {
        self.files
    }

    /// Current counts as a snapshot.
    pub fn snapshot(&self, path: &std::path::Path) -> MergeProgress {
        MergeProgress {
            phase: self.phase,
            files: self.files,
            bytes: self.bytes,
            current_path: path.to_path_buf(),
            warnings: self.warnings,
            elapsed: self.start_time.elapsed(),
        }
    }

    /// Send a snapshot regardless of throttling. No receivers is not an error.
    pub fn publish(&self, path: &std::path::Path) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(self.snapshot(path));
        }
    }
}

/// Create a progress channel sized like the rest of the workspace.
pub fn progress_channel() -> broadcast::Sender<MergeProgress> {
    let (tx, _) = broadcast::channel(100);
    tx
}
