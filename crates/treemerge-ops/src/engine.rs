//! The merge walk: one decision per source file, then cleanup.

use std::collections::HashSet;
use std::fs::{self, File, FileTimes, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, info};

use treemerge_analyze::{ContentIndex, FileHasher, IndexDigest, IndexKey};
use treemerge_core::{
    AuditLog, ExceptionPolicy, FileEntry, IgnoreMatcher, MergeConfig, MergeDecision, MergeError,
    ProcessStats, SessionTag, WalkWarning,
};
use treemerge_scan::{
    MergeProgress, ProgressPhase, ProgressTracker, SourceWalker, WalkEvent, progress_channel,
};

use crate::compare::Comparator;
use crate::conflict::ConflictResolver;
use crate::script::{Directive, DirectiveSink};

/// State of one merge run, owned by the caller so it survives a failed run.
#[derive(Debug)]
pub struct RunContext {
    pub stats: ProcessStats,
    /// Tag used in conflict names and index records.
    pub session: SessionTag,
    /// Source paths deliberately left in place. Cleanup keeps their ancestors.
    pub retained: Vec<PathBuf>,
    pub warnings: Vec<WalkWarning>,
    /// Files whose handling stopped on an absorbed error.
    pub absorbed: u64,
    pub dirs_removed: u64,
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_session(SessionTag::generate())
    }

    pub fn with_session(session: SessionTag) -> Self {
        Self {
            stats: ProcessStats::new(),
            session,
            retained: Vec::new(),
            warnings: Vec::new(),
            absorbed: 0,
            dirs_removed: 0,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Merges a source tree into a destination tree.
pub struct MergeEngine {
    config: MergeConfig,
    policy: ExceptionPolicy,
    comparator: Comparator,
    resolver: ConflictResolver,
    matcher: IgnoreMatcher,
    hasher: FileHasher,
    audit: AuditLog,
    sink: DirectiveSink,
    index: Option<Arc<dyn ContentIndex>>,
    cancel: Option<Arc<AtomicBool>>,
    progress_tx: broadcast::Sender<MergeProgress>,
    known_dirs: HashSet<PathBuf>,
}

impl MergeEngine {
    /// Create an engine that prints directives to stdout and audits nowhere.
    pub fn new(config: MergeConfig) -> Result<Self, MergeError> {
        config.validate()?;
        Ok(Self {
            policy: ExceptionPolicy::from(&config),
            comparator: Comparator::new(config.compare),
            resolver: ConflictResolver::new(config.max_rename_attempts),
            matcher: config.ignore_matcher()?,
            hasher: FileHasher::new(config.hash_algorithm),
            audit: AuditLog::disabled(),
            sink: DirectiveSink::Stdout,
            index: None,
            cancel: None,
            progress_tx: progress_channel(),
            known_dirs: HashSet::new(),
            config,
        })
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_sink(mut self, sink: DirectiveSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Record every merged file in `index` under the run's session.
    pub fn with_index(mut self, index: Arc<dyn ContentIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Stop between files once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Subscribe to walking and cleanup progress.
    pub fn subscribe(&self) -> broadcast::Receiver<MergeProgress> {
        self.progress_tx.subscribe()
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn sink(&self) -> &DirectiveSink {
        &self.sink
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Merge then clean up the source.
    pub fn run(
        &mut self,
        source: &Path,
        destination: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), MergeError> {
        self.merge(source, destination, ctx)?;
        self.cleanup(source, ctx)
    }

    /// Check both roots before anything is touched.
    ///
    /// Returns the canonical `(source, destination)` pair.
    pub fn validate_roots(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<(PathBuf, PathBuf), MergeError> {
        let source = canonical_dir(source)?;
        let destination = canonical_dir(destination)?;
        if source.starts_with(&destination) || destination.starts_with(&source) {
            return Err(MergeError::OverlappingRoots {
                source_root: source,
                destination_root: destination,
            });
        }
        Ok((source, destination))
    }

    /// Walk `source` and merge every regular file into `destination`.
    ///
    /// `ctx.stats` is updated file by file, so it is accurate even when this
    /// returns an error.
    pub fn merge(
        &mut self,
        source: &Path,
        destination: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), MergeError> {
        let (source, destination) = self.validate_roots(source, destination)?;
        info!(
            source = %source.display(),
            destination = %destination.display(),
            session = %ctx.session,
            "merge started"
        );
        self.known_dirs.insert(destination.clone());

        let walker = SourceWalker::new(&source).with_progress(self.progress_tx.clone());
        for event in walker.events() {
            if self.cancelled() {
                return Err(MergeError::Interrupted);
            }
            match event {
                WalkEvent::File(entry) => self.merge_file(entry, &destination, ctx)?,
                WalkEvent::Special(path) => {
                    self.audit
                        .record(format!("Ignored special file: {}", path.display()));
                    ctx.retained.push(path);
                }
                WalkEvent::Warning(warning) => {
                    self.audit.record(format!("Walk error: {warning}"));
                    ctx.retained.push(warning.path.clone());
                    ctx.warnings.push(warning);
                }
            }
        }

        info!(processed = ctx.stats.processed.count, "merge finished");
        Ok(())
    }

    /// Handle one source file.
    fn merge_file(
        &mut self,
        entry: FileEntry,
        destination: &Path,
        ctx: &mut RunContext,
    ) -> Result<(), MergeError> {
        ctx.stats.record_processed(entry.size);
        let dest = entry.relative_path.rebase(destination);

        if self.matcher.is_ignored(&entry.relative_path) {
            self.audit
                .record(format!("Ignored file: {}", entry.path.display()));
            ctx.stats
                .record_decision(&MergeDecision::SkipIgnoredPath, entry.size);
            ctx.retained.push(entry.path);
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            let ensured = self.ensure_dir(parent);
            if self.policy.absorb(ensured, &self.audit)?.is_none() {
                give_up(entry.path, ctx);
                return Ok(());
            }
        }

        let decided = self.decide(&entry, &dest, ctx);
        let Some(decision) = self.policy.absorb(decided, &self.audit)? else {
            give_up(entry.path, ctx);
            return Ok(());
        };
        debug!(path = %entry.relative_path, decision = decision.label(), "decided");

        self.record_in_index(&entry, ctx)?;

        let target = match &decision {
            MergeDecision::Copy => Some(dest.as_path()),
            MergeDecision::CopyRenamed(renamed) => Some(renamed.as_path()),
            MergeDecision::SkipIdentical | MergeDecision::SkipIgnoredPath => None,
        };
        if let Some(target) = target {
            let copied = self.copy_file(&entry.path, target);
            if self.policy.absorb(copied, &self.audit)?.is_none() {
                give_up(entry.path, ctx);
                return Ok(());
            }
        }
        ctx.stats.record_decision(&decision, entry.size);

        if decision.deletes_source() {
            self.delete_source(&entry.path, entry.size, ctx)?;
        }
        Ok(())
    }

    fn decide(
        &mut self,
        entry: &FileEntry,
        dest: &Path,
        ctx: &RunContext,
    ) -> Result<MergeDecision, MergeError> {
        // Only a regular file can hold the same content; anything else in
        // the way is a conflict.
        let regular = match fs::symlink_metadata(dest) {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MergeDecision::Copy),
            Err(e) => return Err(MergeError::io(dest, e)),
        };

        let same = regular
            && match self.comparator.try_is_same(&entry.path, dest) {
                Ok(same) => same,
                Err(e) => {
                    // An unreadable pair is never "the same".
                    self.policy.report(&e, &self.audit);
                    false
                }
            };
        if same {
            return Ok(MergeDecision::SkipIdentical);
        }

        let renamed = self.resolver.resolve(dest, &ctx.session)?;
        info!(
            source = %entry.path.display(),
            renamed = %renamed.display(),
            "destination differs, copying under new name"
        );
        Ok(MergeDecision::CopyRenamed(renamed))
    }

    fn ensure_dir(&mut self, dir: &Path) -> Result<(), MergeError> {
        if self.known_dirs.contains(dir) {
            return Ok(());
        }
        if !dir.is_dir() {
            if self.config.perform_mkdir {
                fs::create_dir_all(dir).map_err(|source| MergeError::MkdirFailed {
                    path: dir.to_path_buf(),
                    source,
                })?;
                debug!(dir = %dir.display(), "created directory");
            } else {
                self.sink.emit(Directive::MakeDir(dir.to_path_buf()))?;
            }
        }
        self.known_dirs.insert(dir.to_path_buf());
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<(), MergeError> {
        if !self.config.perform_copy {
            return self.sink.emit(Directive::Copy {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
            });
        }
        let bytes = copy_preserving_times(from, to)?;
        debug!(from = %from.display(), to = %to.display(), bytes, "copied");
        Ok(())
    }

    fn delete_source(
        &mut self,
        path: &Path,
        size: u64,
        ctx: &mut RunContext,
    ) -> Result<(), MergeError> {
        if !self.config.perform_delete {
            self.sink.emit(Directive::Remove(path.to_path_buf()))?;
            ctx.stats.record_deleted(size);
            return Ok(());
        }

        match fs::remove_file(path) {
            Ok(()) => ctx.stats.record_deleted(size),
            Err(e) => match MergeError::delete(path, e) {
                vanished @ MergeError::PathVanished { .. } => {
                    self.policy.report(&vanished, &self.audit);
                    ctx.stats.record_deleted(size);
                }
                other => {
                    self.policy.absorb::<()>(Err(other), &self.audit)?;
                    give_up(path.to_path_buf(), ctx);
                }
            },
        }
        Ok(())
    }

    fn record_in_index(&self, entry: &FileEntry, ctx: &RunContext) -> Result<(), MergeError> {
        let Some(index) = &self.index else {
            return Ok(());
        };

        let digest = if entry.size < self.config.hash_threshold {
            Ok(IndexDigest::BelowThreshold)
        } else {
            self.hasher.digest(&entry.path).map(IndexDigest::Content)
        };
        let Some(digest) = self.policy.absorb(digest, &self.audit)? else {
            return Ok(());
        };

        let key = IndexKey::new(ctx.session.clone(), entry.size, digest);
        if let Some(first) = index.check_and_insert(&key, &entry.path)? {
            info!(
                path = %entry.path.display(),
                first = %first.display(),
                "content already merged in this run"
            );
        }
        Ok(())
    }

    /// Remove emptied source directories, deepest first.
    ///
    /// The source root itself is never removed. Directories holding retained
    /// files are kept. Any other directory that is not empty is an error
    /// handled by the exception policy.
    pub fn cleanup(&mut self, source: &Path, ctx: &mut RunContext) -> Result<(), MergeError> {
        let root = canonical_dir(source)?;
        let listing = SourceWalker::new(&root).directories_bottom_up();
        for warning in listing.warnings {
            self.audit.record(format!("Walk error: {warning}"));
            ctx.warnings.push(warning);
        }

        let keep: HashSet<&Path> = ctx
            .retained
            .iter()
            .flat_map(|p| p.ancestors().skip(1))
            .chain(ctx.warnings.iter().flat_map(|w| w.path.ancestors()))
            .filter(|p| p.starts_with(&root) && *p != root.as_path())
            .collect();

        let mut tracker = ProgressTracker::new(
            ProgressPhase::Cleanup,
            Some(self.progress_tx.clone()),
            64,
        );
        for dir in listing.directories {
            if self.cancelled() {
                return Err(MergeError::Interrupted);
            }
            if keep.contains(dir.as_path()) {
                debug!(dir = %dir.display(), "keeping directory with retained entries");
                continue;
            }
            tracker.record_file(&dir, 0);

            if !self.config.perform_cleanup {
                self.sink.emit(Directive::RemoveDir(dir))?;
                continue;
            }
            match fs::remove_dir(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "removed directory");
                    ctx.dirs_removed += 1;
                }
                Err(e) => match MergeError::delete(&dir, e) {
                    MergeError::PathVanished { .. } => {
                        debug!(dir = %dir.display(), "directory already gone");
                    }
                    other => {
                        self.policy.absorb::<()>(Err(other), &self.audit)?;
                    }
                },
            }
        }
        tracker.publish(&root);
        Ok(())
    }
}

/// Count an absorbed failure and keep the source, if it is still there.
fn give_up(source: PathBuf, ctx: &mut RunContext) {
    ctx.absorbed += 1;
    if fs::symlink_metadata(&source).is_ok() {
        ctx.retained.push(source);
    }
}

fn canonical_dir(path: &Path) -> Result<PathBuf, MergeError> {
    let canonical = path.canonicalize().map_err(|e| match MergeError::io(path, e) {
        MergeError::PathVanished { path } => MergeError::NotADirectory { path },
        other => other,
    })?;
    if !canonical.is_dir() {
        return Err(MergeError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

/// Copy into a new file, never over an existing one, keeping timestamps and
/// permissions. A partial destination is removed on failure.
pub fn copy_preserving_times(from: &Path, to: &Path) -> Result<u64, MergeError> {
    let fail = |e: io::Error| MergeError::copy(from, to, e);

    let mut src = File::open(from).map_err(fail)?;
    let metadata = src.metadata().map_err(fail)?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .map_err(fail)?;

    match write_contents(&mut src, &mut dst, &metadata) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            drop(dst);
            let _ = fs::remove_file(to);
            Err(fail(e))
        }
    }
}

fn write_contents(src: &mut File, dst: &mut File, metadata: &Metadata) -> io::Result<u64> {
    let bytes = io::copy(src, dst)?;
    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    dst.set_times(times)?;
    dst.set_permissions(metadata.permissions())?;
    dst.sync_all()?;
    Ok(bytes)
}
