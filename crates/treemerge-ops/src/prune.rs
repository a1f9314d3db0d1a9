//! Removal of redundant copies found by a duplicate scan.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use treemerge_analyze::DuplicateGroup;
use treemerge_core::{AuditLog, CompareMode, Counter, ExceptionPolicy, InodeInfo, MergeError};

use crate::compare::Comparator;
use crate::script::{Directive, DirectiveSink};

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Redundant copies removed, or that would have been removed.
    pub removed: Counter,
    /// Paths left alone because they or their keeper changed since the scan.
    pub changed: Vec<PathBuf>,
    /// Paths that were already gone.
    pub vanished: u64,
    /// Paths whose removal failed and was absorbed.
    pub failed: u64,
    /// Paths left alone because they name the keeper's own data.
    pub aliases: Vec<PathBuf>,
}

impl PruneReport {
    pub fn summary(&self) -> String {
        let mut out = format!("{} redundant file(s), {} byte(s)", self.removed.count, self.removed.bytes);
        if !self.changed.is_empty() {
            out.push_str(&format!(", {} changed since scan", self.changed.len()));
        }
        if self.vanished > 0 {
            out.push_str(&format!(", {} already gone", self.vanished));
        }
        if self.failed > 0 {
            out.push_str(&format!(", {} failed", self.failed));
        }
        if !self.aliases.is_empty() {
            out.push_str(&format!(", {} alias(es) of a keeper", self.aliases.len()));
        }
        out
    }
}

/// Deletes every non-keeper path of a duplicate group.
///
/// Each candidate is compared byte for byte with its keeper right before
/// removal, so a file edited after the scan survives. A candidate that
/// resolves to the keeper's own inode is never removed.
#[derive(Debug)]
pub struct DuplicatePruner {
    perform_delete: bool,
    comparator: Comparator,
    policy: ExceptionPolicy,
    audit: AuditLog,
    sink: DirectiveSink,
}

impl DuplicatePruner {
    pub fn new(perform_delete: bool) -> Self {
        Self {
            perform_delete,
            comparator: Comparator::new(CompareMode::Content),
            policy: ExceptionPolicy::default(),
            audit: AuditLog::disabled(),
            sink: DirectiveSink::Stdout,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_sink(mut self, sink: DirectiveSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(&self) -> &DirectiveSink {
        &self.sink
    }

    pub fn prune(&mut self, groups: &[DuplicateGroup]) -> Result<PruneReport, MergeError> {
        let mut report = PruneReport::default();
        for group in groups {
            self.prune_group(group, &mut report)?;
        }
        info!(removed = report.removed.count, bytes = report.removed.bytes, "prune finished");
        Ok(report)
    }

    fn prune_group(
        &mut self,
        group: &DuplicateGroup,
        report: &mut PruneReport,
    ) -> Result<(), MergeError> {
        let keeper = group.keeper();
        if fs::symlink_metadata(keeper).is_err() {
            self.audit
                .record(format!("Keeper missing, group left alone: {}", keeper.display()));
            report.changed.extend(group.redundant().iter().cloned());
            return Ok(());
        }
        let keeper_inode = inode_of(keeper);

        for path in group.redundant() {
            if keeper_inode.is_some() && inode_of(path) == keeper_inode {
                self.audit.record(format!(
                    "Same file as keeper, left alone: {} ({})",
                    path.display(),
                    keeper.display()
                ));
                report.aliases.push(path.clone());
                continue;
            }
            match self.comparator.try_is_same(keeper, path) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(path = %path.display(), "content changed since scan");
                    report.changed.push(path.clone());
                    continue;
                }
                Err(MergeError::ComparisonFailed { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    self.policy
                        .report(&MergeError::PathVanished { path: path.clone() }, &self.audit);
                    report.vanished += 1;
                    continue;
                }
                Err(e) => {
                    self.policy.absorb::<()>(Err(e), &self.audit)?;
                    report.failed += 1;
                    continue;
                }
            }
            self.remove(path, keeper, group.size, report)?;
        }
        Ok(())
    }

    fn remove(
        &mut self,
        path: &Path,
        keeper: &Path,
        size: u64,
        report: &mut PruneReport,
    ) -> Result<(), MergeError> {
        if !self.perform_delete {
            self.sink.emit(Directive::RemoveDuplicate {
                path: path.to_path_buf(),
                keeper: keeper.to_path_buf(),
            })?;
            report.removed.add(size);
            return Ok(());
        }

        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), keeper = %keeper.display(), "removed duplicate");
                report.removed.add(size);
            }
            Err(e) => match MergeError::delete(path, e) {
                vanished @ MergeError::PathVanished { .. } => {
                    self.policy.report(&vanished, &self.audit);
                    report.vanished += 1;
                }
                other => {
                    self.policy.absorb::<()>(Err(other), &self.audit)?;
                    report.failed += 1;
                }
            },
        }
        Ok(())
    }
}

/// Inode behind `path`, following symlinks.
fn inode_of(path: &Path) -> Option<InodeInfo> {
    fs::metadata(path).ok().as_ref().and_then(InodeInfo::from_metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use treemerge_core::ContentDigest;

    fn group(paths: Vec<PathBuf>, size: u64) -> DuplicateGroup {
        DuplicateGroup::new(ContentDigest::new(vec![1, 2, 3]), size, paths).unwrap()
    }

    #[test]
    fn test_dry_run_emits_directives() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, "dup").unwrap();
        fs::write(&b, "dup").unwrap();

        let mut pruner = DuplicatePruner::new(false).with_sink(DirectiveSink::collect());
        let report = pruner.prune(&[group(vec![b.clone(), a.clone()], 3)]).unwrap();

        assert_eq!(report.removed.count, 1);
        assert!(b.exists());
        assert_eq!(
            pruner.sink().directives(),
            &[Directive::RemoveDuplicate { path: b, keeper: a }]
        );
    }

    #[test]
    fn test_delete_keeps_keeper() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let c = temp.path().join("c");
        for p in [&a, &b, &c] {
            fs::write(p, "dup").unwrap();
        }

        let mut pruner = DuplicatePruner::new(true);
        let report = pruner.prune(&[group(vec![a.clone(), b.clone(), c.clone()], 3)]).unwrap();

        assert_eq!(report.removed.count, 2);
        assert_eq!(report.removed.bytes, 6);
        assert!(a.exists());
        assert!(!b.exists());
        assert!(!c.exists());
    }

    #[test]
    fn test_changed_file_survives() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, "dup").unwrap();
        fs::write(&b, "new").unwrap();

        let mut pruner = DuplicatePruner::new(true);
        let report = pruner.prune(&[group(vec![a, b.clone()], 3)]).unwrap();

        assert_eq!(report.removed.count, 0);
        assert_eq!(report.changed, vec![b.clone()]);
        assert!(b.exists());
    }

    #[test]
    fn test_vanished_and_missing_keeper() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, "dup").unwrap();

        let mut pruner = DuplicatePruner::new(true);
        let report = pruner.prune(&[group(vec![a.clone(), b.clone()], 3)]).unwrap();
        assert_eq!(report.vanished, 1);

        fs::remove_file(&a).unwrap();
        fs::write(&b, "dup").unwrap();
        let report = pruner.prune(&[group(vec![a, b.clone()], 3)]).unwrap();
        assert_eq!(report.changed, vec![b.clone()]);
        assert!(b.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_alias_of_keeper_survives() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::write(real.join("photo.jpg"), vec![7u8; 10_000]).unwrap();
        std::os::unix::fs::symlink(&real, temp.path().join("alias")).unwrap();

        let keeper = temp.path().join("alias/photo.jpg");
        let other = real.join("photo.jpg");
        let mut pruner = DuplicatePruner::new(true);
        let report = pruner.prune(&[group(vec![other.clone(), keeper.clone()], 10_000)]).unwrap();

        assert_eq!(report.removed.count, 0);
        assert_eq!(report.aliases, vec![other.clone()]);
        assert!(other.exists());
        assert_eq!(fs::read(&keeper).unwrap().len(), 10_000);
    }

    #[cfg(unix)]
    #[test]
    fn test_hardlink_of_keeper_survives() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, "dup").unwrap();
        fs::hard_link(&a, &b).unwrap();

        let mut pruner = DuplicatePruner::new(true);
        let report = pruner.prune(&[group(vec![a.clone(), b.clone()], 3)]).unwrap();

        assert_eq!(report.removed.count, 0);
        assert_eq!(report.aliases, vec![b.clone()]);
        assert!(a.exists());
        assert!(b.exists());
    }
}
