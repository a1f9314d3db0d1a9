//! Inode tracking so one file reached through several paths is seen once.

use dashmap::DashSet;
use treemerge_core::{FileEntry, InodeInfo};

/// Remembers which `(inode, device)` pairs a walk has already produced.
///
/// A walk that follows symlinks can reach the same file through a linked
/// directory, and hardlinks give one file several names. Only the first path
/// to each inode should count as a member of a duplicate group.
#[derive(Debug, Default)]
pub struct InodeTracker {
    seen: DashSet<InodeInfo>,
}

impl InodeTracker {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Track an inode. Returns `true` the first time it is seen.
    pub fn track(&self, info: InodeInfo) -> bool {
        self.seen.insert(info)
    }

    /// Track the inode behind `entry`. Entries without inode information
    /// always count as new.
    pub fn first_visit(&self, entry: &FileEntry) -> bool {
        entry.inode.is_none_or(|info| self.track(info))
    }

    /// Check if an inode has been seen (without tracking).
    pub fn has_seen(&self, info: &InodeInfo) -> bool {
        self.seen.contains(info)
    }

    /// Number of distinct inodes tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use treemerge_core::RelativePath;

    fn entry(name: &str, inode: Option<InodeInfo>) -> FileEntry {
        let path = Path::new("/r").join(name);
        let rel = RelativePath::between(Path::new("/r"), &path).unwrap();
        let mut entry = FileEntry::new(path, rel, 4);
        entry.inode = inode;
        entry
    }

    #[test]
    fn test_track_new_inode() {
        let tracker = InodeTracker::new();
        let info = InodeInfo::new(12345, 1);

        assert!(tracker.track(info));
        assert!(!tracker.track(info));
        assert!(tracker.has_seen(&info));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_different_devices() {
        let tracker = InodeTracker::new();

        assert!(tracker.track(InodeInfo::new(12345, 1)));
        assert!(tracker.track(InodeInfo::new(12345, 2)));
    }

    #[test]
    fn test_first_visit_by_entry() {
        let tracker = InodeTracker::new();
        let info = InodeInfo::new(7, 3);

        assert!(tracker.first_visit(&entry("real/a", Some(info))));
        assert!(!tracker.first_visit(&entry("alias/a", Some(info))));
        assert!(tracker.first_visit(&entry("b", None)));
        assert!(tracker.first_visit(&entry("b", None)));
        assert_eq!(tracker.len(), 1);
    }
}
