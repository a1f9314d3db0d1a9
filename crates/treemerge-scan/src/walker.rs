//! Deterministic jwalk-based source enumeration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use jwalk::{Parallelism, WalkDir};
use tokio::sync::broadcast;

use treemerge_core::{FileEntry, RelativePath, WalkWarning, WarningKind};

use crate::progress::{MergeProgress, ProgressPhase, ProgressTracker};

/// Snapshot interval, in files, while walking.
const PROGRESS_EVERY: u64 = 256;

/// One step of a source walk.
#[derive(Debug)]
pub enum WalkEvent {
    /// A regular file.
    File(FileEntry),
    /// A symlink, socket or other entry that is neither a file nor a directory.
    Special(PathBuf),
    /// A problem reported by the walk-error hook; the walk continues.
    Warning(WalkWarning),
}

/// Walks one source root top-down, directories before their contents.
///
/// Children are sorted by name so two walks of an unchanged tree visit
/// entries in the same order.
#[derive(Debug, Clone)]
pub struct SourceWalker {
    root: PathBuf,
    include_hidden: bool,
    follow_symlinks: bool,
    threads: usize,
    progress_tx: Option<broadcast::Sender<MergeProgress>>,
}

/// Directories of a tree, deepest first.
#[derive(Debug, Default)]
pub struct DirectoryListing {
    pub directories: Vec<PathBuf>,
    pub warnings: Vec<WalkWarning>,
}

impl SourceWalker {
    /// Create a walker over `root` that includes hidden entries.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_hidden: true,
            follow_symlinks: false,
            threads: 0,
            progress_tx: None,
        }
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Directory-reading threads (0 = rayon default pool).
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Publish walking snapshots on `tx`.
    pub fn with_progress(mut self, tx: broadcast::Sender<MergeProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk_dir(&self) -> WalkDir {
        let parallelism = match self.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };

        WalkDir::new(&self.root)
            .parallelism(parallelism)
            .sort(true)
            .skip_hidden(!self.include_hidden)
            .follow_links(self.follow_symlinks)
            .min_depth(1)
    }

    /// Iterate over every non-directory entry below the root.
    pub fn events(&self) -> impl Iterator<Item = WalkEvent> + '_ {
        let mut tracker =
            ProgressTracker::new(ProgressPhase::Walking, self.progress_tx.clone(), PROGRESS_EVERY);

        self.walk_dir().into_iter().filter_map(move |entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    tracker.record_warning();
                    return Some(WalkEvent::Warning(self.jwalk_warning(err)));
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                return None;
            }

            let path = entry.path();
            let Some(relative) = RelativePath::between(&self.root, &path) else {
                tracing::debug!(path = %path.display(), "entry outside walk root");
                return None;
            };

            let metadata = if self.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            let metadata = match metadata {
                Ok(m) => m,
                Err(e) => {
                    tracker.record_warning();
                    let mut warning = WalkWarning::from_io(&path, &e);
                    if warning.kind == WarningKind::ReadError {
                        warning.kind = WarningKind::MetadataError;
                    }
                    return Some(WalkEvent::Warning(warning));
                }
            };

            if !metadata.is_file() {
                tracing::debug!(path = %path.display(), "skipping special entry");
                return Some(WalkEvent::Special(path));
            }

            tracker.record_file(&path, metadata.len());
            Some(WalkEvent::File(FileEntry::from_metadata(
                path, relative, &metadata,
            )))
        })
    }

    /// Every directory below the root, children before parents.
    ///
    /// The root itself is never listed.
    pub fn directories_bottom_up(&self) -> DirectoryListing {
        let mut listing = DirectoryListing::default();

        for entry_result in self.walk_dir() {
            match entry_result {
                Ok(entry) if entry.file_type().is_dir() => {
                    listing.directories.push(entry.path());
                }
                Ok(_) => {}
                Err(err) => listing.warnings.push(self.jwalk_warning(err)),
            }
        }

        // Reversed pre-order puts every directory after all of its descendants.
        listing.directories.reverse();
        listing
    }

    fn jwalk_warning(&self, err: jwalk::Error) -> WalkWarning {
        let path = err
            .path()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        let warning = match err.io_error() {
            Some(io) => WalkWarning::from_io(path, io),
            None => WalkWarning::new(path, err.to_string(), WarningKind::ReadError),
        };
        tracing::warn!(path = %warning.path.display(), "walk error: {}", warning.message);
        warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("dir1/subdir")).unwrap();
        fs::create_dir(root.join("dir2")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world world world").unwrap();
        fs::write(root.join("dir1/subdir/file3.txt"), "test").unwrap();
        fs::write(root.join("dir2/.hidden"), "h").unwrap();

        temp
    }

    fn files(walker: &SourceWalker) -> Vec<String> {
        walker
            .events()
            .filter_map(|event| match event {
                WalkEvent::File(entry) => Some(entry.relative_path.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_walk_is_deterministic() {
        let temp = create_test_tree();
        let walker = SourceWalker::new(temp.path());

        let first = files(&walker);
        let second = files(&walker);
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_parent_dir_before_contents() {
        let temp = create_test_tree();
        let walker = SourceWalker::new(temp.path());
        let seen = files(&walker);

        let pos = |name: &str| seen.iter().position(|s| s.ends_with(name)).unwrap();
        assert!(pos("file2.txt") < pos("file3.txt"));
    }

    #[test]
    fn test_hidden_files_can_be_skipped() {
        let temp = create_test_tree();
        let walker = SourceWalker::new(temp.path()).include_hidden(false);
        assert_eq!(files(&walker).len(), 3);
    }

    #[test]
    fn test_file_entry_sizes() {
        let temp = create_test_tree();
        let walker = SourceWalker::new(temp.path());
        let total: u64 = walker
            .events()
            .filter_map(|event| match event {
                WalkEvent::File(entry) => Some(entry.size),
                _ => None,
            })
            .sum();
        assert_eq!(total, 5 + 17 + 4 + 1);
    }

    #[test]
    fn test_directories_bottom_up() {
        let temp = create_test_tree();
        let listing = SourceWalker::new(temp.path()).directories_bottom_up();

        assert_eq!(listing.directories.len(), 3);
        assert!(!listing.directories.contains(&temp.path().to_path_buf()));
        let pos = |p: PathBuf| listing.directories.iter().position(|d| *d == p).unwrap();
        assert!(pos(temp.path().join("dir1/subdir")) < pos(temp.path().join("dir1")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_special() {
        let temp = create_test_tree();
        std::os::unix::fs::symlink(temp.path().join("file1.txt"), temp.path().join("link"))
            .unwrap();

        let walker = SourceWalker::new(temp.path());
        let specials: Vec<_> = walker
            .events()
            .filter_map(|event| match event {
                WalkEvent::Special(path) => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(specials, vec![temp.path().join("link")]);
    }

    #[test]
    fn test_progress_published() {
        let temp = create_test_tree();
        let tx = crate::progress::progress_channel();
        let mut rx = tx.subscribe();
        let walker = SourceWalker::new(temp.path()).with_progress(tx);
        let _ = files(&walker);
        // Fewer files than the interval: nothing is published.
        assert!(rx.try_recv().is_err());
    }
}
