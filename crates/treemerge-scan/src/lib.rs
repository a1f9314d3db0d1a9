//! Source tree enumeration for treemerge.
//!
//! `treemerge-scan` walks a source root with jwalk in a stable, top-down
//! order and turns every entry into a [`WalkEvent`]. Walk errors never stop
//! the iteration; they surface as [`WalkWarning`]s for the caller to log.
//!
//! # Example
//!
//! ```rust,no_run
//! use treemerge_scan::{SourceWalker, WalkEvent};
//!
//! let walker = SourceWalker::new("/backups/old");
//! for event in walker.events() {
//!     match event {
//!         WalkEvent::File(entry) => println!("{} ({} bytes)", entry.relative_path, entry.size),
//!         WalkEvent::Special(path) => println!("skipping {}", path.display()),
//!         WalkEvent::Warning(warning) => eprintln!("warning: {warning}"),
//!     }
//! }
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! use treemerge_scan::{SourceWalker, progress_channel};
//!
//! let tx = progress_channel();
//! let mut rx = tx.subscribe();
//! let walker = SourceWalker::new("/backups/old").with_progress(tx);
//!
//! std::thread::spawn(move || {
//!     while let Ok(progress) = rx.blocking_recv() {
//!         println!("Walked {} files", progress.files);
//!     }
//! });
//! let _files = walker.events().count();
//! ```

mod inode;
mod progress;
mod walker;

pub use inode::InodeTracker;
pub use progress::{MergeProgress, ProgressPhase, ProgressTracker, progress_channel};
pub use walker::{DirectoryListing, SourceWalker, WalkEvent};

// Re-export core types for convenience
pub use treemerge_core::{FileEntry, InodeInfo, RelativePath, WalkWarning, WarningKind};
