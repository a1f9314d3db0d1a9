//! Filesystem side of treemerge.
//!
//! [`MergeEngine`] walks a source tree and, for each regular file, picks one
//! of four outcomes:
//!
//! - copy it to the same relative path in the destination
//! - copy it under a `{stem}-{tag}{ext}` name when the destination differs
//! - skip it when the destination already holds the same file
//! - skip it when an ignore pattern matches
//!
//! The source is then deleted unless it was ignored or its copy failed, and a
//! cleanup pass removes emptied source directories. Every step that is turned
//! off in [`MergeConfig`](treemerge_core::MergeConfig) is printed as a shell
//! [`Directive`] instead.
//!
//! [`DuplicatePruner`] removes the redundant copies reported by a duplicate
//! scan, keeping the lexicographically smallest path of each group.

mod compare;
mod conflict;
mod engine;
mod prune;
mod script;

pub use compare::Comparator;
pub use conflict::{ConflictResolver, tagged_name};
pub use engine::{MergeEngine, RunContext, copy_preserving_times};
pub use prune::{DuplicatePruner, PruneReport};
pub use script::{Directive, DirectiveSink, quote};
