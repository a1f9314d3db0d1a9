//! Unique names for conflicting destinations.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use treemerge_core::{MergeError, SessionTag};

type TagSource = Box<dyn FnMut() -> SessionTag + Send>;

/// Generates `{stem}-{tag}{ext}` names that do not exist yet.
///
/// The first attempt uses the run's session tag. Each further attempt draws a
/// fresh tag, up to `max_attempts` in total.
pub struct ConflictResolver {
    max_attempts: u32,
    next_tag: TagSource,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl ConflictResolver {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_tag_source(max_attempts, SessionTag::generate)
    }

    /// Use a custom generator for retry tags.
    pub fn with_tag_source(
        max_attempts: u32,
        next_tag: impl FnMut() -> SessionTag + Send + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            next_tag: Box::new(next_tag),
        }
    }

    /// Find a free sibling name for `dest`.
    ///
    /// Fails with [`MergeError::NameResolutionExhausted`] when every attempt
    /// names an existing entry.
    pub fn resolve(&mut self, dest: &Path, session: &SessionTag) -> Result<PathBuf, MergeError> {
        let mut tag = session.clone();
        for attempt in 1..=self.max_attempts {
            let candidate = tagged_name(dest, &tag);
            // symlink_metadata so a dangling link still counts as taken.
            if std::fs::symlink_metadata(&candidate).is_err() {
                return Ok(candidate);
            }
            tracing::debug!(candidate = %candidate.display(), attempt, "conflict name taken");
            tag = (self.next_tag)();
        }
        Err(MergeError::NameResolutionExhausted {
            path: dest.to_path_buf(),
            attempts: self.max_attempts,
        })
    }
}

/// `dir/{stem}-{tag}{.ext}`; the extension is the part after the last dot.
pub fn tagged_name(dest: &Path, tag: &SessionTag) -> PathBuf {
    let mut name = OsString::new();
    name.push(dest.file_stem().unwrap_or_default());
    name.push("-");
    name.push(tag.as_str());
    if let Some(ext) = dest.extension() {
        name.push(".");
        name.push(ext);
    }
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tagged_name_keeps_extension() {
        let tag = SessionTag::new("ab12cd34");
        assert_eq!(
            tagged_name(Path::new("/d/report.final.pdf"), &tag),
            PathBuf::from("/d/report.final-ab12cd34.pdf")
        );
        assert_eq!(
            tagged_name(Path::new("/d/Makefile"), &tag),
            PathBuf::from("/d/Makefile-ab12cd34")
        );
        assert_eq!(
            tagged_name(Path::new("/d/.bashrc"), &tag),
            PathBuf::from("/d/.bashrc-ab12cd34")
        );
    }

    #[test]
    fn test_first_attempt_uses_session_tag() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.txt");
        fs::write(&dest, "x").unwrap();

        let mut resolver = ConflictResolver::new(4);
        let resolved = resolver.resolve(&dest, &SessionTag::new("run1")).unwrap();
        assert_eq!(resolved, temp.path().join("a-run1.txt"));
    }

    #[test]
    fn test_taken_name_regenerates_tag() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.txt");
        fs::write(&dest, "x").unwrap();
        fs::write(temp.path().join("a-run1.txt"), "y").unwrap();

        let mut resolver = ConflictResolver::with_tag_source(4, || SessionTag::new("fresh"));
        let resolved = resolver.resolve(&dest, &SessionTag::new("run1")).unwrap();
        assert_eq!(resolved, temp.path().join("a-fresh.txt"));
    }

    #[test]
    fn test_bounded_retries_exhaust() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.txt");
        fs::write(&dest, "x").unwrap();
        fs::write(temp.path().join("a-same.txt"), "y").unwrap();

        // A generator with no entropy can never escape the collision.
        let mut resolver = ConflictResolver::with_tag_source(3, || SessionTag::new("same"));
        let err = resolver.resolve(&dest, &SessionTag::new("same")).unwrap_err();
        assert!(matches!(
            err,
            MergeError::NameResolutionExhausted { attempts: 3, .. }
        ));
    }
}
