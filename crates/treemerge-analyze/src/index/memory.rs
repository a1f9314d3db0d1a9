//! In-memory index for single-run scans and merges.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use treemerge_core::SessionTag;

use super::{
    ContentIndex, ErrorRecord, IndexDigest, IndexError, IndexKey, IndexRecord, SessionSummary,
};

/// Index held in process memory; lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    first_seen: DashMap<IndexKey, PathBuf>,
    records: Mutex<Vec<IndexRecord>>,
    errors: Mutex<Vec<ErrorRecord>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys with a winner.
    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }

    fn push_record(&self, key: &IndexKey, path: &Path) -> Result<(), IndexError> {
        let mut records = self.records.lock().map_err(|_| IndexError::Poisoned)?;
        records.push(IndexRecord {
            session: key.session.clone(),
            path: path.to_path_buf(),
            size: key.size,
            digest: key.digest.clone(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

impl ContentIndex for MemoryIndex {
    fn check_and_insert(&self, key: &IndexKey, path: &Path) -> Result<Option<PathBuf>, IndexError> {
        if key.digest == IndexDigest::BelowThreshold {
            self.push_record(key, path)?;
            return Ok(None);
        }

        // The shard lock is held until the entry guard drops.
        let existing = match self.first_seen.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(path.to_path_buf());
                None
            }
        };
        self.push_record(key, path)?;
        Ok(existing)
    }

    fn records(&self, session: Option<&SessionTag>) -> Result<Vec<IndexRecord>, IndexError> {
        let records = self.records.lock().map_err(|_| IndexError::Poisoned)?;
        Ok(records
            .iter()
            .filter(|r| session.is_none_or(|s| &r.session == s))
            .cloned()
            .collect())
    }

    fn sessions(&self) -> Result<Vec<SessionSummary>, IndexError> {
        let records = self.records.lock().map_err(|_| IndexError::Poisoned)?;
        let mut summaries: Vec<SessionSummary> = Vec::new();
        for record in records.iter() {
            match summaries.iter_mut().find(|s| s.session == record.session) {
                Some(summary) => {
                    summary.files += 1;
                    summary.bytes += record.size;
                    summary.started_at = summary.started_at.min(record.recorded_at);
                }
                None => summaries.push(SessionSummary {
                    session: record.session.clone(),
                    files: 1,
                    bytes: record.size,
                    started_at: record.recorded_at,
                }),
            }
        }
        summaries.sort_by_key(|s| s.started_at);
        Ok(summaries)
    }

    fn record_error(
        &self,
        session: &SessionTag,
        path: &Path,
        message: &str,
        recoverable: bool,
    ) -> Result<(), IndexError> {
        let mut errors = self.errors.lock().map_err(|_| IndexError::Poisoned)?;
        errors.push(ErrorRecord {
            session: session.clone(),
            path: path.to_path_buf(),
            message: message.to_string(),
            recoverable,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    fn errors(&self, session: Option<&SessionTag>) -> Result<Vec<ErrorRecord>, IndexError> {
        let errors = self.errors.lock().map_err(|_| IndexError::Poisoned)?;
        Ok(errors
            .iter()
            .filter(|e| session.is_none_or(|s| &e.session == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use treemerge_core::ContentDigest;

    fn key(session: &str, size: u64, byte: u8) -> IndexKey {
        IndexKey::new(
            SessionTag::new(session),
            size,
            IndexDigest::Content(ContentDigest::new(vec![byte; 4])),
        )
    }

    #[test]
    fn test_first_insert_wins() {
        let index = MemoryIndex::new();
        let k = key("s1", 10, 7);

        assert_eq!(index.check_and_insert(&k, Path::new("/a")).unwrap(), None);
        assert_eq!(
            index.check_and_insert(&k, Path::new("/b")).unwrap(),
            Some(PathBuf::from("/a"))
        );
        assert_eq!(
            index.check_and_insert(&k, Path::new("/c")).unwrap(),
            Some(PathBuf::from("/a"))
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.records(None).unwrap().len(), 3);
    }

    #[test]
    fn test_key_is_session_scoped() {
        let index = MemoryIndex::new();
        assert!(index.check_and_insert(&key("s1", 10, 7), Path::new("/a")).unwrap().is_none());
        assert!(index.check_and_insert(&key("s2", 10, 7), Path::new("/a")).unwrap().is_none());
        assert!(index.check_and_insert(&key("s1", 11, 7), Path::new("/b")).unwrap().is_none());

        let s1 = SessionTag::new("s1");
        assert_eq!(index.records(Some(&s1)).unwrap().len(), 2);
        assert_eq!(index.sessions().unwrap().len(), 2);
    }

    #[test]
    fn test_below_threshold_is_always_novel() {
        let index = MemoryIndex::new();
        let k = IndexKey::new(SessionTag::new("s1"), 3, IndexDigest::BelowThreshold);
        assert!(index.check_and_insert(&k, Path::new("/a")).unwrap().is_none());
        assert!(index.check_and_insert(&k, Path::new("/b")).unwrap().is_none());
        assert!(index.duplicate_groups(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_exclusivity() {
        let index = Arc::new(MemoryIndex::new());
        let k = key("s1", 42, 1);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let index = Arc::clone(&index);
                let k = k.clone();
                thread::spawn(move || {
                    index
                        .check_and_insert(&k, Path::new(&format!("/p{i}")))
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_none()).count();
        assert_eq!(winners, 1);

        let winner = results.iter().position(Option::is_none).unwrap();
        let first = PathBuf::from(format!("/p{winner}"));
        assert!(results.iter().flatten().all(|p| *p == first));
        assert_eq!(index.records(None).unwrap().len(), 16);
    }

    #[test]
    fn test_errors_are_recorded() {
        let index = MemoryIndex::new();
        let session = SessionTag::new("s1");
        index
            .record_error(&session, Path::new("/x"), "gone", true)
            .unwrap();
        let errors = index.errors(Some(&session)).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].recoverable);
        assert!(index.errors(Some(&SessionTag::new("other"))).unwrap().is_empty());
    }
}
