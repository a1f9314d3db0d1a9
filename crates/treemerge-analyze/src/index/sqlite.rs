//! Durable index backed by SQLite.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::debug;

use treemerge_core::SessionTag;

use super::{
    BELOW_THRESHOLD, ContentIndex, ErrorRecord, IndexDigest, IndexError, IndexKey, IndexRecord,
    SessionSummary, group_records,
};
use crate::duplicates::DuplicateGroup;

/// Index persisted in a SQLite database file.
///
/// All statements are parameterized. The connection sits behind a mutex and
/// each check-and-insert runs in its own transaction.
#[derive(Debug)]
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

type RawRecord = (String, String, i64, String, String);

impl SqliteIndex {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!("content index schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|_| IndexError::Poisoned)
    }

    fn query_records(
        &self,
        sql: &str,
        sessions: &[SessionTag],
    ) -> Result<Vec<IndexRecord>, IndexError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(sessions.iter().map(|s| s.as_str())), |row| {
            Ok::<RawRecord, rusqlite::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (session, name, size, timestamp, hash) = row?;
            records.push(IndexRecord {
                session: SessionTag::new(session),
                path: PathBuf::from(name),
                size: size as u64,
                digest: IndexDigest::from_column(&hash)?,
                recorded_at: parse_timestamp(&timestamp)?,
            });
        }
        Ok(records)
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, IndexError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IndexError::Corrupt(format!("bad timestamp {text:?}: {e}")))
}

/// `?1, ?2, ...` for `n` bound values.
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

impl ContentIndex for SqliteIndex {
    fn check_and_insert(&self, key: &IndexKey, path: &Path) -> Result<Option<PathBuf>, IndexError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let session = key.session.as_str();
        let name = path.to_string_lossy();
        let size = key.size as i64;
        let hash = key.digest.to_column();

        tx.execute(
            "INSERT INTO files (session_id, file_name, file_size, timestamp, file_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session, name, size, Utc::now().to_rfc3339(), hash],
        )?;

        let existing = match key.digest {
            IndexDigest::BelowThreshold => None,
            IndexDigest::Content(_) => {
                let inserted = tx.execute(
                    "INSERT INTO first_seen (session_id, file_size, file_hash, file_name) \
                     VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING",
                    params![session, size, hash, name],
                )?;
                if inserted == 1 {
                    None
                } else {
                    tx.query_row(
                        "SELECT file_name FROM first_seen \
                         WHERE session_id = ?1 AND file_size = ?2 AND file_hash = ?3",
                        params![session, size, hash],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?
                }
            }
        };

        tx.commit()?;
        Ok(existing.map(PathBuf::from))
    }

    fn records(&self, session: Option<&SessionTag>) -> Result<Vec<IndexRecord>, IndexError> {
        match session {
            Some(session) => self.query_records(
                "SELECT session_id, file_name, file_size, timestamp, file_hash FROM files \
                 WHERE session_id = ?1 ORDER BY id",
                std::slice::from_ref(session),
            ),
            None => self.query_records(
                "SELECT session_id, file_name, file_size, timestamp, file_hash FROM files \
                 ORDER BY id",
                &[],
            ),
        }
    }

    fn sessions(&self) -> Result<Vec<SessionSummary>, IndexError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, COUNT(*), SUM(file_size), MIN(timestamp) FROM files \
             GROUP BY session_id ORDER BY MIN(timestamp)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (session, files, bytes, started) = row?;
            summaries.push(SessionSummary {
                session: SessionTag::new(session),
                files: files as u64,
                bytes: bytes as u64,
                started_at: parse_timestamp(&started)?,
            });
        }
        Ok(summaries)
    }

    fn record_error(
        &self,
        session: &SessionTag,
        path: &Path,
        message: &str,
        recoverable: bool,
    ) -> Result<(), IndexError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO errors (session_id, file_name, timestamp, message, recoverable) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.as_str(),
                path.to_string_lossy(),
                Utc::now().to_rfc3339(),
                message,
                recoverable
            ],
        )?;
        Ok(())
    }

    fn errors(&self, session: Option<&SessionTag>) -> Result<Vec<ErrorRecord>, IndexError> {
        let conn = self.lock()?;
        let (sql, bound): (&str, Vec<&str>) = match session {
            Some(s) => (
                "SELECT session_id, file_name, timestamp, message, recoverable FROM errors \
                 WHERE session_id = ?1 ORDER BY id",
                vec![s.as_str()],
            ),
            None => (
                "SELECT session_id, file_name, timestamp, message, recoverable FROM errors \
                 ORDER BY id",
                Vec::new(),
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(bound), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut errors = Vec::new();
        for row in rows {
            let (session, name, timestamp, message, recoverable) = row?;
            errors.push(ErrorRecord {
                session: SessionTag::new(session),
                path: PathBuf::from(name),
                message,
                recoverable,
                recorded_at: parse_timestamp(&timestamp)?,
            });
        }
        Ok(errors)
    }

    fn duplicate_groups(&self, sessions: &[SessionTag]) -> Result<Vec<DuplicateGroup>, IndexError> {
        let (inner, outer) = if sessions.is_empty() {
            (String::new(), String::new())
        } else {
            let marks = placeholders(sessions.len());
            (
                format!("AND session_id IN ({marks})"),
                format!("AND f.session_id IN ({marks})"),
            )
        };
        let sql = format!(
            "SELECT f.session_id, f.file_name, f.file_size, f.timestamp, f.file_hash \
             FROM files f \
             JOIN (SELECT file_size, file_hash FROM files \
                   WHERE file_hash != '{BELOW_THRESHOLD}' {inner} \
                   GROUP BY file_size, file_hash \
                   HAVING COUNT(DISTINCT file_name) > 1) d \
             ON f.file_size = d.file_size AND f.file_hash = d.file_hash \
             WHERE 1 = 1 {outer} \
             ORDER BY f.id"
        );
        let records = self.query_records(&sql, sessions)?;
        Ok(group_records(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;
    use treemerge_core::ContentDigest;

    fn key(session: &str, size: u64, byte: u8) -> IndexKey {
        IndexKey::new(
            SessionTag::new(session),
            size,
            IndexDigest::Content(ContentDigest::new(vec![byte; 8])),
        )
    }

    #[test]
    fn test_first_insert_wins() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let k = key("s1", 10, 1);

        assert!(index.check_and_insert(&k, Path::new("/a")).unwrap().is_none());
        assert_eq!(
            index.check_and_insert(&k, Path::new("/b")).unwrap(),
            Some(PathBuf::from("/a"))
        );

        let records = index.records(None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].path, PathBuf::from("/b"));
    }

    #[test]
    fn test_below_threshold_never_matches() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let k = IndexKey::new(SessionTag::new("s1"), 2, IndexDigest::BelowThreshold);
        assert!(index.check_and_insert(&k, Path::new("/a")).unwrap().is_none());
        assert!(index.check_and_insert(&k, Path::new("/b")).unwrap().is_none());
        assert!(index.duplicate_groups(&[]).unwrap().is_empty());
        assert_eq!(
            index.records(None).unwrap()[0].digest,
            IndexDigest::BelowThreshold
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("index.db");
        {
            let index = SqliteIndex::open(&db).unwrap();
            index.check_and_insert(&key("s1", 5, 2), Path::new("/first")).unwrap();
            index
                .record_error(&SessionTag::new("s1"), Path::new("/bad"), "denied", false)
                .unwrap();
        }

        let index = SqliteIndex::open(&db).unwrap();
        assert_eq!(
            index.check_and_insert(&key("s1", 5, 2), Path::new("/second")).unwrap(),
            Some(PathBuf::from("/first"))
        );
        let errors = index.errors(None).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].recoverable);
        assert_eq!(errors[0].message, "denied");
    }

    #[test]
    fn test_sessions_and_groups_filter() {
        let index = SqliteIndex::open_in_memory().unwrap();
        index.check_and_insert(&key("s1", 100, 1), Path::new("/s1/a")).unwrap();
        index.check_and_insert(&key("s1", 100, 1), Path::new("/s1/b")).unwrap();
        index.check_and_insert(&key("s2", 7, 9), Path::new("/s2/a")).unwrap();
        index.check_and_insert(&key("s2", 7, 9), Path::new("/s2/b")).unwrap();
        index.check_and_insert(&key("s2", 7, 9), Path::new("/s2/c")).unwrap();

        let sessions = index.sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session.as_str(), "s1");
        assert_eq!(sessions[0].files, 2);
        assert_eq!(sessions[0].bytes, 200);

        let all = index.duplicate_groups(&[]).unwrap();
        assert_eq!(all.len(), 2);

        let only_s2 = index.duplicate_groups(&[SessionTag::new("s2")]).unwrap();
        assert_eq!(only_s2.len(), 1);
        assert_eq!(only_s2[0].count(), 3);
        assert_eq!(only_s2[0].keeper(), Path::new("/s2/a"));
    }

    #[test]
    fn test_hostile_paths_are_bound_not_spliced() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let path = Path::new("/x\"; DROP TABLE files; --'");
        index.check_and_insert(&key("s1", 1, 1), path).unwrap();
        assert_eq!(index.records(None).unwrap()[0].path, path);
    }

    #[test]
    fn test_concurrent_exclusivity() {
        let temp = TempDir::new().unwrap();
        let index = Arc::new(SqliteIndex::open(temp.path().join("index.db")).unwrap());
        let k = key("s1", 64, 3);

        let handles: Vec<_> = (0..8)
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

        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        let winner = results.iter().position(Option::is_none).unwrap();
        let expected = PathBuf::from(format!("/p{winner}"));
        assert!(results.iter().flatten().all(|p| *p == expected));
    }
}
