//! Uniform handling of failures at filesystem boundaries.

use crate::audit::AuditLog;
use crate::config::{MergeConfig, ScanConfig};
use crate::entry::is_dot_underscore;
use crate::error::MergeError;

/// Decides whether a failed operation is skipped or aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionPolicy {
    pub suppress_unknown_errors: bool,
    pub log_missing_files: bool,
    pub ignore_dot_underscore: bool,
}

impl Default for ExceptionPolicy {
    fn default() -> Self {
        Self {
            suppress_unknown_errors: false,
            log_missing_files: true,
            ignore_dot_underscore: false,
        }
    }
}

impl From<&MergeConfig> for ExceptionPolicy {
    fn from(config: &MergeConfig) -> Self {
        Self {
            suppress_unknown_errors: config.suppress_unknown_errors,
            log_missing_files: config.log_missing_files,
            ignore_dot_underscore: config.ignore_dot_underscore,
        }
    }
}

impl From<&ScanConfig> for ExceptionPolicy {
    fn from(config: &ScanConfig) -> Self {
        Self {
            suppress_unknown_errors: config.suppress_unknown_errors,
            log_missing_files: config.log_missing_files,
            ignore_dot_underscore: config.ignore_dot_underscore,
        }
    }
}

impl ExceptionPolicy {
    /// Whether `error` would be swallowed rather than returned.
    pub fn tolerates(&self, error: &MergeError) -> bool {
        if error.is_always_fatal() {
            return false;
        }
        error.is_recoverable() || self.suppress_unknown_errors
    }

    /// Pass a successful value through as `Some`, or absorb the error.
    ///
    /// Absorbed errors are written to `audit` and yield `Ok(None)`; the caller
    /// skips the file. Anything not tolerated comes back as `Err`.
    pub fn absorb<T>(
        &self,
        result: Result<T, MergeError>,
        audit: &AuditLog,
    ) -> Result<Option<T>, MergeError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) if self.tolerates(&error) => {
                self.report(&error, audit);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Write an absorbed error to the audit log.
    pub fn report(&self, error: &MergeError, audit: &AuditLog) {
        match error {
            MergeError::PathVanished { path } => {
                if self.ignore_dot_underscore && is_dot_underscore(path) {
                    tracing::debug!(path = %path.display(), "marker file vanished");
                    audit.record(format!("Ignored marker file: {}", path.display()));
                } else if self.log_missing_files {
                    audit.record(format!("Missing file: {}", path.display()));
                } else {
                    tracing::debug!(path = %path.display(), "path vanished");
                }
            }
            other => audit.record_error(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn copy_failure() -> MergeError {
        MergeError::CopyFailed {
            from: PathBuf::from("/a"),
            to: PathBuf::from("/b"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
    }

    #[test]
    fn test_ok_passes_through() {
        let policy = ExceptionPolicy::default();
        let out = policy.absorb(Ok::<_, MergeError>(7), &AuditLog::disabled());
        assert_eq!(out.unwrap(), Some(7));
    }

    #[test]
    fn test_vanished_is_absorbed_and_audited() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("audit.log");
        let audit = AuditLog::open(&log_path).unwrap();

        let policy = ExceptionPolicy::default();
        let out = policy.absorb::<()>(
            Err(MergeError::PathVanished {
                path: PathBuf::from("/src/gone.txt"),
            }),
            &audit,
        );
        assert!(out.unwrap().is_none());
        drop(audit);

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(text.trim(), "Missing file: /src/gone.txt");
    }

    #[test]
    fn test_unknown_errors_fail_fast_by_default() {
        let policy = ExceptionPolicy::default();
        let out = policy.absorb::<()>(Err(copy_failure()), &AuditLog::disabled());
        assert!(matches!(out, Err(MergeError::CopyFailed { .. })));
    }

    #[test]
    fn test_suppression_swallows_unknown_but_not_fatal() {
        let policy = ExceptionPolicy {
            suppress_unknown_errors: true,
            ..ExceptionPolicy::default()
        };
        let audit = AuditLog::disabled();

        let out = policy.absorb::<()>(Err(copy_failure()), &audit);
        assert!(out.unwrap().is_none());

        let out = policy.absorb::<()>(
            Err(MergeError::NameResolutionExhausted {
                path: PathBuf::from("/x"),
                attempts: 16,
            }),
            &audit,
        );
        assert!(out.is_err());
    }

    #[test]
    fn test_marker_files_reported_as_ignored() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("audit.log");
        let audit = AuditLog::open(&log_path).unwrap();
        let policy = ExceptionPolicy {
            ignore_dot_underscore: true,
            ..ExceptionPolicy::default()
        };

        policy.report(
            &MergeError::PathVanished {
                path: PathBuf::from("/src/._photo.jpg"),
            },
            &audit,
        );
        drop(audit);

        let text = std::fs::read_to_string(&log_path).unwrap();
        assert!(text.starts_with("Ignored marker file"));
    }
}
