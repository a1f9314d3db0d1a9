//! Append-only audit sink for absorbed errors and ignored files.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::MergeError;

/// Line-oriented audit log.
///
/// Each line is flushed as soon as it is written. A disabled log only emits
/// the `tracing` event.
#[derive(Debug)]
pub struct AuditLog {
    sink: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MergeError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| MergeError::Audit {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            sink: Some(Mutex::new(BufWriter::new(file))),
            path: Some(path.to_path_buf()),
        })
    }

    /// A log that writes nowhere.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            path: None,
        }
    }

    /// File backing this log, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line.
    ///
    /// Write failures are reported through `tracing` and otherwise dropped;
    /// the audit trail never aborts a run.
    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(target: "treemerge::audit", "{message}");

        let Some(sink) = &self.sink else {
            return;
        };
        let mut writer = match sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let line = message.replace('\n', " ");
        if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
            tracing::error!(error = %e, "failed to write audit line");
        }
    }

    /// Record an absorbed error.
    pub fn record_error(&self, error: &MergeError) {
        self.record(error.to_string());
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if let Some(sink) = &self.sink {
            if let Ok(mut writer) = sink.lock() {
                let _ = writer.flush();
            }
        }
    }
}
