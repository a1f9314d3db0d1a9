//! File equality checks.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use treemerge_analyze::BLOCK_SIZE;
use treemerge_core::{CompareMode, MergeError};

/// Decides whether an existing destination already holds the source file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator {
    mode: CompareMode,
}

impl Comparator {
    pub fn new(mode: CompareMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CompareMode {
        self.mode
    }

    /// Compare `left` with `right`, reporting read failures.
    pub fn try_is_same(&self, left: &Path, right: &Path) -> Result<bool, MergeError> {
        let failed = |source: io::Error| MergeError::ComparisonFailed {
            left: left.to_path_buf(),
            right: right.to_path_buf(),
            source,
        };

        match self.mode {
            CompareMode::AssumeSame => Ok(true),
            CompareMode::Shallow => {
                let a = fs::metadata(left).map_err(failed)?;
                let b = fs::metadata(right).map_err(failed)?;
                if a.len() != b.len() {
                    return Ok(false);
                }
                match (a.modified(), b.modified()) {
                    (Ok(ma), Ok(mb)) => Ok(ma == mb),
                    _ => Ok(false),
                }
            }
            CompareMode::Content => {
                let a = fs::metadata(left).map_err(failed)?;
                let b = fs::metadata(right).map_err(failed)?;
                if a.len() != b.len() {
                    return Ok(false);
                }
                let fa = File::open(left).map_err(failed)?;
                let fb = File::open(right).map_err(failed)?;
                same_bytes(fa, fb).map_err(failed)
            }
        }
    }

    /// Compare, treating any read failure as "different".
    pub fn is_same(&self, left: &Path, right: &Path) -> bool {
        self.try_is_same(left, right).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "comparison failed, treating as different");
            false
        })
    }
}

fn same_bytes(mut a: impl Read, mut b: impl Read) -> io::Result<bool> {
    let mut buf_a = vec![0u8; BLOCK_SIZE];
    let mut buf_b = vec![0u8; BLOCK_SIZE];
    loop {
        let n = read_block(&mut a, &mut buf_a)?;
        let m = read_block(&mut b, &mut buf_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` unless the reader ends first; returns the bytes read.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn pair(temp: &TempDir, a: &[u8], b: &[u8]) -> (std::path::PathBuf, std::path::PathBuf) {
        let pa = temp.path().join("a");
        let pb = temp.path().join("b");
        fs::write(&pa, a).unwrap();
        fs::write(&pb, b).unwrap();
        (pa, pb)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_content_mode() {
        let temp = TempDir::new().unwrap();
        let cmp = Comparator::new(CompareMode::Content);

        let (a, b) = pair(&temp, b"same bytes", b"same bytes");
        assert!(cmp.is_same(&a, &b));

        let (a, b) = pair(&temp, b"same size!", b"diff size?");
        assert!(!cmp.is_same(&a, &b));

        let (a, b) = pair(&temp, b"short", b"longer content");
        assert!(!cmp.is_same(&a, &b));
    }

    #[test]
    fn test_content_mode_across_blocks() {
        let temp = TempDir::new().unwrap();
        let mut data = vec![1u8; BLOCK_SIZE * 2 + 3];
        let (a, b) = pair(&temp, &data, &data);
        let cmp = Comparator::new(CompareMode::Content);
        assert!(cmp.is_same(&a, &b));

        *data.last_mut().unwrap() = 2;
        fs::write(&b, &data).unwrap();
        assert!(!cmp.is_same(&a, &b));
    }

    #[test]
    fn test_shallow_mode_uses_metadata_only() {
        let temp = TempDir::new().unwrap();
        let (a, b) = pair(&temp, b"aaaa", b"bbbb");
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        set_mtime(&a, when);
        set_mtime(&b, when);

        let cmp = Comparator::new(CompareMode::Shallow);
        assert!(cmp.is_same(&a, &b));

        set_mtime(&b, when + Duration::from_secs(60));
        assert!(!cmp.is_same(&a, &b));
    }

    #[test]
    fn test_assume_same() {
        let temp = TempDir::new().unwrap();
        let (a, b) = pair(&temp, b"x", b"completely different");
        assert!(Comparator::new(CompareMode::AssumeSame).is_same(&a, &b));
    }

    #[test]
    fn test_missing_counterpart_fails_soft() {
        let temp = TempDir::new().unwrap();
        let (a, _) = pair(&temp, b"x", b"x");
        let missing = temp.path().join("missing");
        let cmp = Comparator::default();

        assert!(!cmp.is_same(&a, &missing));
        assert!(matches!(
            cmp.try_is_same(&a, &missing),
            Err(MergeError::ComparisonFailed { .. })
        ));
    }
}
