//! File entry, digest and decision types.

use std::ffi::OsStr;
use std::fmt;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Content digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(pub Vec<u8>);

impl ContentDigest {
    /// Create a new digest from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a digest previously produced by [`ContentDigest::to_hex`].
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()
            .map(Self)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest algorithm used for content identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 (32 bytes).
    #[default]
    Blake3,
    /// SHA-256 (32 bytes).
    Sha256,
    /// XXH64 (8 bytes), non-cryptographic.
    XxHash64,
}

impl HashAlgorithm {
    /// Length in bytes of digests produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Blake3 | Self::Sha256 => 32,
            Self::XxHash64 => 8,
        }
    }
}

/// Path of an entry relative to the root it was enumerated from.
///
/// Only normal components are allowed, so rebasing onto another root can
/// never escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath(PathBuf);

impl RelativePath {
    /// Compute the path of `path` relative to `root`.
    ///
    /// Returns `None` when `path` is not below `root` or when the remainder
    /// contains `..`, `.` or root components.
    pub fn between(root: &Path, path: &Path) -> Option<Self> {
        let rel = path.strip_prefix(root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        rel.components()
            .all(|c| matches!(c, Component::Normal(_)))
            .then(|| Self(rel.to_path_buf()))
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &OsStr> + '_ {
        self.0.components().map(|c| c.as_os_str())
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.components().count()
    }

    /// Final segment.
    pub fn file_name(&self) -> Option<&OsStr> {
        self.0.file_name()
    }

    /// Borrow as a plain path.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Map this relative path onto another root.
    pub fn rebase(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Inode information for detecting a file reached through several paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }

    /// Inode and device of the file `metadata` describes.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self::new(metadata.ino(), metadata.dev()))
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }
}

/// A regular file visited by a walk. Lives for one walk step.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Path relative to the walked root.
    pub relative_path: RelativePath,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
    /// Content digest, computed lazily.
    pub digest: Option<ContentDigest>,
    /// Inode of the file data, when the platform reports one.
    pub inode: Option<InodeInfo>,
}

impl FileEntry {
    /// Create an entry with no timestamp and no digest.
    pub fn new(path: impl Into<PathBuf>, relative_path: RelativePath, size: u64) -> Self {
        Self {
            path: path.into(),
            relative_path,
            size,
            modified: None,
            digest: None,
            inode: None,
        }
    }

    /// Create an entry from file metadata.
    pub fn from_metadata(
        path: impl Into<PathBuf>,
        relative_path: RelativePath,
        metadata: &Metadata,
    ) -> Self {
        Self {
            path: path.into(),
            relative_path,
            size: metadata.len(),
            modified: metadata.modified().ok(),
            digest: None,
            inode: InodeInfo::from_metadata(metadata),
        }
    }

    /// Attach a computed digest.
    pub fn with_digest(mut self, digest: ContentDigest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Whether this is an AppleDouble `._*` companion file.
    pub fn is_dot_underscore(&self) -> bool {
        is_dot_underscore(&self.path)
    }
}

/// Whether the final component of `path` starts with `._`.
pub fn is_dot_underscore(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("._"))
}

/// Outcome of evaluating one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeDecision {
    /// Destination is free; copy as-is.
    Copy,
    /// Destination holds different content; copy under the given name.
    CopyRenamed(PathBuf),
    /// Destination already holds the same content.
    SkipIdentical,
    /// Source matches an ignore pattern and is left in place.
    SkipIgnoredPath,
}

impl MergeDecision {
    /// Whether a copy step runs for this decision.
    pub fn copies(&self) -> bool {
        matches!(self, Self::Copy | Self::CopyRenamed(_))
    }

    /// Whether the source deletion step follows this decision.
    pub fn deletes_source(&self) -> bool {
        !matches!(self, Self::SkipIgnoredPath)
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::CopyRenamed(_) => "copy-renamed",
            Self::SkipIdentical => "skip-identical",
            Self::SkipIgnoredPath => "skip-ignored",
        }
    }
}

/// Short identifier distinguishing one merge run; used in conflict names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTag(CompactString);

impl SessionTag {
    /// Create a tag from any string.
    pub fn new(tag: impl Into<CompactString>) -> Self {
        Self(tag.into())
    }

    /// Fresh random tag: the first eight hex digits of a v4 UUID.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(CompactString::from(&id[..8]))
    }

    /// Borrow the tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
