//! Streaming content digests.

use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest as _, Sha256};
use twox_hash::XxHash64;

use treemerge_core::{ContentDigest, HashAlgorithm, MergeError};

/// Read size for hashing and comparison.
pub const BLOCK_SIZE: usize = 64 * 1024;

enum DigestState {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
    XxHash64(XxHash64),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::XxHash64 => Self::XxHash64(XxHash64::with_seed(0)),
        }
    }

    fn update(&mut self, block: &[u8]) {
        match self {
            Self::Blake3(h) => {
                h.update(block);
            }
            Self::Sha256(h) => h.update(block),
            Self::XxHash64(h) => h.write(block),
        }
    }

    fn finish(self) -> ContentDigest {
        match self {
            Self::Blake3(h) => ContentDigest::new(h.finalize().as_bytes().to_vec()),
            Self::Sha256(h) => ContentDigest::new(h.finalize().to_vec()),
            // Big-endian so the digest bytes do not depend on the host.
            Self::XxHash64(h) => ContentDigest::new(h.finish().to_be_bytes().to_vec()),
        }
    }
}

/// Computes whole-file digests in fixed-size blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHasher {
    algorithm: HashAlgorithm,
}

impl FileHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest the file at `path`.
    pub fn digest(&self, path: &Path) -> Result<ContentDigest, MergeError> {
        let file = File::open(path).map_err(|e| MergeError::hash(path, e))?;
        self.digest_reader(file).map_err(|e| MergeError::hash(path, e))
    }

    /// Digest everything `reader` yields.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<ContentDigest> {
        let mut state = DigestState::new(self.algorithm);
        let mut buffer = vec![0u8; BLOCK_SIZE];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => state.update(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(state.finish())
    }

    pub fn digest_bytes(&self, bytes: &[u8]) -> ContentDigest {
        let mut state = DigestState::new(self.algorithm);
        state.update(bytes);
        state.finish()
    }
}
