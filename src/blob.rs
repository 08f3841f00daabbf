//! Blob generation with committed content hashes.
//!
//! A blob is the ground truth for echo integrity checks: a random payload
//! written once, hashed at generation time, and never mutated afterwards.

use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Default blob payload size: 10 MiB.
pub const DEFAULT_BLOB_SIZE: usize = 10 * 1024 * 1024;

/// Chunk size for streaming reads and hashing.
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A generated payload with its committed digest.
#[derive(Debug, Clone)]
pub struct Blob {
    path: PathBuf,
    hash: [u8; 32],
    len: usize,
}

impl Blob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Committed digest as lowercase hex.
    pub fn hex_hash(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Write one random payload of `size` bytes under `root` and return it
/// together with its digest.
///
/// The payload is written to an exclusively held temporary file and only
/// persisted once complete, so a partial blob is never observable at the
/// returned path. Names are unique, so concurrent generators under the
/// same root never collide.
pub fn generate(root: &Path, size: usize) -> Result<Blob, BlobError> {
    let mut file = tempfile::Builder::new()
        .prefix("test-")
        .suffix(".blob")
        .tempfile_in(root)?;

    let mut rng = rand::thread_rng();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(CHUNK_SIZE);
        rng.fill_bytes(&mut buf[..n]);
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n;
    }
    file.flush()?;

    let (_file, path) = file.keep().map_err(|e| BlobError::Io(e.error))?;

    Ok(Blob {
        path,
        hash: hasher.finalize().into(),
        len: size,
    })
}

/// Recompute the digest of a file by streaming it in chunks.
pub async fn hash_file(path: &Path) -> Result<[u8; 32], BlobError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
