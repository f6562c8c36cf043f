//! Content Hasher
//!
//! SHA-256 plus a byte counter, fed incrementally. Every ingestion path
//! writes through [`write_hashed`]; commit re-reads the assembled file
//! with [`hash_file`].

use std::fmt::Display;
use std::path::Path;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{AppError, Result};

/// Length and hex digest of a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    pub size: u64,
    pub sha256: String,
}

/// Incremental SHA-256 with a length counter
#[derive(Default)]
pub struct ContentHasher {
    hasher: Sha256,
    size: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.size += data.len() as u64;
    }

    pub fn finalize(self) -> ContentDigest {
        ContentDigest {
            size: self.size,
            sha256: hex::encode(self.hasher.finalize()),
        }
    }
}

/// Compute the SHA-256 hex digest of a buffer
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare two hex digests ignoring case
pub fn digests_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Whether `value` looks like a SHA-256 hex digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Re-read a persisted file in bounded reads and digest it
pub async fn hash_file(path: &Path, read_size: usize) -> Result<ContentDigest> {
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; read_size.max(1)];
    let mut hasher = ContentHasher::new();

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Append a byte stream to `file`, hashing while writing.
///
/// The file is flushed before returning, including on error, so callers
/// can truncate it back to a known length afterwards.
pub async fn write_hashed<S, E>(file: &mut File, stream: S) -> Result<ContentDigest>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Display,
{
    futures::pin_mut!(stream);
    let mut hasher = ContentHasher::new();

    while let Some(next) = stream.next().await {
        let data = match next {
            Ok(data) => data,
            Err(e) => {
                let _ = file.flush().await;
                return Err(AppError::BadRequest(format!("Upload stream interrupted: {}", e)));
            }
        };

        if let Err(e) = file.write_all(&data).await {
            let _ = file.flush().await;
            return Err(e.into());
        }
        hasher.update(&data);
    }

    file.flush().await?;
    Ok(hasher.finalize())
}
