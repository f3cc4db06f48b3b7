//! Content hashing for cache keys.
//!
//! Image names and resolution-cache directories are named by the SHA256
//! digest of the content they were derived from, never by timestamps.

use sha2::{Digest, Sha256};

/// Compute the SHA256 digest of `data` as lowercase hex.
pub fn content_digest(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}
