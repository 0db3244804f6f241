//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  The trait
//! works in terms of opaque keys and byte buffers so callers never see where
//! the bytes physically live; the physical layout is the backend's concern
//! (see [`super::sharding`]).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use md5::{Digest, Md5};
use std::future::Future;
use std::pin::Pin;

/// A stored blob's data plus its checksum.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Raw bytes of the blob.
    pub data: Bytes,
    /// Base64-encoded MD5 of the bytes.
    pub checksum: String,
}

/// Base64-encoded MD5 digest, the checksum format clients declare on
/// direct uploads.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

/// Async blob storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Write `data` under `key`, returning the checksum.
    fn put(
        &self,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;

    /// Read the full blob stored under `key`.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredBlob>> + Send + '_>>;

    /// Delete the blob under `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Check whether a blob exists under `key`.
    fn exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Delete every blob stored for the tenant with this slug.
    fn delete_tenant(
        &self,
        slug: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_of_empty_input() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(compute_checksum(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_checksum_differs_by_content() {
        assert_ne!(compute_checksum(b"version 1"), compute_checksum(b"version 2"));
    }
}
