//! In-memory storage backend.
//!
//! Blobs are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by storage
//! key.  Nothing is persisted; useful for tests and ephemeral deployments.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use super::backend::{compute_checksum, StorageBackend, StoredBlob};
use crate::keys::KEY_DELIMITER;

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryBackend {
    /// storage key -> (data, checksum).
    blobs: tokio::sync::RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(
        &self,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            if key.is_empty() {
                anyhow::bail!("Invalid storage key: empty");
            }
            let checksum = compute_checksum(&data);
            self.blobs
                .write()
                .await
                .insert(key, (data, checksum.clone()));
            Ok(checksum)
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredBlob>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().await;
            let (data, checksum) = blobs
                .get(&key)
                .ok_or_else(|| anyhow::anyhow!("Blob not found at storage key: {}", key))?;
            Ok(StoredBlob {
                data: data.clone(),
                checksum: checksum.clone(),
            })
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.blobs.write().await.remove(&key);
            Ok(())
        })
    }

    fn exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.blobs.read().await.contains_key(&key)) })
    }

    fn delete_tenant(
        &self,
        slug: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let prefix = format!("{slug}{KEY_DELIMITER}");
        Box::pin(async move {
            self.blobs
                .write()
                .await
                .retain(|key, _| !key.starts_with(&prefix));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        let checksum = backend
            .put("acme-abc", Bytes::from("hello"))
            .await
            .unwrap();
        let blob = backend.get("acme-abc").await.unwrap();
        assert_eq!(blob.data, Bytes::from("hello"));
        assert_eq!(blob.checksum, checksum);

        backend.delete("acme-abc").await.unwrap();
        assert!(!backend.exists("acme-abc").await.unwrap());
        assert!(backend.get("acme-abc").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_tenant_matches_whole_slug() {
        let backend = MemoryBackend::new();
        backend.put("acme-1", Bytes::from("a")).await.unwrap();
        backend.put("acmeco-1", Bytes::from("b")).await.unwrap();
        backend.put("acme", Bytes::from("c")).await.unwrap();

        backend.delete_tenant("acme").await.unwrap();

        assert!(!backend.exists("acme-1").await.unwrap());
        assert!(backend.exists("acmeco-1").await.unwrap());
        assert!(backend.exists("acme").await.unwrap());
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_tenant_keeps_unprefixed_keys_with_slug_prefix() {
        let backend = MemoryBackend::new();
        backend.put("notenant", Bytes::from("legacy")).await.unwrap();
        backend.put("no-abcd1234", Bytes::from("t")).await.unwrap();

        backend.delete_tenant("no").await.unwrap();

        assert!(backend.exists("notenant").await.unwrap());
        assert!(!backend.exists("no-abcd1234").await.unwrap());
    }
}
