//! Local filesystem storage backend.
//!
//! Blobs are stored as files under a configurable root directory, at the
//! path an injected [`PathSharder`] derives from the key.  With the
//! [`TenantSharder`](super::sharding::TenantSharder) every tenant owns one
//! top-level directory, so dropping a tenant is a single recursive delete.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use super::backend::{compute_checksum, StorageBackend, StoredBlob};
use super::sharding::PathSharder;
use crate::keys::KEY_DELIMITER;

/// Stores blobs on the local filesystem.
pub struct LocalBackend {
    /// Root directory for all stored blobs.
    root: PathBuf,
    /// Key to relative path mapping.
    sharder: Arc<dyn PathSharder>,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>, sharder: Arc<dyn PathSharder>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root, sharder })
    }

    /// Absolute file path for `key`.
    ///
    /// Keys are single path components; anything that could climb out of
    /// the root or collide with the `.tmp` directory is rejected.
    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains("..")
            || key.contains(['/', '\\', '\0'])
        {
            anyhow::bail!("Invalid storage key: {:?}", key);
        }
        let relative = self.sharder.path_for(key);
        for component in std::path::Path::new(&relative).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                anyhow::bail!("Path traversal detected in storage key: {}", key);
            }
        }
        Ok(self.root.join(relative))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{}", id))
    }
}

impl StorageBackend for LocalBackend {
    fn put(
        &self,
        key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let final_path = self.path_for(&key)?;

            // Ensure the shard directories exist.
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let checksum = compute_checksum(&data);

            // Crash-only: temp-fsync-rename pattern.
            let tmp_path = self.temp_path();
            if let Some(parent) = tmp_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?; // fsync

            // Atomic rename to final path.
            std::fs::rename(&tmp_path, &final_path)?;

            tracing::debug!(
                key = %key,
                path = %final_path.display(),
                size_bytes = data.len(),
                "Local storage write"
            );

            Ok(checksum)
        })
    }

    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<StoredBlob>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.path_for(&key)?;

            if !path.exists() {
                anyhow::bail!("Blob not found at storage key: {}", key);
            }

            let data = Bytes::from(std::fs::read(&path)?);
            let checksum = compute_checksum(&data);

            Ok(StoredBlob { data, checksum })
        })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.path_for(&key)?;

            // Idempotent: if the file doesn't exist, that's fine.
            if path.exists() {
                std::fs::remove_file(&path)?;
            }

            Ok(())
        })
    }

    fn exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let path = self.path_for(&key)?;
            Ok(path.is_file())
        })
    }

    fn delete_tenant(
        &self,
        slug: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let slug = slug.to_string();
        Box::pin(async move {
            if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric()) {
                anyhow::bail!("Invalid tenant slug: {:?}", slug);
            }
            let dir = self.root.join(&slug);
            let prefix = format!("{slug}{KEY_DELIMITER}");
            let removed = if dir.is_dir() {
                remove_prefixed_files(&dir, &prefix)?
            } else {
                0
            };
            tracing::info!(
                slug = %slug,
                path = %dir.display(),
                removed,
                "Removed tenant storage tree"
            );
            Ok(())
        })
    }
}

/// Remove files under `dir` whose names start with `prefix`, then prune the
/// directories left empty, `dir` included. Returns the number of files
/// removed.
///
/// Un-prefixed keys can shard into a directory named like a short slug
/// (`"notenant"` lands in `no/te/`), so the tree is never removed wholesale.
fn remove_prefixed_files(dir: &Path, prefix: &str) -> anyhow::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            removed += remove_prefixed_files(&path, prefix)?;
        } else if file_type.is_file() && entry.file_name().to_string_lossy().starts_with(prefix) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if std::fs::read_dir(dir)?.next().is_none() {
        std::fs::remove_dir(dir)?;
    }
    Ok(removed)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sharding::{PrefixSharder, TenantSharder};

    fn test_backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let sharder: Arc<dyn PathSharder> = Arc::new(TenantSharder::<PrefixSharder>::default());
        let backend = LocalBackend::new(dir.path(), sharder).expect("failed to create backend");
        (dir, backend)
    }

    fn random_bytes(len: usize) -> Bytes {
        Bytes::from((0..len).map(|_| rand::random::<u8>()).collect::<Vec<u8>>())
    }

    #[tokio::test]
    async fn test_stores_tenant_keys_in_prefixed_subdirectory() {
        let (dir, backend) = test_backend();
        backend
            .put("tenant-abcdefg123", random_bytes(98721))
            .await
            .unwrap();
        assert!(dir.path().join("tenant/ab/cd/tenant-abcdefg123").is_file());
    }

    #[tokio::test]
    async fn test_does_not_tenant_prefix_keys_without_delimiter() {
        let (dir, backend) = test_backend();
        backend.put("notenant", random_bytes(98721)).await.unwrap();
        assert!(dir.path().join("no/te/notenant").is_file());
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (_dir, backend) = test_backend();
        let data = Bytes::from("hello world");
        let checksum = backend.put("acme-hello", data.clone()).await.unwrap();

        let blob = backend.get("acme-hello").await.unwrap();
        assert_eq!(blob.data, data);
        assert_eq!(blob.checksum, checksum);
    }

    #[tokio::test]
    async fn test_put_empty_blob() {
        let (_dir, backend) = test_backend();
        let checksum = backend.put("acme-empty", Bytes::new()).await.unwrap();
        assert_eq!(checksum, "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(backend.get("acme-empty").await.unwrap().data.len(), 0);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, backend) = test_backend();
        let c1 = backend
            .put("acme-key", Bytes::from("version 1"))
            .await
            .unwrap();
        let c2 = backend
            .put("acme-key", Bytes::from("version 2"))
            .await
            .unwrap();
        assert_ne!(c1, c2);
        assert_eq!(
            backend.get("acme-key").await.unwrap().data,
            Bytes::from("version 2")
        );
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let (_dir, backend) = test_backend();
        assert!(!backend.exists("acme-key").await.unwrap());
        backend.put("acme-key", Bytes::from("data")).await.unwrap();
        assert!(backend.exists("acme-key").await.unwrap());
        backend.delete("acme-key").await.unwrap();
        assert!(!backend.exists("acme-key").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let (_dir, backend) = test_backend();
        backend.delete("acme-missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_nonexistent_returns_error() {
        let (_dir, backend) = test_backend();
        assert!(backend.get("acme-missing").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (_dir, backend) = test_backend();
        for key in ["../etc-passwd", "acme-a/b", "", ".tmp", "acme-..", "a\\b"] {
            assert!(backend.path_for(key).is_err(), "{key:?} should be rejected");
            assert!(backend.put(key, Bytes::from("x")).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_delete_tenant_removes_only_that_tree() {
        let (dir, backend) = test_backend();
        backend.put("acme-aaaa1111", Bytes::from("1")).await.unwrap();
        backend.put("acme-bbbb2222", Bytes::from("2")).await.unwrap();
        backend.put("other-aaaa1111", Bytes::from("3")).await.unwrap();
        backend.put("acmelegacy", Bytes::from("4")).await.unwrap();

        backend.delete_tenant("acme").await.unwrap();

        assert!(!dir.path().join("acme").exists());
        assert!(!backend.exists("acme-aaaa1111").await.unwrap());
        assert!(!backend.exists("acme-bbbb2222").await.unwrap());
        assert!(backend.exists("other-aaaa1111").await.unwrap());
        assert!(backend.exists("acmelegacy").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_tenant_keeps_unprefixed_keys_sharing_its_directory() {
        let (dir, backend) = test_backend();
        backend.put("notenant", Bytes::from("legacy")).await.unwrap();
        backend.put("no-abcd1234", Bytes::from("tenant")).await.unwrap();
        assert!(dir.path().join("no/te/notenant").is_file());
        assert!(dir.path().join("no/ab/cd/no-abcd1234").is_file());

        backend.delete_tenant("no").await.unwrap();

        assert!(!backend.exists("no-abcd1234").await.unwrap());
        assert!(!dir.path().join("no/ab").exists());
        assert_eq!(
            backend.get("notenant").await.unwrap().data,
            Bytes::from("legacy")
        );
    }

    #[tokio::test]
    async fn test_delete_tenant_without_tree_is_ok() {
        let (_dir, backend) = test_backend();
        backend.delete_tenant("nobody").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_tenant_rejects_bad_slug() {
        let (_dir, backend) = test_backend();
        assert!(backend.delete_tenant("..").await.is_err());
        assert!(backend.delete_tenant("").await.is_err());
        assert!(backend.delete_tenant(".tmp").await.is_err());
    }

    #[tokio::test]
    async fn test_plain_prefix_sharder_layout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), Arc::new(PrefixSharder::default())).unwrap();
        backend
            .put("prj1-abcdefg", Bytes::from("x"))
            .await
            .unwrap();
        assert!(dir.path().join("pr/j1/prj1-abcdefg").is_file());
    }
}
