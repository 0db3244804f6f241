//! In-memory metadata store.
//!
//! Stores all metadata in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<...>` for thread-safe access.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{now_iso8601, BlobId, BlobRecord, MetadataStore, NewBlob};
use crate::tenant::TenantId;

#[derive(Debug, Default)]
struct Partition {
    last_id: BlobId,
    blobs: BTreeMap<BlobId, BlobRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    tenants: BTreeMap<TenantId, Partition>,
    keys: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn create_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            if inner.tenants.contains_key(&tenant) {
                return Ok(false);
            }
            // Checked under the same lock as the insert; slugs name
            // directories, which may be case-insensitive.
            if let Some(clash) = inner
                .tenants
                .keys()
                .find(|t| t.slug().eq_ignore_ascii_case(tenant.slug()))
            {
                anyhow::bail!(
                    "Tenant {} would share slug {:?} with tenant {}",
                    tenant,
                    tenant.slug(),
                    clash
                );
            }
            inner.tenants.insert(tenant, Partition::default());
            Ok(true)
        })
    }

    fn drop_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let Some(partition) = inner.tenants.remove(&tenant) else {
                return Ok(false);
            };
            for blob in partition.blobs.values() {
                inner.keys.remove(&blob.key);
            }
            Ok(true)
        })
    }

    fn tenant_exists(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.tenants.contains_key(&tenant))
        })
    }

    fn list_tenants(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<TenantId>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.tenants.keys().cloned().collect())
        })
    }

    fn insert_blob(
        &self,
        tenant: &TenantId,
        blob: NewBlob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BlobRecord>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let mut guard = self.inner.write().expect("rwlock poisoned");
            let inner = &mut *guard;
            if inner.keys.contains(&blob.key) {
                anyhow::bail!("Blob key already recorded: {}", blob.key);
            }
            let partition = inner
                .tenants
                .get_mut(&tenant)
                .ok_or_else(|| anyhow::anyhow!("Tenant does not exist: {}", tenant))?;

            partition.last_id += 1;
            let record = BlobRecord {
                tenant,
                id: partition.last_id,
                key: blob.key,
                filename: blob.filename,
                content_type: blob.content_type,
                byte_size: blob.byte_size,
                checksum: blob.checksum,
                created_at: now_iso8601(),
            };
            partition.blobs.insert(record.id, record.clone());
            inner.keys.insert(record.key.clone());
            Ok(record)
        })
    }

    fn get_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobRecord>>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .tenants
                .get(&tenant)
                .and_then(|p| p.blobs.get(&id))
                .cloned())
        })
    }

    fn blob_key_exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.keys.contains(&key))
        })
    }

    fn delete_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let mut guard = self.inner.write().expect("rwlock poisoned");
            let inner = &mut *guard;
            let removed = inner
                .tenants
                .get_mut(&tenant)
                .and_then(|p| p.blobs.remove(&id));
            match removed {
                Some(record) => {
                    inner.keys.remove(&record.key);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    fn new_blob(key: &str) -> NewBlob {
        NewBlob {
            key: key.to_string(),
            filename: "file.txt".to_string(),
            content_type: "text/plain".to_string(),
            byte_size: 4,
            checksum: "abc".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_per_partition() {
        let store = MemoryMetadataStore::new();
        store.create_tenant(&tenant("acme")).await.unwrap();
        store.create_tenant(&tenant("other")).await.unwrap();

        let a = store
            .insert_blob(&tenant("acme"), new_blob("acme-a"))
            .await
            .unwrap();
        let b = store
            .insert_blob(&tenant("other"), new_blob("other-a"))
            .await
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 1);

        let found = store.get_blob(&tenant("acme"), 1).await.unwrap().unwrap();
        assert_eq!(found.key, "acme-a");
        let found = store.get_blob(&tenant("other"), 1).await.unwrap().unwrap();
        assert_eq!(found.key, "other-a");
    }

    #[tokio::test]
    async fn test_insert_into_unknown_tenant_fails() {
        let store = MemoryMetadataStore::new();
        assert!(store
            .insert_blob(&tenant("nobody"), new_blob("nobody-a"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = MemoryMetadataStore::new();
        store.create_tenant(&tenant("acme")).await.unwrap();
        store
            .insert_blob(&tenant("acme"), new_blob("acme-a"))
            .await
            .unwrap();
        assert!(store
            .insert_blob(&tenant("acme"), new_blob("acme-a"))
            .await
            .is_err());
        assert!(store.blob_key_exists("acme-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_tenant_removes_records() {
        let store = MemoryMetadataStore::new();
        store.create_tenant(&tenant("acme")).await.unwrap();
        store
            .insert_blob(&tenant("acme"), new_blob("acme-a"))
            .await
            .unwrap();

        assert!(store.drop_tenant(&tenant("acme")).await.unwrap());
        assert!(!store.drop_tenant(&tenant("acme")).await.unwrap());
        assert!(!store.tenant_exists(&tenant("acme")).await.unwrap());
        assert!(!store.blob_key_exists("acme-a").await.unwrap());
        assert!(store.get_blob(&tenant("acme"), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_blob() {
        let store = MemoryMetadataStore::new();
        store.create_tenant(&tenant("acme")).await.unwrap();
        let rec = store
            .insert_blob(&tenant("acme"), new_blob("acme-a"))
            .await
            .unwrap();
        assert!(store.delete_blob(&tenant("acme"), rec.id).await.unwrap());
        assert!(!store.delete_blob(&tenant("acme"), rec.id).await.unwrap());
        assert!(!store.blob_key_exists("acme-a").await.unwrap());

        // Ids are not reused after deletion.
        let next = store
            .insert_blob(&tenant("acme"), new_blob("acme-b"))
            .await
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_list_tenants_sorted() {
        let store = MemoryMetadataStore::new();
        store.create_tenant(&tenant("zeta")).await.unwrap();
        store.create_tenant(&tenant("alpha")).await.unwrap();
        assert!(!store.create_tenant(&tenant("alpha")).await.unwrap());
        let names: Vec<String> = store
            .list_tenants()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_slug_is_unique_ignoring_case() {
        let store = MemoryMetadataStore::new();
        assert!(store.create_tenant(&tenant("eu_acme")).await.unwrap());
        assert!(store.create_tenant(&tenant("us_acme")).await.is_err());
        assert!(store.create_tenant(&tenant("Acme")).await.is_err());
        assert_eq!(store.list_tenants().await.unwrap(), vec![tenant("eu_acme")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_with_same_slug_admit_one() {
        let store = std::sync::Arc::new(MemoryMetadataStore::new());
        let mut handles = Vec::new();
        for name in ["eu_acme", "us_acme", "ap_acme", "sa_acme"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.create_tenant(&tenant(name)).await.is_ok()
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(store.list_tenants().await.unwrap().len(), 1);
    }
}
