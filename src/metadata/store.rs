//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so it can be used with both SQLite and in-memory stores.
//!
//! Blob records are partitioned by tenant: every operation names the tenant
//! explicitly, and blob ids are only unique within one partition.

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::tenant::TenantId;

/// Identifier of a blob within its tenant partition.
pub type BlobId = u64;

// ── Record types ───────────────────────────────────────────────────

/// Metadata record for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobRecord {
    /// Tenant partition the record lives in.
    pub tenant: TenantId,
    /// Id, unique within the tenant partition.
    pub id: BlobId,
    /// Tenant-prefixed storage key.
    pub key: String,
    /// Original filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Declared size in bytes.
    pub byte_size: u64,
    /// Base64-encoded MD5 of the bytes.
    pub checksum: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

/// Fields supplied when inserting a blob record. The store assigns the id
/// and creation timestamp.
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub key: String,
    pub filename: String,
    pub content_type: String,
    pub byte_size: u64,
    pub checksum: String,
}

/// Current time as ISO-8601 with millisecond precision.
pub(crate) fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Tenants ─────────────────────────────────────────────────────

    /// Create a tenant partition. Returns `false` if it already existed.
    fn create_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Drop a tenant partition and every blob record in it.
    /// Returns `false` if the tenant did not exist.
    fn drop_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Check whether a tenant partition exists.
    fn tenant_exists(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// List all tenants, sorted by name.
    fn list_tenants(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<TenantId>>> + Send + '_>>;

    // ── Blobs ───────────────────────────────────────────────────────

    /// Insert a blob record into `tenant`'s partition, assigning the next id.
    ///
    /// Fails if the tenant does not exist or the key is already recorded.
    fn insert_blob(
        &self,
        tenant: &TenantId,
        blob: NewBlob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BlobRecord>> + Send + '_>>;

    /// Look up a blob by id within `tenant`'s partition only.
    fn get_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobRecord>>> + Send + '_>>;

    /// Check whether any tenant has recorded this storage key.
    fn blob_key_exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Delete a blob record. Returns `false` if it did not exist.
    fn delete_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}
