//! Blob lifecycle: creation, signed ids, tenant-aware lookup and signed
//! disk URLs.
//!
//! Every operation takes the [`TenantContext`] it runs under.  Lookups by
//! signed id never use the caller's context directly: the tenant recovered
//! from the token is switched into first, and the lookup runs in the nested
//! context only.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::KelderError;
use crate::keys::{KeyGenerator, TenantKey};
use crate::metadata::store::{BlobId, BlobRecord, MetadataStore, NewBlob};
use crate::metrics;
use crate::reference::SignedReference;
use crate::signing::{Purpose, SignerExt};
use crate::storage::backend::{compute_checksum, StorageBackend};
use crate::tenant::{TenantContext, TenantDirectory};

/// Attempts at drawing a key that is not already taken.
const MAX_KEY_ATTEMPTS: usize = 3;

/// Default content type when none is declared.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Characters escaped in filename path segments and `filename*` values.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a filename for use as a URL path segment.
pub(crate) fn encode_filename(filename: &str) -> String {
    utf8_percent_encode(filename, FILENAME_ENCODE_SET).to_string()
}

/// How a downloaded blob should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Inline,
    Attachment,
}

impl Disposition {
    /// `Content-Disposition` header value for `filename`.
    pub fn header_value(&self, filename: &str) -> String {
        let kind = match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        };
        let ascii: String = filename
            .chars()
            .map(|c| {
                if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let encoded = encode_filename(filename);
        format!("{kind}; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
    }
}

/// Client-declared attributes of a blob about to be uploaded directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectUploadRequest {
    pub filename: String,
    pub byte_size: u64,
    pub checksum: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Bytes of a blob plus how to serve them.
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Bytes,
    pub content_type: String,
    pub content_disposition: String,
}

/// Signed payload of a disk download URL.
#[derive(Debug, Serialize, Deserialize)]
struct DiskKeyPayload {
    key: String,
    filename: String,
    content_type: String,
    disposition: Disposition,
}

/// Signed payload of a direct upload URL.
#[derive(Debug, Serialize, Deserialize)]
struct DirectUploadPayload {
    key: String,
    content_type: String,
    content_length: u64,
    checksum: String,
}

/// Tenant-aware blob operations over injected key, storage and signing
/// strategies.
#[derive(Clone)]
pub struct BlobService {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn StorageBackend>,
    keys: Arc<dyn KeyGenerator>,
    references: SignedReference,
    tenants: TenantDirectory,
    service_urls_expire_in: Duration,
}

impl BlobService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageBackend>,
        keys: Arc<dyn KeyGenerator>,
        references: SignedReference,
        tenants: TenantDirectory,
        service_urls_expire_in: Duration,
    ) -> Self {
        Self {
            metadata,
            storage,
            keys,
            references,
            tenants,
            service_urls_expire_in,
        }
    }

    // ── Creation ────────────────────────────────────────────────────

    /// Draw a fresh key for the context's tenant.
    ///
    /// The generator's output must parse as a tenant key carrying the
    /// active slug; taken keys are retried a bounded number of times.
    async fn generate_unique_key(&self, ctx: &TenantContext) -> Result<String, KelderError> {
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let key = self.keys.generate_key(ctx.tenant());
            let parsed = TenantKey::parse(&key)?;
            if parsed.slug != ctx.slug() {
                return Err(KelderError::MalformedKey { key });
            }
            if !self.metadata.blob_key_exists(&key).await? && !self.storage.exists(&key).await? {
                return Ok(key);
            }
            warn!(tenant = %ctx.tenant(), attempt, "Generated key already taken, retrying");
        }
        Err(KelderError::InternalError(anyhow::anyhow!(
            "Could not generate an unused key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    /// Store `data` and record a blob for it in the context's tenant.
    pub async fn create_after_upload(
        &self,
        ctx: &TenantContext,
        filename: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<BlobRecord, KelderError> {
        validate_filename(filename)?;
        let key = self.generate_unique_key(ctx).await?;
        let byte_size = data.len() as u64;
        let checksum = self.storage.put(&key, data).await?;
        metrics::record_bytes_received(byte_size as usize);

        let new_blob = NewBlob {
            key: key.clone(),
            filename: filename.to_string(),
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            byte_size,
            checksum,
        };
        let record = match self.metadata.insert_blob(ctx.tenant(), new_blob).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&key).await {
                    warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
                }
                return Err(e.into());
            }
        };

        metrics::record_blob_created();
        info!(
            tenant = %record.tenant,
            id = record.id,
            key = %record.key,
            byte_size = record.byte_size,
            "Blob created after upload"
        );
        Ok(record)
    }

    /// Record a blob whose bytes the client will upload directly.
    pub async fn create_before_direct_upload(
        &self,
        ctx: &TenantContext,
        request: DirectUploadRequest,
    ) -> Result<BlobRecord, KelderError> {
        validate_filename(&request.filename)?;
        if request.checksum.trim().is_empty() {
            return Err(KelderError::invalid_argument("A checksum is required"));
        }
        let key = self.generate_unique_key(ctx).await?;
        let new_blob = NewBlob {
            key,
            filename: request.filename,
            content_type: request
                .content_type
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            byte_size: request.byte_size,
            checksum: request.checksum,
        };
        let record = self.metadata.insert_blob(ctx.tenant(), new_blob).await?;

        metrics::record_blob_created();
        info!(
            tenant = %record.tenant,
            id = record.id,
            key = %record.key,
            "Blob created before direct upload"
        );
        Ok(record)
    }

    // ── References and lookup ───────────────────────────────────────

    /// Signed id bound to the blob's own tenant.
    pub fn signed_id(&self, blob: &BlobRecord) -> Result<String, KelderError> {
        self.references.sign_blob_id(&blob.tenant, blob.id)
    }

    /// Resolve a signed id: verify, switch into its tenant, then look up.
    ///
    /// Returns the nested context alongside the record so follow-up work
    /// stays in the blob's tenant.
    pub async fn find_signed(
        &self,
        ambient: &TenantContext,
        signed_id: &str,
    ) -> Result<(TenantContext, BlobRecord), KelderError> {
        let (tenant, id) = self.references.verify_blob_id(signed_id)?;
        self.tenants
            .scoped(ambient, &tenant, |ctx| async move {
                let blob = self.find(&ctx, id).await?;
                Ok((ctx, blob))
            })
            .await
    }

    /// Look up a blob by plain id in the context's tenant.
    pub async fn find(&self, ctx: &TenantContext, id: BlobId) -> Result<BlobRecord, KelderError> {
        self.metadata
            .get_blob(ctx.tenant(), id)
            .await?
            .ok_or(KelderError::NoSuchBlob { id })
    }

    /// Remove a blob's bytes and its record.
    pub async fn purge(&self, ctx: &TenantContext, id: BlobId) -> Result<(), KelderError> {
        let blob = self.find(ctx, id).await?;
        self.storage.delete(&blob.key).await?;
        self.metadata.delete_blob(ctx.tenant(), id).await?;
        info!(tenant = %ctx.tenant(), id, key = %blob.key, "Blob purged");
        Ok(())
    }

    // ── Disk URLs ───────────────────────────────────────────────────

    /// Short-lived download URL: `/disk/<token>/<filename>`.
    pub fn service_url(
        &self,
        blob: &BlobRecord,
        disposition: Disposition,
    ) -> Result<String, KelderError> {
        let payload = DiskKeyPayload {
            key: blob.key.clone(),
            filename: blob.filename.clone(),
            content_type: blob.content_type.clone(),
            disposition,
        };
        let token = self.references.signer().generate(
            &payload,
            Purpose::BlobKey,
            Some(self.service_urls_expire_in),
        )?;
        Ok(format!("/disk/{token}/{}", encode_filename(&blob.filename)))
    }

    /// Short-lived direct upload URL: `/disk/<token>`.
    pub fn direct_upload_url(&self, blob: &BlobRecord) -> Result<String, KelderError> {
        let payload = DirectUploadPayload {
            key: blob.key.clone(),
            content_type: blob.content_type.clone(),
            content_length: blob.byte_size,
            checksum: blob.checksum.clone(),
        };
        let token = self.references.signer().generate(
            &payload,
            Purpose::BlobToken,
            Some(self.service_urls_expire_in),
        )?;
        Ok(format!("/disk/{token}"))
    }

    /// Accept the bytes of a direct upload.
    ///
    /// The declared content type, length and checksum signed into the token
    /// must all match what arrives.
    pub async fn upload_direct(
        &self,
        token: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<(), KelderError> {
        let payload: DirectUploadPayload = self
            .references
            .signer()
            .verified(token, Purpose::BlobToken)
            .inspect_err(|_| metrics::record_signature_rejection(Purpose::BlobToken))?;

        if content_type.unwrap_or(DEFAULT_CONTENT_TYPE) != payload.content_type
            || data.len() as u64 != payload.content_length
            || compute_checksum(&data) != payload.checksum
        {
            debug!(key = %payload.key, "Direct upload does not match its declaration");
            return Err(KelderError::IntegrityError);
        }
        if !self.metadata.blob_key_exists(&payload.key).await? {
            return Err(KelderError::NoSuchKey { key: payload.key });
        }

        let size = data.len();
        self.storage.put(&payload.key, data).await?;
        metrics::record_bytes_received(size);
        info!(key = %payload.key, byte_size = size, "Direct upload stored");
        Ok(())
    }

    /// Read the bytes a signed download URL points at.
    pub async fn download(&self, token: &str) -> Result<Download, KelderError> {
        let payload: DiskKeyPayload = self
            .references
            .signer()
            .verified(token, Purpose::BlobKey)
            .inspect_err(|_| metrics::record_signature_rejection(Purpose::BlobKey))?;

        if !self.storage.exists(&payload.key).await? {
            return Err(KelderError::NoSuchKey { key: payload.key });
        }
        let stored = self.storage.get(&payload.key).await?;
        metrics::record_bytes_sent(stored.data.len());

        Ok(Download {
            data: stored.data,
            content_type: payload.content_type,
            content_disposition: payload.disposition.header_value(&payload.filename),
        })
    }
}

fn validate_filename(filename: &str) -> Result<(), KelderError> {
    if filename.is_empty() || filename.len() > 255 {
        return Err(KelderError::invalid_argument(
            "Filename must be 1 to 255 bytes",
        ));
    }
    if filename.contains(['/', '\\', '\0']) {
        return Err(KelderError::invalid_argument(
            "Filename must not contain path separators",
        ));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
