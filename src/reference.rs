//! Signed references binding a blob id or a bare tenant to its owner.
//!
//! A blob reference signs the pair `[tenant, id]`, so verification yields
//! the tenant to switch into before the id means anything.  A tenant
//! reference signs the tenant alone and is what requests carry to elevate.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::KelderError;
use crate::metadata::store::BlobId;
use crate::metrics;
use crate::signing::{Purpose, Signer, SignerExt};
use crate::tenant::TenantId;

/// Mints and verifies tenant-bound references.
#[derive(Clone)]
pub struct SignedReference {
    signer: Arc<dyn Signer>,
    expires_in: Option<Duration>,
}

impl SignedReference {
    /// References never expire unless `expires_in` is set.
    pub fn new(signer: Arc<dyn Signer>, expires_in: Option<Duration>) -> Self {
        Self { signer, expires_in }
    }

    /// The underlying signer, for purposes beyond references.
    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Sign `[tenant, id]` for `blob_id_with_tenant`.
    pub fn sign_blob_id(&self, tenant: &TenantId, id: BlobId) -> Result<String, KelderError> {
        self.signer
            .generate(&(tenant, id), Purpose::BlobIdWithTenant, self.expires_in)
    }

    /// Recover `(tenant, id)` from a blob reference.
    pub fn verify_blob_id(&self, token: &str) -> Result<(TenantId, BlobId), KelderError> {
        self.signer
            .verified(token, Purpose::BlobIdWithTenant)
            .inspect_err(|_| metrics::record_signature_rejection(Purpose::BlobIdWithTenant))
    }

    /// Sign a bare tenant for `controller_tenant_elevation`.
    pub fn sign_tenant(&self, tenant: &TenantId) -> Result<String, KelderError> {
        self.signer
            .generate(tenant, Purpose::ControllerTenantElevation, self.expires_in)
    }

    /// Recover the tenant from an elevation token.
    pub fn verify_tenant(&self, token: &str) -> Result<TenantId, KelderError> {
        self.signer
            .verified(token, Purpose::ControllerTenantElevation)
            .inspect_err(|_| {
                metrics::record_signature_rejection(Purpose::ControllerTenantElevation)
            })
    }
}
