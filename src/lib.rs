//! Kelder library: tenant-aware blob storage.
//!
//! Every stored blob's key is prefixed with its tenant's slug, the disk
//! layout keeps each tenant under one top-level directory, and signed
//! references carry the tenant they belong to.  Inbound requests resolve
//! their tenant from an optional signed query parameter before any lookup.

use std::sync::Arc;
use std::time::Duration;

pub mod blob;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod keys;
pub mod metadata;
pub mod metrics;
pub mod reference;
pub mod resolver;
pub mod server;
pub mod signing;
pub mod storage;
pub mod tenant;

use crate::blob::BlobService;
use crate::config::Config;
use crate::errors::KelderError;
use crate::keys::TenantKeyGenerator;
use crate::metadata::store::MetadataStore;
use crate::reference::SignedReference;
use crate::resolver::RequestTenantResolver;
use crate::signing::MessageVerifier;
use crate::storage::backend::StorageBackend;
use crate::tenant::{TenantDirectory, TenantId};

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Metadata store (SQLite or in-memory).
    pub metadata: Arc<dyn MetadataStore>,
    /// Blob storage backend (local filesystem or in-memory).
    pub storage: Arc<dyn StorageBackend>,
    /// Blob and tenant reference signing.
    pub references: SignedReference,
    /// Tenant registry and switch primitive.
    pub tenants: TenantDirectory,
    /// Blob operations.
    pub blobs: BlobService,
    /// Request tenant resolution.
    pub resolver: RequestTenantResolver,
}

impl AppState {
    /// Wire the services from `config` over the given stores.
    ///
    /// Tenants are not seeded here; call [`TenantDirectory::seed`] once the
    /// runtime is up.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self, KelderError> {
        let default_tenant = TenantId::parse(config.tenants.default.as_str())?;

        let signer = Arc::new(MessageVerifier::new(
            &config.signing.secret_key_base,
            &config.signing.salt,
        ));
        let references = SignedReference::new(
            signer,
            config.signing.reference_expires_in.map(Duration::from_secs),
        );

        let tenants = TenantDirectory::new(metadata.clone(), storage.clone(), default_tenant);
        let blobs = BlobService::new(
            metadata.clone(),
            storage.clone(),
            Arc::new(TenantKeyGenerator::default()),
            references.clone(),
            tenants.clone(),
            Duration::from_secs(config.signing.service_urls_expire_in),
        );
        let resolver = RequestTenantResolver::new(references.clone(), tenants.clone());

        Ok(Self {
            config,
            metadata,
            storage,
            references,
            tenants,
            blobs,
            resolver,
        })
    }

    /// Tenants from `tenants.seed`, validated.
    pub fn seed_tenants(&self) -> Result<Vec<TenantId>, KelderError> {
        self.config
            .tenants
            .seed
            .iter()
            .map(|name| TenantId::parse(name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::storage::memory::MemoryBackend;

    #[tokio::test]
    async fn test_state_from_config_seeds_tenants() {
        let mut config = Config::default();
        config.tenants.seed = vec!["acme_prod".to_string()];
        let state = AppState::new(
            config,
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBackend::new()),
        )
        .unwrap();

        let seed = state.seed_tenants().unwrap();
        state.tenants.seed(&seed).await.unwrap();

        let names: Vec<String> = state
            .tenants
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["acme_prod", "public"]);
    }

    #[test]
    fn test_invalid_default_tenant_is_rejected() {
        let mut config = Config::default();
        config.tenants.default = "not-valid".to_string();
        let result = AppState::new(
            config,
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBackend::new()),
        );
        assert!(result.is_err());
    }
}
