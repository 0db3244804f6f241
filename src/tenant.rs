//! Tenant identifiers, slugs and request-scoped tenant contexts.
//!
//! A [`TenantId`] names one isolated data partition.  Its slug (the last
//! `_`-separated component) prefixes every storage key and names the
//! tenant's top-level storage directory.
//!
//! There is no process-wide "current tenant".  The active tenant travels as
//! a [`TenantContext`] value through every lookup and signing call, and
//! [`TenantDirectory::switch`] hands back a new nested context instead of
//! mutating shared state.  Leaving a switched scope is the nested value being
//! dropped; the outer context is never touched.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, Instrument};

use crate::errors::KelderError;
use crate::metadata::store::MetadataStore;
use crate::storage::backend::StorageBackend;

/// Separator between the components of a tenant identifier.
pub const TENANT_DELIMITER: char = '_';

/// Longest accepted tenant identifier (a database identifier limit).
const MAX_TENANT_LEN: usize = 63;

// ── TenantId ────────────────────────────────────────────────────────

/// Validated tenant identifier.
///
/// Accepts ASCII alphanumerics and `_`, not starting or ending with `_`, so
/// the derived slug is never empty and never contains the storage key
/// delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw tenant identifier.
    pub fn parse(raw: impl Into<String>) -> Result<Self, KelderError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_TENANT_LEN {
            return Err(KelderError::invalid_argument(format!(
                "Tenant identifier must be 1 to {MAX_TENANT_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == TENANT_DELIMITER)
        {
            return Err(KelderError::invalid_argument(format!(
                "Tenant identifier {raw:?} may only contain ASCII letters, digits and '_'"
            )));
        }
        if raw.starts_with(TENANT_DELIMITER) || raw.ends_with(TENANT_DELIMITER) {
            return Err(KelderError::invalid_argument(format!(
                "Tenant identifier {raw:?} must not start or end with '_'"
            )));
        }
        Ok(Self(raw))
    }

    /// The full identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short filesystem- and URL-safe slug: the last `_` component.
    ///
    /// `"test_tenant_kelder_tenant123"` → `"tenant123"`.
    pub fn slug(&self) -> &str {
        match self.0.rsplit_once(TENANT_DELIMITER) {
            Some((_, last)) => last,
            None => &self.0,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = KelderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = KelderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

// ── TenantContext ───────────────────────────────────────────────────

/// The tenant a unit of work runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant: TenantId,
    elevated_from: Option<TenantId>,
}

impl TenantContext {
    /// A top-level context (not the result of a switch).
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            elevated_from: None,
        }
    }

    /// The active tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Slug of the active tenant.
    pub fn slug(&self) -> &str {
        self.tenant.slug()
    }

    /// The tenant that was active before this context was switched into.
    pub fn elevated_from(&self) -> Option<&TenantId> {
        self.elevated_from.as_ref()
    }

    /// Whether this context was produced by a switch.
    pub fn is_elevated(&self) -> bool {
        self.elevated_from.is_some()
    }

    fn nested(&self, tenant: TenantId) -> Self {
        Self {
            tenant,
            elevated_from: Some(self.tenant.clone()),
        }
    }
}

// ── TenantDirectory ─────────────────────────────────────────────────

/// Tenant registry and switch primitive.
///
/// Cheap to clone; all state lives behind the shared metadata store and
/// storage backend.
#[derive(Clone)]
pub struct TenantDirectory {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn StorageBackend>,
    default: TenantId,
}

impl TenantDirectory {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn StorageBackend>,
        default: TenantId,
    ) -> Self {
        Self {
            metadata,
            storage,
            default,
        }
    }

    /// The tenant requests run under when they carry no elevation token.
    pub fn default_tenant(&self) -> &TenantId {
        &self.default
    }

    /// A fresh top-level context for the default tenant.
    pub fn default_context(&self) -> TenantContext {
        TenantContext::new(self.default.clone())
    }

    /// Ensure the default tenant and every seed tenant exist. Idempotent.
    pub async fn seed(&self, tenants: &[TenantId]) -> Result<(), KelderError> {
        self.create(&self.default).await?;
        for tenant in tenants {
            self.create(tenant).await?;
        }
        Ok(())
    }

    /// Switch from `from` into `tenant`, returning the nested context.
    ///
    /// Fails with [`KelderError::TenantSwitchFailure`] if the tenant does not
    /// exist. `from` is left untouched, so nesting is always safe.
    pub async fn switch(
        &self,
        from: &TenantContext,
        tenant: &TenantId,
    ) -> Result<TenantContext, KelderError> {
        if !self.metadata.tenant_exists(tenant).await? {
            debug!(from = %from.tenant(), to = %tenant, "Switch into unknown tenant refused");
            return Err(KelderError::TenantSwitchFailure {
                tenant: tenant.to_string(),
            });
        }
        debug!(from = %from.tenant(), to = %tenant, "Switched tenant");
        Ok(from.nested(tenant.clone()))
    }

    /// Run `f` under `tenant`, instrumented with a `tenant` span.
    ///
    /// The nested context is moved into `f` and dropped when it completes,
    /// on success and on error alike.
    pub async fn scoped<T, F, Fut>(
        &self,
        from: &TenantContext,
        tenant: &TenantId,
        f: F,
    ) -> Result<T, KelderError>
    where
        F: FnOnce(TenantContext) -> Fut,
        Fut: Future<Output = Result<T, KelderError>>,
    {
        let ctx = self.switch(from, tenant).await?;
        let span = tracing::info_span!("tenant", tenant = %ctx.tenant());
        f(ctx).instrument(span).await
    }

    /// Create a tenant partition. Returns `false` if it already existed.
    ///
    /// Two tenants may not share a slug, compared ignoring ASCII case: they
    /// would share one top-level storage directory. The metadata store
    /// enforces the same rule atomically; this check only gives the early,
    /// descriptive error.
    pub async fn create(&self, tenant: &TenantId) -> Result<bool, KelderError> {
        let existing = self.metadata.list_tenants().await?;
        if existing.contains(tenant) {
            return Ok(false);
        }
        if let Some(clash) = existing
            .iter()
            .find(|t| t.slug().eq_ignore_ascii_case(tenant.slug()))
        {
            return Err(KelderError::invalid_argument(format!(
                "Tenant {tenant} would share slug {:?} with tenant {clash}",
                tenant.slug()
            )));
        }
        let created = self.metadata.create_tenant(tenant).await?;
        if created {
            info!(tenant = %tenant, slug = tenant.slug(), "Tenant created");
        }
        Ok(created)
    }

    /// Drop a tenant: its metadata partition and its whole storage tree.
    pub async fn drop_tenant(&self, tenant: &TenantId) -> Result<(), KelderError> {
        if *tenant == self.default {
            return Err(KelderError::invalid_argument(
                "The default tenant cannot be dropped",
            ));
        }
        if !self.metadata.drop_tenant(tenant).await? {
            return Err(KelderError::TenantSwitchFailure {
                tenant: tenant.to_string(),
            });
        }
        self.storage.delete_tenant(tenant.slug()).await?;
        info!(tenant = %tenant, slug = tenant.slug(), "Tenant dropped");
        Ok(())
    }

    /// All known tenants.
    pub async fn list(&self) -> Result<Vec<TenantId>, KelderError> {
        Ok(self.metadata.list_tenants().await?)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
