//! Request tenant resolution.
//!
//! Generic upload and download routes are not nested under any tenant, so
//! the tenant travels as a signed token in the `signed_tenant_name` query
//! parameter.  [`tenant_middleware`] resolves it after routing and before
//! any handler extractor runs, then hands the resulting [`TenantContext`]
//! to handlers through request extensions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn, Instrument};

use crate::errors::KelderError;
use crate::metrics;
use crate::reference::SignedReference;
use crate::tenant::{TenantContext, TenantDirectory};
use crate::AppState;

/// Query parameter carrying the elevation token.
pub const SIGNED_TENANT_PARAM: &str = "signed_tenant_name";

/// Paths that never carry tenant data.
const TENANT_SKIP_PATHS: &[&str] = &["/health", "/metrics"];

const QUERY_VALUE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Turns an optional elevation token into the tenant context a request runs
/// under.
#[derive(Clone)]
pub struct RequestTenantResolver {
    references: SignedReference,
    tenants: TenantDirectory,
}

impl RequestTenantResolver {
    pub fn new(references: SignedReference, tenants: TenantDirectory) -> Self {
        Self {
            references,
            tenants,
        }
    }

    /// Resolve the context for a request with the given raw query string.
    ///
    /// Without a token the ambient context is used as is.  A token that
    /// fails verification rejects the request; there is no fallback to the
    /// ambient tenant.
    pub async fn resolve(
        &self,
        ambient: &TenantContext,
        raw_query: Option<&str>,
    ) -> Result<TenantContext, KelderError> {
        let query = parse_query(raw_query);
        let Some(token) = query.get(SIGNED_TENANT_PARAM) else {
            metrics::record_tenant_resolution("default");
            return Ok(ambient.clone());
        };

        let tenant = match self.references.verify_tenant(token) {
            Ok(tenant) => tenant,
            Err(e) => {
                metrics::record_tenant_resolution("rejected");
                warn!("Rejected request with invalid tenant elevation token");
                return Err(e);
            }
        };
        match self.tenants.switch(ambient, &tenant).await {
            Ok(ctx) => {
                metrics::record_tenant_resolution("elevated");
                debug!(tenant = %ctx.tenant(), "Request elevated into tenant");
                Ok(ctx)
            }
            Err(e) => {
                metrics::record_tenant_resolution("rejected");
                warn!(tenant = %tenant, "Elevation into unavailable tenant refused");
                Err(e)
            }
        }
    }

    /// Elevation token for `ctx`, or `None` for the default tenant, which
    /// needs no elevation.
    pub fn elevation_token(&self, ctx: &TenantContext) -> Result<Option<String>, KelderError> {
        if ctx.tenant() == self.tenants.default_tenant() {
            return Ok(None);
        }
        self.references.sign_tenant(ctx.tenant()).map(Some)
    }

    /// Append the elevation token for `ctx` to `url`, so requests to it
    /// resolve back into the same tenant.
    pub fn elevate_url(&self, ctx: &TenantContext, url: &str) -> Result<String, KelderError> {
        let Some(token) = self.elevation_token(ctx)? else {
            return Ok(url.to_string());
        };
        let separator = if url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{url}{separator}{SIGNED_TENANT_PARAM}={}",
            utf8_percent_encode(&token, QUERY_VALUE_ENCODE_SET)
        ))
    }
}

/// Resolve the request's tenant and expose it as an extension.
///
/// Everything downstream, handler included, runs inside a `tenant` span.
pub async fn tenant_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, KelderError> {
    if TENANT_SKIP_PATHS.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let ambient = state.tenants.default_context();
    let ctx = state.resolver.resolve(&ambient, req.uri().query()).await?;

    let span = tracing::info_span!(
        "tenant",
        tenant = %ctx.tenant(),
        elevated = ctx.is_elevated()
    );
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).instrument(span).await)
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap.
pub(crate) fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                let decoded_k = percent_encoding::percent_decode_str(k)
                    .decode_utf8_lossy()
                    .into_owned();
                let decoded_v = percent_encoding::percent_decode_str(&v.replace('+', " "))
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded_k, decoded_v);
            } else if !part.is_empty() {
                let decoded = percent_encoding::percent_decode_str(part)
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(decoded, String::new());
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;
    use crate::signing::MessageVerifier;
    use crate::storage::memory::MemoryBackend;
    use crate::tenant::TenantId;

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    async fn resolver() -> (RequestTenantResolver, TenantDirectory, SignedReference) {
        let tenants = TenantDirectory::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBackend::new()),
            tenant("public"),
        );
        tenants.seed(&[tenant("acme")]).await.unwrap();
        let references =
            SignedReference::new(Arc::new(MessageVerifier::new("secret", "kelder")), None);
        (
            RequestTenantResolver::new(references.clone(), tenants.clone()),
            tenants,
            references,
        )
    }

    #[tokio::test]
    async fn test_no_token_keeps_ambient_tenant() {
        let (resolver, tenants, _) = resolver().await;
        let ambient = tenants.default_context();
        for query in [None, Some(""), Some("filename=a.txt")] {
            let ctx = resolver.resolve(&ambient, query).await.unwrap();
            assert_eq!(ctx, ambient);
        }
    }

    #[tokio::test]
    async fn test_valid_token_elevates() {
        let (resolver, tenants, references) = resolver().await;
        let token = references.sign_tenant(&tenant("acme")).unwrap();
        let query = format!("a=1&{SIGNED_TENANT_PARAM}={token}");
        let ctx = resolver
            .resolve(&tenants.default_context(), Some(&query))
            .await
            .unwrap();
        assert_eq!(ctx.tenant(), &tenant("acme"));
        assert_eq!(ctx.elevated_from(), Some(&tenant("public")));
    }

    #[tokio::test]
    async fn test_invalid_token_rejects_without_fallback() {
        let (resolver, tenants, references) = resolver().await;
        let blob_token = references.sign_blob_id(&tenant("acme"), 1).unwrap();
        for token in ["", "garbage", blob_token.as_str()] {
            let query = format!("{SIGNED_TENANT_PARAM}={token}");
            let err = resolver
                .resolve(&tenants.default_context(), Some(&query))
                .await
                .unwrap_err();
            assert!(matches!(err, KelderError::InvalidSignature));
        }
    }

    #[tokio::test]
    async fn test_token_for_unknown_tenant_fails_to_switch() {
        let (resolver, tenants, references) = resolver().await;
        let token = references.sign_tenant(&tenant("ghost")).unwrap();
        let query = format!("{SIGNED_TENANT_PARAM}={token}");
        let err = resolver
            .resolve(&tenants.default_context(), Some(&query))
            .await
            .unwrap_err();
        assert!(matches!(err, KelderError::TenantSwitchFailure { .. }));
    }

    #[tokio::test]
    async fn test_elevate_url_roundtrips() {
        let (resolver, tenants, _) = resolver().await;
        let acme = tenants
            .switch(&tenants.default_context(), &tenant("acme"))
            .await
            .unwrap();

        let url = resolver.elevate_url(&acme, "/direct_uploads").unwrap();
        let (path, query) = url.split_once('?').unwrap();
        assert_eq!(path, "/direct_uploads");
        let ctx = resolver
            .resolve(&tenants.default_context(), Some(query))
            .await
            .unwrap();
        assert_eq!(ctx.tenant(), &tenant("acme"));

        let url = resolver.elevate_url(&acme, "/blobs?filename=a.txt").unwrap();
        assert!(url.starts_with("/blobs?filename=a.txt&signed_tenant_name="));
    }

    #[tokio::test]
    async fn test_default_tenant_urls_are_not_elevated() {
        let (resolver, tenants, _) = resolver().await;
        let url = resolver
            .elevate_url(&tenants.default_context(), "/direct_uploads")
            .unwrap();
        assert_eq!(url, "/direct_uploads");
    }

    #[test]
    fn test_parse_query_decodes() {
        let q = parse_query(Some("filename=my%20file.txt&flag&x=a+b"));
        assert_eq!(q.get("filename").unwrap(), "my file.txt");
        assert_eq!(q.get("flag").unwrap(), "");
        assert_eq!(q.get("x").unwrap(), "a b");
        assert!(parse_query(None).is_empty());
    }
}
