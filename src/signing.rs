//! Purpose-tagged message signing.
//!
//! Every token binds its payload to a [`Purpose`]; a token minted for one
//! purpose never verifies under another.  [`MessageVerifier`] is the default
//! HMAC-SHA256 implementation:
//!
//! ```text
//! token   = base64url(envelope) "." hex(HMAC-SHA256(key, base64url(envelope)))
//! envelope = {"message": <payload>, "purpose": "<purpose>", "expires_at"?: "<rfc3339>"}
//! key      = HMAC-SHA256(secret_key_base, salt)
//! ```

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::KelderError;

type HmacSha256 = Hmac<Sha256>;

/// Separator between the encoded envelope and its digest.
const TOKEN_SEPARATOR: char = '.';

/// What a token was minted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// A `[tenant, blob id]` pair.
    BlobIdWithTenant,
    /// A bare tenant, carried by requests to elevate into that tenant.
    ControllerTenantElevation,
    /// A storage key in a disk download URL.
    BlobKey,
    /// A direct-upload grant.
    BlobToken,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::BlobIdWithTenant => "blob_id_with_tenant",
            Purpose::ControllerTenantElevation => "controller_tenant_elevation",
            Purpose::BlobKey => "blob_key",
            Purpose::BlobToken => "blob_token",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sign and verify purpose-tagged JSON payloads.
pub trait Signer: Send + Sync + 'static {
    /// Mint a token for `payload`, optionally expiring after `expires_in`.
    fn sign(
        &self,
        payload: Value,
        purpose: Purpose,
        expires_in: Option<Duration>,
    ) -> Result<String, KelderError>;

    /// Recover the payload, failing with [`KelderError::InvalidSignature`]
    /// on any malformed, tampered, expired or wrong-purpose token.
    fn verify(&self, token: &str, purpose: Purpose) -> Result<Value, KelderError>;
}

/// Typed helpers over any [`Signer`].
pub trait SignerExt: Signer {
    fn generate<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        purpose: Purpose,
        expires_in: Option<Duration>,
    ) -> Result<String, KelderError> {
        let value = serde_json::to_value(payload).map_err(anyhow::Error::from)?;
        self.sign(value, purpose, expires_in)
    }

    /// A payload that verifies but has the wrong shape is treated as an
    /// invalid signature.
    fn verified<T: DeserializeOwned>(&self, token: &str, purpose: Purpose) -> Result<T, KelderError> {
        let value = self.verify(token, purpose)?;
        serde_json::from_value(value).map_err(|_| KelderError::InvalidSignature)
    }
}

impl<S: Signer + ?Sized> SignerExt for S {}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    message: Value,
    purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
}

/// HMAC-SHA256 signer keyed from a secret and a salt.
pub struct MessageVerifier {
    key: Vec<u8>,
}

impl MessageVerifier {
    pub fn new(secret_key_base: &str, salt: &str) -> Self {
        Self {
            key: hmac_sha256(secret_key_base.as_bytes(), salt.as_bytes()),
        }
    }

    fn digest(&self, data: &str) -> String {
        hex::encode(hmac_sha256(&self.key, data.as_bytes()))
    }
}

impl fmt::Debug for MessageVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageVerifier").finish_non_exhaustive()
    }
}

impl Signer for MessageVerifier {
    fn sign(
        &self,
        payload: Value,
        purpose: Purpose,
        expires_in: Option<Duration>,
    ) -> Result<String, KelderError> {
        let expires_at = match expires_in {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(anyhow::Error::from)?;
                Some((Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => None,
        };
        let envelope = Envelope {
            message: payload,
            purpose: purpose.as_str().to_string(),
            expires_at,
        };
        let json = serde_json::to_vec(&envelope).map_err(anyhow::Error::from)?;
        let data = URL_SAFE_NO_PAD.encode(json);
        let digest = self.digest(&data);
        Ok(format!("{data}{TOKEN_SEPARATOR}{digest}"))
    }

    fn verify(&self, token: &str, purpose: Purpose) -> Result<Value, KelderError> {
        let (data, digest) = token
            .split_once(TOKEN_SEPARATOR)
            .ok_or(KelderError::InvalidSignature)?;
        if data.is_empty() || !constant_time_eq(&self.digest(data), digest) {
            return Err(KelderError::InvalidSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(data)
            .map_err(|_| KelderError::InvalidSignature)?;
        let envelope: Envelope =
            serde_json::from_slice(&json).map_err(|_| KelderError::InvalidSignature)?;

        if envelope.purpose != purpose.as_str() {
            tracing::debug!(
                expected = purpose.as_str(),
                actual = %envelope.purpose,
                "Token minted for another purpose"
            );
            return Err(KelderError::InvalidSignature);
        }
        if let Some(expires_at) = envelope.expires_at {
            let expires_at = DateTime::parse_from_rfc3339(&expires_at)
                .map_err(|_| KelderError::InvalidSignature)?;
            if Utc::now() >= expires_at {
                tracing::debug!(purpose = purpose.as_str(), "Token expired");
                return Err(KelderError::InvalidSignature);
            }
        }

        Ok(envelope.message)
    }
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compare two digest strings in constant time.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
