//! Error types for tenant-aware blob storage.
//!
//! Every variant maps to a stable error code and HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers and middleware
//! can simply return `Err(KelderError::InvalidSignature)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Errors surfaced by the tenant, signing and blob layers.
#[derive(Debug, Error)]
pub enum KelderError {
    /// A token failed verification, was malformed, expired, or carried the
    /// wrong purpose.
    #[error("The signed reference is invalid")]
    InvalidSignature,

    /// A storage key did not have the `<slug>-<random>` shape.
    #[error("The storage key is not tenant-prefixed: {key}")]
    MalformedKey { key: String },

    /// Switching into the requested tenant failed.
    #[error("Unable to switch into tenant {tenant}")]
    TenantSwitchFailure { tenant: String },

    /// No blob with this id exists in the active tenant.
    #[error("The requested blob does not exist")]
    NoSuchBlob { id: u64 },

    /// No bytes are stored under this key.
    #[error("No object is stored under the requested key")]
    NoSuchKey { key: String },

    /// Uploaded bytes do not match the declared checksum, length or type.
    #[error("The uploaded data does not match the declared checksum, size or content type")]
    IntegrityError,

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The upload exceeds the configured maximum size.
    #[error("The upload exceeds the maximum allowed size")]
    EntityTooLarge,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl KelderError {
    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            KelderError::InvalidSignature => "InvalidSignature",
            KelderError::MalformedKey { .. } => "MalformedKey",
            KelderError::TenantSwitchFailure { .. } => "TenantSwitchFailure",
            KelderError::NoSuchBlob { .. } => "NoSuchBlob",
            KelderError::NoSuchKey { .. } => "NoSuchKey",
            KelderError::IntegrityError => "IntegrityError",
            KelderError::InvalidArgument { .. } => "InvalidArgument",
            KelderError::EntityTooLarge => "EntityTooLarge",
            KelderError::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            KelderError::InvalidSignature => StatusCode::FORBIDDEN,
            KelderError::MalformedKey { .. } => StatusCode::BAD_REQUEST,
            KelderError::TenantSwitchFailure { .. } => StatusCode::NOT_FOUND,
            KelderError::NoSuchBlob { .. } => StatusCode::NOT_FOUND,
            KelderError::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            KelderError::IntegrityError => StatusCode::UNPROCESSABLE_ENTITY,
            KelderError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            KelderError::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            KelderError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        KelderError::InvalidArgument {
            message: message.into(),
        }
    }
}

impl IntoResponse for KelderError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if let KelderError::InternalError(ref err) = self {
            tracing::error!(request_id = %request_id, error = %err, "Internal error");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
            ],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_uppercase_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signature_failures_are_authorization_errors() {
        assert_eq!(
            KelderError::InvalidSignature.status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            KelderError::MalformedKey { key: "x".into() }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            KelderError::TenantSwitchFailure {
                tenant: "gone".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            KelderError::IntegrityError.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            KelderError::InternalError(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_into_response_renders_json_body() {
        let response = KelderError::NoSuchBlob { id: 7 }.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "NoSuchBlob");
        assert_eq!(parsed["error"]["request_id"].as_str().unwrap().len(), 16);
    }
}
