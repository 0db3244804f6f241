//! Configuration loading and types for Kelder.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, reference signing, tenants, metadata persistence,
//! blob storage, logging and metrics.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Signed reference settings.
    #[serde(default)]
    pub signing: SigningConfig,

    /// Tenant settings.
    #[serde(default)]
    pub tenants: TenantsConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Blob storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum upload size in bytes (default 100 MiB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Signing secret and token lifetimes.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// Secret every signed reference is derived from. Rotating it revokes
    /// all outstanding references.
    #[serde(default = "default_secret_key_base")]
    pub secret_key_base: String,

    /// Salt mixed into the signing key derivation.
    #[serde(default = "default_salt")]
    pub salt: String,

    /// Lifetime of signed disk URLs, in seconds.
    #[serde(default = "default_service_urls_expire_in")]
    pub service_urls_expire_in: u64,

    /// Optional lifetime of blob and tenant references, in seconds.
    #[serde(default)]
    pub reference_expires_in: Option<u64>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_key_base: default_secret_key_base(),
            salt: default_salt(),
            service_urls_expire_in: default_service_urls_expire_in(),
            reference_expires_in: None,
        }
    }
}

/// Tenant settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantsConfig {
    /// Tenant used when a request carries no elevation token.
    #[serde(default = "default_tenant")]
    pub default: String,

    /// Tenants created on every startup (idempotent).
    #[serde(default)]
    pub seed: Vec<String>,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            default: default_tenant(),
            seed: Vec::new(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Blob storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored blobs.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_upload_size() -> u64 {
    104_857_600 // 100 MiB
}

fn default_secret_key_base() -> String {
    "kelder-development-secret".to_string()
}

fn default_salt() -> String {
    "kelder".to_string()
}

fn default_service_urls_expire_in() -> u64 {
    300
}

fn default_tenant() -> String {
    "public".to_string()
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/blobs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 9012);
        assert_eq!(config.tenants.default, "public");
        assert_eq!(config.signing.service_urls_expire_in, 300);
        assert!(config.signing.reference_expires_in.is_none());
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.metadata.engine, "sqlite");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
signing:
  secret_key_base: s3cr3t
  reference_expires_in: 3600
tenants:
  default: main
  seed: [acme_prod, test_tenant_kelder_tenant123]
storage:
  backend: memory
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.signing.secret_key_base, "s3cr3t");
        assert_eq!(config.signing.salt, "kelder");
        assert_eq!(config.signing.reference_expires_in, Some(3600));
        assert_eq!(config.tenants.default, "main");
        assert_eq!(config.tenants.seed.len(), 2);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.storage.local.root_dir, "./data/blobs");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kelder.yaml");
        std::fs::write(&path, "server:\n  port: 8080\nlogging:\n  format: json\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/kelder.yaml").is_err());
    }
}
