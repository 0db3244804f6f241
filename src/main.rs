//! Kelder -- tenant-aware blob storage server.
//!
//! Every startup is idempotent: the default and seed tenants are created if
//! missing, and the schema is applied if absent. SIGTERM/SIGINT stop
//! accepting connections and wait up to `server.shutdown_timeout` seconds
//! for in-flight requests.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use kelder::config::LoggingConfig;
use kelder::metadata::store::MetadataStore;
use kelder::storage::backend::StorageBackend;
use kelder::storage::sharding::{PrefixSharder, TenantSharder};

/// Command-line arguments for the Kelder server.
#[derive(Parser, Debug)]
#[command(name = "kelder", version, about = "Tenant-aware blob storage server")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "kelder.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = kelder::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        kelder::metrics::init_metrics()?;
        kelder::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let metadata: Arc<dyn MetadataStore> = match config.metadata.engine.as_str() {
        "memory" => {
            info!("In-memory metadata store initialized");
            Arc::new(kelder::metadata::memory::MemoryMetadataStore::new())
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            let store = kelder::metadata::sqlite::SqliteMetadataStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Arc::new(store)
        }
        other => anyhow::bail!("unknown metadata.engine '{other}' (expected sqlite or memory)"),
    };

    let storage: Arc<dyn StorageBackend> = match config.storage.backend.as_str() {
        "memory" => {
            info!("In-memory storage backend initialized");
            Arc::new(kelder::storage::memory::MemoryBackend::new())
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let backend = kelder::storage::local::LocalBackend::new(
                root,
                Arc::new(TenantSharder::<PrefixSharder>::default()),
            )?;
            info!("Local storage backend initialized at {}", root);
            Arc::new(backend)
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected local or memory)"),
    };

    let state = kelder::AppState::new(config.clone(), metadata, storage)?;
    let seed = state.seed_tenants()?;
    state.tenants.seed(&seed).await?;
    info!(
        default = %state.tenants.default_tenant(),
        seeded = seed.len(),
        "Tenants ready"
    );

    let app = kelder::server::app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Kelder listening on {}", bind_addr);

    kelder::server::serve(
        listener,
        app,
        shutdown_signal(),
        Duration::from_secs(config.server.shutdown_timeout),
    )
    .await?;

    info!("Kelder shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
