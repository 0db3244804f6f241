//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Each tenant row carries its own id counter, so blob ids are allocated
//! per partition and `(tenant, id)` is the blob primary key.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{now_iso8601, BlobId, BlobRecord, MetadataStore, NewBlob};
use crate::tenant::TenantId;

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const BLOB_COLUMNS: &str =
    "tenant, id, key, filename, content_type, byte_size, checksum, created_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// This is idempotent -- safe to call on every startup (crash-only design).
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            -- Tenant partitions
            CREATE TABLE IF NOT EXISTS tenants (
                name          TEXT PRIMARY KEY,
                slug          TEXT NOT NULL UNIQUE,
                last_blob_id  INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            -- Blobs
            CREATE TABLE IF NOT EXISTS blobs (
                tenant        TEXT NOT NULL,
                id            INTEGER NOT NULL,
                key           TEXT NOT NULL UNIQUE,
                filename      TEXT NOT NULL,
                content_type  TEXT NOT NULL DEFAULT 'application/octet-stream',
                byte_size     INTEGER NOT NULL,
                checksum      TEXT NOT NULL,
                created_at    TEXT NOT NULL,

                PRIMARY KEY (tenant, id),
                FOREIGN KEY (tenant) REFERENCES tenants(name) ON DELETE CASCADE
            );

            -- Slugs name storage directories, which may be case-insensitive.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_slug_nocase
                ON tenants(slug COLLATE NOCASE);
            ",
        )?;

        // Record schema version if not already present.
        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_iso8601()],
            )?;
        }

        Ok(())
    }
}

/// Map a `blobs` row (selected with [`BLOB_COLUMNS`]) to a record.
fn row_to_blob(row: &Row<'_>) -> rusqlite::Result<BlobRecord> {
    let tenant: String = row.get(0)?;
    let tenant = TenantId::parse(tenant).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(BlobRecord {
        tenant,
        id: row.get::<_, i64>(1)? as BlobId,
        key: row.get(2)?,
        filename: row.get(3)?,
        content_type: row.get(4)?,
        byte_size: row.get::<_, i64>(5)? as u64,
        checksum: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    // ── Tenants ─────────────────────────────────────────────────────

    fn create_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tenants WHERE name = ?1)",
                params![tenant.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO tenants (name, slug, created_at) VALUES (?1, ?2, ?3)",
                params![tenant.as_str(), tenant.slug(), now_iso8601()],
            )?;
            Ok(true)
        })
    }

    fn drop_tenant(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // Blob rows go with it via ON DELETE CASCADE.
            let deleted = conn.execute(
                "DELETE FROM tenants WHERE name = ?1",
                params![tenant.as_str()],
            )?;
            Ok(deleted > 0)
        })
    }

    fn tenant_exists(
        &self,
        tenant: &TenantId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tenants WHERE name = ?1)",
                params![tenant.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    fn list_tenants(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<TenantId>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare("SELECT name FROM tenants ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let tenants = names
                .into_iter()
                .map(TenantId::parse)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tenants)
        })
    }

    // ── Blobs ───────────────────────────────────────────────────────

    fn insert_blob(
        &self,
        tenant: &TenantId,
        blob: NewBlob,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<BlobRecord>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.unchecked_transaction()?;

            let updated = tx.execute(
                "UPDATE tenants SET last_blob_id = last_blob_id + 1 WHERE name = ?1",
                params![tenant.as_str()],
            )?;
            if updated == 0 {
                anyhow::bail!("Tenant does not exist: {}", tenant);
            }
            let id: i64 = tx.query_row(
                "SELECT last_blob_id FROM tenants WHERE name = ?1",
                params![tenant.as_str()],
                |row| row.get(0),
            )?;

            let created_at = now_iso8601();
            tx.execute(
                "INSERT INTO blobs (tenant, id, key, filename, content_type, byte_size, checksum, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tenant.as_str(),
                    id,
                    blob.key,
                    blob.filename,
                    blob.content_type,
                    blob.byte_size as i64,
                    blob.checksum,
                    created_at,
                ],
            )?;
            tx.commit()?;

            Ok(BlobRecord {
                tenant,
                id: id as BlobId,
                key: blob.key,
                filename: blob.filename,
                content_type: blob.content_type,
                byte_size: blob.byte_size,
                checksum: blob.checksum,
                created_at,
            })
        })
    }

    fn get_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<BlobRecord>>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    &format!("SELECT {BLOB_COLUMNS} FROM blobs WHERE tenant = ?1 AND id = ?2"),
                    params![tenant.as_str(), id as i64],
                    row_to_blob,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn blob_key_exists(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM blobs WHERE key = ?1)",
                params![key],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    fn delete_blob(
        &self,
        tenant: &TenantId,
        id: BlobId,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let deleted = conn.execute(
                "DELETE FROM blobs WHERE tenant = ?1 AND id = ?2",
                params![tenant.as_str(), id as i64],
            )?;
            Ok(deleted > 0)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
