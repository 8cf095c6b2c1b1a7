//! SQLite-backed ETag store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{format_timestamp, parse_timestamp, CachedObjectMetadata, EtagStore};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// ETag store backed by a single SQLite database file.
pub struct SqliteEtagStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteEtagStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("etag store mutex poisoned"))
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the table if it does not already exist.  Idempotent.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS s3_objects (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                s3_key      TEXT NOT NULL UNIQUE,
                etag        TEXT NOT NULL,
                updated_at  TEXT
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, format_timestamp(&Utc::now())],
            )?;
        }

        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedObjectMetadata> {
        let updated_at: Option<String> = row.get(2)?;
        Ok(CachedObjectMetadata {
            key: row.get(0)?,
            etag: row.get(1)?,
            updated_at: updated_at.as_deref().and_then(parse_timestamp),
        })
    }
}

impl EtagStore for SqliteEtagStore {
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CachedObjectMetadata>>> + Send + '_>>
    {
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let record = conn
                .query_row(
                    "SELECT s3_key, etag, updated_at FROM s3_objects WHERE s3_key = ?1",
                    params![key],
                    Self::row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn upsert(
        &self,
        key: &str,
        etag: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = key.to_string();
        let etag = etag.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO s3_objects (s3_key, etag, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(s3_key) DO UPDATE SET
                     etag = excluded.etag,
                     updated_at = excluded.updated_at",
                params![key, etag, updated_at.as_ref().map(format_timestamp)],
            )?;
            Ok(())
        })
    }

    fn list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<CachedObjectMetadata>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt =
                conn.prepare("SELECT s3_key, etag, updated_at FROM s3_objects ORDER BY s3_key")?;
            let rows = stmt
                .query_map([], Self::row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
