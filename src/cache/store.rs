//! Abstract ETag store trait.
//!
//! The ETag store persists one [`CachedObjectMetadata`] row per object
//! key.  Methods return pinned futures so SQLite and in-memory stores
//! share one object-safe interface.

use chrono::{DateTime, SecondsFormat, Utc};
use std::future::Future;
use std::pin::Pin;

/// Last-known fingerprint of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedObjectMetadata {
    /// Storage object key.
    pub key: String,
    /// ETag with quotes stripped.
    pub etag: String,
    /// Time of the last refresh, when known.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persistence for [`CachedObjectMetadata`], keyed by object key.
pub trait EtagStore: Send + Sync + 'static {
    /// Fetch the row for `key`, if any.
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CachedObjectMetadata>>> + Send + '_>>;

    /// Insert or overwrite the row for `key`.  Last writer wins.
    fn upsert(
        &self,
        key: &str,
        etag: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// All rows, ordered by key.
    fn list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<CachedObjectMetadata>>> + Send + '_>>;
}

/// Format a timestamp the way stores persist it (RFC 3339, millis, `Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted timestamp.  Unparseable values read as `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
