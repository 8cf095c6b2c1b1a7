//! Read-through / write-through ETag cache.
//!
//! The cache is an accelerator, never an authority: writes the handler
//! initiates overwrite the row for their key, and a lookup that misses
//! asks the backend once and remembers the answer.  Backend and store
//! failures degrade to the empty fingerprint `""`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::EtagStore;
use crate::metrics;
use crate::storage::backend::{strip_etag_quotes, StorageBackend};

/// Object key → last-known ETag, backed by an [`EtagStore`].
pub struct MetadataCache {
    store: Arc<dyn EtagStore>,
    backend: Arc<dyn StorageBackend>,
    /// Bucket consulted on a cache miss.
    bucket: String,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn EtagStore>, backend: Arc<dyn StorageBackend>, bucket: &str) -> Self {
        Self {
            store,
            backend,
            bucket: bucket.to_string(),
        }
    }

    /// Upsert the row for `key` after a write the caller performed.
    pub async fn record_write(&self, key: &str, etag: &str, observed_at: Option<DateTime<Utc>>) {
        let etag = strip_etag_quotes(etag);
        if let Err(e) = self.store.upsert(key, &etag, observed_at).await {
            warn!("failed to record etag for {}: {:#}", key, e);
        }
    }

    /// Cached fingerprint for `key`, fetched from the backend on a miss.
    ///
    /// Returns `""` when the key is blank, the object does not exist, or
    /// the backend fails.
    pub async fn fingerprint(&self, key: &str) -> String {
        let key = key.trim();
        if key.is_empty() {
            return String::new();
        }

        match self.store.get(key).await {
            Ok(Some(record)) if !record.etag.is_empty() => {
                metrics::record_cache_lookup(true);
                return record.etag;
            }
            Ok(_) => {}
            Err(e) => warn!("etag store lookup failed for {}: {:#}", key, e),
        }
        metrics::record_cache_lookup(false);

        let etag = self.fetch_fingerprint(key).await;
        if !etag.is_empty() {
            self.record_write(key, &etag, None).await;
        }
        etag
    }

    /// Uncached fingerprint of `key` in the cache's bucket.
    pub async fn fetch_fingerprint(&self, key: &str) -> String {
        self.fetch_fingerprint_in(&self.bucket, key).await
    }

    /// Uncached fingerprint of `key` in `bucket`.
    pub async fn fetch_fingerprint_in(&self, bucket: &str, key: &str) -> String {
        let key = key.trim();
        if key.is_empty() {
            return String::new();
        }

        match self.backend.head(bucket, key).await {
            Ok(meta) => {
                metrics::record_operation("head", true);
                strip_etag_quotes(&meta.etag)
            }
            Err(e) => {
                metrics::record_operation("head", false);
                debug!("no fingerprint for {}/{}: {}", bucket, key, e);
                String::new()
            }
        }
    }
}
