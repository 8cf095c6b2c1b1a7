//! In-memory storage backend.
//!
//! Objects live in per-bucket `BTreeMap`s behind a `tokio::sync::RwLock`,
//! so listings come back in key order like S3.  Multipart sessions are
//! held in a second map until completed or aborted.
//!
//! ETags follow S3 conventions: quoted MD5 hex for single-shot puts and
//! `"md5(concat(part md5s))-N"` for multipart uploads.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{
    encode_key, BackendFuture, CompletedPart, ListEntry, ListPage, ObjectMetadata, ObjectResult,
    PutOptions, StorageBackend,
};
use crate::errors::StorageError;

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
    options: PutOptions,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    options: PutOptions,
    /// part_number -> (data, quoted etag)
    parts: BTreeMap<i32, (Bytes, String)>,
}

/// Storage backend that keeps every object in process memory.
pub struct MemoryBackend {
    /// bucket -> key -> entry
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredEntry>>>,
    uploads: RwLock<HashMap<String, PendingUpload>>,
    next_upload_id: AtomicU64,
    /// Maximum entries per listing page.
    page_size: usize,
    /// Largest body accepted by a single-shot put.
    max_single_put_bytes: u64,
}

impl MemoryBackend {
    /// Create an empty backend.  A `page_size` of 0 is treated as 1.
    pub fn new(page_size: usize, max_single_put_bytes: u64) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            uploads: RwLock::new(HashMap::new()),
            next_upload_id: AtomicU64::new(1),
            page_size: page_size.max(1),
            max_single_put_bytes,
        }
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Compute the multipart ETag from the quoted part ETags.
    fn compute_multipart_etag(part_etags: &[&str]) -> String {
        let mut combined = Vec::with_capacity(part_etags.len() * 16);
        for etag in part_etags {
            if let Ok(bytes) = hex::decode(etag.trim_matches('"')) {
                combined.extend_from_slice(&bytes);
            }
        }
        let mut hasher = Md5::new();
        hasher.update(&combined);
        format!("\"{}-{}\"", hex::encode(hasher.finalize()), part_etags.len())
    }

    fn url_for(bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{}", encode_key(key))
    }

    async fn store(&self, bucket: &str, key: &str, data: Bytes, etag: String, options: PutOptions) {
        let entry = StoredEntry {
            data,
            etag,
            last_modified: Utc::now(),
            options,
        };
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), entry);
    }

    async fn entry(&self, bucket: &str, key: &str) -> Option<StoredEntry> {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).and_then(|objects| objects.get(key)).cloned()
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }
}

impl StorageBackend for MemoryBackend {
    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move { Ok(self.entry(bucket, key).await.is_some()) })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            let entry = self
                .entry(bucket, key)
                .await
                .ok_or_else(|| StorageError::not_found(bucket, key))?;
            Ok(ObjectMetadata {
                etag: entry.etag,
                size: entry.data.len() as u64,
                last_modified: Some(entry.last_modified),
                content_type: entry.options.content_type,
                version_id: None,
                user_metadata: entry.options.metadata,
            })
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Bytes> {
        Box::pin(async move {
            self.entry(bucket, key)
                .await
                .map(|entry| entry.data)
                .ok_or_else(|| StorageError::not_found(bucket, key))
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            if data.len() as u64 > self.max_single_put_bytes {
                return Err(StorageError::EntityTooLarge);
            }
            let etag = Self::compute_etag(&data);
            debug!("memory put: bucket={} key={} size={}", bucket, key, data.len());
            self.store(bucket, key, data, etag.clone(), options.clone())
                .await;
            Ok(ObjectResult {
                acknowledged: true,
                etag: Some(etag),
                version_id: None,
                location: Some(Self::url_for(bucket, key)),
            })
        })
    }

    fn copy<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            let entry = self
                .entry(src_bucket, src_key)
                .await
                .ok_or_else(|| StorageError::not_found(src_bucket, src_key))?;
            let etag = entry.etag.clone();
            self.store(dst_bucket, dst_key, entry.data, etag.clone(), entry.options)
                .await;
            Ok(ObjectResult {
                acknowledged: true,
                etag: Some(etag),
                version_id: None,
                location: Some(Self::url_for(dst_bucket, dst_key)),
            })
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            let mut buckets = self.buckets.write().await;
            if let Some(objects) = buckets.get_mut(bucket) {
                objects.remove(key);
            }
            Ok(ObjectResult::acknowledged())
        })
    }

    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
        marker: Option<&'a str>,
    ) -> BackendFuture<'a, ListPage> {
        Box::pin(async move {
            let buckets = self.buckets.read().await;
            let Some(objects) = buckets.get(bucket) else {
                return Ok(ListPage::default());
            };

            let prefix = prefix.unwrap_or("");
            let mut matching = objects
                .iter()
                .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
                .filter(|(key, _)| key.starts_with(prefix));

            let entries: Vec<ListEntry> = matching
                .by_ref()
                .take(self.page_size)
                .map(|(key, entry)| ListEntry {
                    key: key.clone(),
                    etag: entry.etag.clone(),
                    size: entry.data.len() as u64,
                    last_modified: Some(entry.last_modified),
                })
                .collect();
            let is_truncated = matching.next().is_some();

            Ok(ListPage {
                entries,
                is_truncated,
            })
        })
    }

    fn public_url<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_in: Option<Duration>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let url = Self::url_for(bucket, key);
            Ok(match expires_in {
                Some(ttl) => format!("{url}?expires={}", ttl.as_secs()),
                None => url,
            })
        })
    }

    fn create_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let upload_id = format!(
                "mem-upload-{}",
                self.next_upload_id.fetch_add(1, Ordering::Relaxed)
            );
            let pending = PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            };
            self.uploads
                .write()
                .await
                .insert(upload_id.clone(), pending);
            Ok(upload_id)
        })
    }

    fn upload_part<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
        part_number: i32,
        data: Bytes,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let mut uploads = self.uploads.write().await;
            let pending = uploads.get_mut(upload_id).ok_or_else(|| {
                StorageError::InvalidInput(format!("no such upload: {upload_id}"))
            })?;
            let etag = Self::compute_etag(&data);
            pending.parts.insert(part_number, (data, etag.clone()));
            Ok(etag)
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            let pending = self.uploads.write().await.remove(upload_id).ok_or_else(|| {
                StorageError::InvalidInput(format!("no such upload: {upload_id}"))
            })?;
            if pending.bucket != bucket || pending.key != key {
                return Err(StorageError::InvalidInput(format!(
                    "upload {upload_id} belongs to {}/{}",
                    pending.bucket, pending.key
                )));
            }

            let mut body = BytesMut::new();
            let mut etags = Vec::with_capacity(parts.len());
            for part in parts {
                let (data, etag) = pending.parts.get(&part.part_number).ok_or_else(|| {
                    StorageError::InvalidInput(format!("missing part {}", part.part_number))
                })?;
                if etag != &part.etag {
                    return Err(StorageError::InvalidInput(format!(
                        "etag mismatch for part {}",
                        part.part_number
                    )));
                }
                body.extend_from_slice(data);
                etags.push(etag.as_str());
            }

            let etag = Self::compute_multipart_etag(&etags);
            self.store(bucket, key, body.freeze(), etag.clone(), pending.options)
                .await;
            Ok(ObjectResult {
                acknowledged: true,
                etag: Some(etag),
                version_id: None,
                location: Some(Self::url_for(bucket, key)),
            })
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.uploads.write().await.remove(upload_id);
            Ok(())
        })
    }
}
