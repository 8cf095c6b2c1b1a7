//! Abstract storage backend trait.
//!
//! Every storage backend must implement [`StorageBackend`].  Operations
//! are addressed by `(bucket, key)` and return [`StorageResult`] so the
//! handler can decide which failures to swallow.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::StorageResult;

/// Boxed future returned by every backend operation.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    /// ETag exactly as the backend reported it (usually quoted).
    pub etag: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, if reported.
    pub last_modified: Option<DateTime<Utc>>,
    /// MIME content type, if set.
    pub content_type: Option<String>,
    /// Version id on versioned buckets.
    pub version_id: Option<String>,
    /// User-defined metadata (`x-amz-meta-*`).
    pub user_metadata: HashMap<String, String>,
}

/// Outcome of a write, copy, or delete.
///
/// The default value is the "empty" result the handler returns when an
/// operation fails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectResult {
    /// Whether the backend confirmed the operation.
    pub acknowledged: bool,
    /// ETag of the written object, as reported.
    pub etag: Option<String>,
    /// Version id on versioned buckets.
    pub version_id: Option<String>,
    /// URL of the written object.
    pub location: Option<String>,
}

impl ObjectResult {
    /// A confirmed result with no further fields.
    pub fn acknowledged() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }

    /// True for the empty result (nothing was confirmed).
    pub fn is_empty(&self) -> bool {
        !self.acknowledged
    }
}

/// Options applied to a put or multipart upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutOptions {
    /// Canned ACL (`public-read`, `private`, ...).
    pub acl: Option<String>,
    /// MIME content type.
    pub content_type: Option<String>,
    /// Cache-Control header.
    pub cache_control: Option<String>,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
}

/// A single entry of a listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub key: String,
    /// ETag as reported (usually quoted).
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a marker-based listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// More entries exist after the last one in `entries`.
    pub is_truncated: bool,
}

/// A part accepted by the backend during a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Async object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Check whether `key` exists in `bucket`.
    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, bool>;

    /// Fetch metadata only.
    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectMetadata>;

    /// Read the full object body.
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Bytes>;

    /// Single-shot upload.  Returns [`crate::errors::StorageError::EntityTooLarge`]
    /// when the body exceeds what a single request accepts.
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, ObjectResult>;

    /// Server-side copy.
    fn copy<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BackendFuture<'a, ObjectResult>;

    /// Delete an object.  Deleting a missing key is not an error.
    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectResult>;

    /// Fetch one listing page, starting strictly after `marker`.
    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
        marker: Option<&'a str>,
    ) -> BackendFuture<'a, ListPage>;

    /// URL for `key`.  With `expires_in` the URL is presigned.
    fn public_url<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_in: Option<Duration>,
    ) -> BackendFuture<'a, String>;

    /// Start a multipart upload, returning its upload id.
    fn create_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, String>;

    /// Upload one part, returning its ETag.
    fn upload_part<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: i32,
        data: Bytes,
    ) -> BackendFuture<'a, String>;

    /// Assemble the uploaded parts into the final object.
    fn complete_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BackendFuture<'a, ObjectResult>;

    /// Abandon a multipart upload and discard its parts.
    fn abort_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()>;
}

/// Characters left intact when a key is placed in a URL path.
const KEY_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode an object key for use in a URL path, keeping `/`.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_SAFE).to_string()
}

/// Strip every `"` from a backend-reported ETag.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.replace('"', "")
}
