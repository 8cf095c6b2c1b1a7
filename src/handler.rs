//! Fail-soft S3 façade.
//!
//! [`S3Handler`] trims and validates inputs, defaults empty bucket names
//! to the configured bucket, delegates to the [`StorageBackend`], and
//! mirrors the ETag of every create/copy into the [`MetadataCache`].
//!
//! No operation returns an error.  Failures are logged and mapped to the
//! operation's empty value: `false`, `None`, `""`, an empty `Vec`/`Bytes`,
//! or [`ObjectResult::default()`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::metadata::MetadataCache;
use crate::cache::store::EtagStore;
use crate::config::{Config, UploadConfig, WaitConfig};
use crate::metrics::{self as handler_metrics, BYTES_UPLOADED_TOTAL};
use crate::storage::backend::{
    strip_etag_quotes, ObjectMetadata, ObjectResult, PutOptions, StorageBackend,
};
use crate::upload::Uploader;

/// ACL applied by [`S3Handler::create_object`] and [`S3Handler::upload_file`].
pub const DEFAULT_ACL: &str = "public-read";

/// A local file paired with the key it should be stored under.
pub trait S3File {
    fn local_path(&self) -> &Path;
    fn remote_relative_path(&self) -> &str;
}

/// Plain [`S3File`] implementation.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub local_path: PathBuf,
    pub remote_path: String,
}

impl S3File for LocalFile {
    fn local_path(&self) -> &Path {
        &self.local_path
    }

    fn remote_relative_path(&self) -> &str {
        &self.remote_path
    }
}

/// One entry of [`S3Handler::list_objects_in_bucket`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListedObject {
    pub key: String,
    /// ETag with quotes stripped.
    pub etag: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of [`S3Handler::download_object_response`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedObject {
    pub bucket: String,
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// The S3 façade.
pub struct S3Handler {
    backend: Arc<dyn StorageBackend>,
    cache: MetadataCache,
    default_bucket: String,
    region: String,
    /// Trimmed CDN base URL; `Some` only when CDN rewriting is on.
    cdn_url: Option<String>,
    upload: UploadConfig,
    wait: WaitConfig,
}

impl S3Handler {
    /// Build a handler over an existing backend and ETag store.
    pub fn new(config: &Config, backend: Arc<dyn StorageBackend>, store: Arc<dyn EtagStore>) -> Self {
        let default_bucket = config.parameters.default_bucket.trim().to_string();
        let cdn_url = config
            .cdn
            .is_enabled()
            .then(|| config.cdn.base_url().to_string());

        info!(
            "S3 handler ready: bucket='{}' region='{}' cdn={}",
            default_bucket,
            config.parameters.region,
            cdn_url.as_deref().unwrap_or("off")
        );

        Self {
            cache: MetadataCache::new(store, backend.clone(), &default_bucket),
            backend,
            default_bucket,
            region: config.parameters.region.clone(),
            cdn_url,
            upload: config.upload.clone(),
            wait: config.wait.clone(),
        }
    }

    /// Build the backend and ETag store named in `config`, then the handler.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend = crate::storage::from_config(config).await?;
        let store = crate::cache::from_config(&config.cache)?;
        Ok(Self::new(config, backend, store))
    }

    /// Trimmed `bucket`, or the default bucket when blank.
    fn resolve_bucket<'a>(&'a self, bucket: &'a str) -> &'a str {
        let bucket = bucket.trim();
        if bucket.is_empty() {
            &self.default_bucket
        } else {
            bucket
        }
    }

    // -- Queries --------------------------------------------------------------

    /// Whether `key` exists in `bucket` (default bucket when blank).
    pub async fn object_exists(&self, key: &str, bucket: &str) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }
        let bucket = self.resolve_bucket(bucket);

        match self.backend.exists(bucket, key).await {
            Ok(exists) => {
                handler_metrics::record_operation("exists", true);
                exists
            }
            Err(e) => {
                handler_metrics::record_operation("exists", false);
                warn!("exists check failed for {}/{}: {}", bucket, key, e);
                false
            }
        }
    }

    /// Object metadata, or `None` when the key is blank, missing, or the
    /// backend fails.
    pub async fn head_object(&self, key: &str, bucket: &str) -> Option<ObjectMetadata> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let bucket = self.resolve_bucket(bucket);

        match self.backend.head(bucket, key).await {
            Ok(meta) => {
                handler_metrics::record_operation("head", true);
                Some(meta)
            }
            Err(e) => {
                handler_metrics::record_operation("head", false);
                debug!("head failed for {}/{}: {}", bucket, key, e);
                None
            }
        }
    }

    /// Full object body, or empty bytes.
    pub async fn get_object_content(&self, key: &str, bucket: &str) -> Bytes {
        let key = key.trim();
        if key.is_empty() || !self.object_exists(key, bucket).await {
            return Bytes::new();
        }
        let bucket = self.resolve_bucket(bucket);

        match self.backend.get(bucket, key).await {
            Ok(body) => {
                handler_metrics::record_operation("get", true);
                body
            }
            Err(e) => {
                handler_metrics::record_operation("get", false);
                warn!("get failed for {}/{}: {}", bucket, key, e);
                Bytes::new()
            }
        }
    }

    /// Uncached ETag of `key` in the default bucket, quotes stripped.
    pub async fn etag_for_key(&self, key: &str) -> String {
        self.cache.fetch_fingerprint(key).await
    }

    /// Cached ETag of `key`, fetched and remembered on a miss.
    pub async fn etag_for_object(&self, key: &str) -> String {
        self.cache.fingerprint(key).await
    }

    /// Every object in `bucket` under `prefix`, following the marker until
    /// the listing is no longer truncated.
    ///
    /// A failing page ends the listing; entries gathered so far are kept.
    pub async fn list_objects_in_bucket(&self, bucket: &str, prefix: &str) -> Vec<ListedObject> {
        let bucket = self.resolve_bucket(bucket);
        let prefix = prefix.trim();
        let prefix = (!prefix.is_empty()).then_some(prefix);

        let mut output = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = match self
                .backend
                .list_page(bucket, prefix, marker.as_deref())
                .await
            {
                Ok(page) => {
                    handler_metrics::record_operation("list", true);
                    page
                }
                Err(e) => {
                    handler_metrics::record_operation("list", false);
                    warn!("listing {} failed after {} entries: {}", bucket, output.len(), e);
                    break;
                }
            };

            let last_key = page.entries.last().map(|entry| entry.key.clone());
            output.extend(page.entries.into_iter().map(|entry| ListedObject {
                etag: strip_etag_quotes(&entry.etag),
                key: entry.key,
                size: entry.size,
                last_modified: entry.last_modified,
            }));

            match last_key {
                Some(last) if page.is_truncated => marker = Some(last),
                _ => break,
            }
        }

        output
    }

    // -- Writes ---------------------------------------------------------------

    /// Upload `body` to `key` in the default bucket with ACL
    /// [`DEFAULT_ACL`], then record the object's ETag in the cache.
    pub async fn create_object(&self, key: &str, body: Bytes, options: PutOptions) -> ObjectResult {
        let result = self.upload_object(key, body, DEFAULT_ACL, options).await;
        if result.is_empty() {
            return result;
        }

        let key = key.trim();
        let etag = self.cache.fetch_fingerprint(key).await;
        self.cache.record_write(key, &etag, Some(Utc::now())).await;
        result
    }

    /// Upload `body` to `key` in the default bucket.
    ///
    /// `options.acl`, when set, overrides `acl`.  Large bodies go through
    /// the multipart fallback of [`Uploader`].
    pub async fn upload_object(
        &self,
        key: &str,
        body: Bytes,
        acl: &str,
        mut options: PutOptions,
    ) -> ObjectResult {
        let key = key.trim();
        if key.is_empty() || body.is_empty() {
            return ObjectResult::default();
        }
        if options.acl.is_none() && !acl.is_empty() {
            options.acl = Some(acl.to_string());
        }

        let size = body.len() as u64;
        let uploader = Uploader::new(self.backend.as_ref(), &self.upload);
        match uploader
            .upload(&self.default_bucket, key, body, &options)
            .await
        {
            Ok(result) => {
                handler_metrics::record_operation("upload", true);
                counter!(BYTES_UPLOADED_TOTAL).increment(size);
                result
            }
            Err(e) => {
                handler_metrics::record_operation("upload", false);
                warn!(
                    "upload of {}/{} failed ({}): {}",
                    self.default_bucket,
                    key,
                    e.kind(),
                    e
                );
                ObjectResult::default()
            }
        }
    }

    /// Upload a local file to its remote relative path.
    pub async fn upload_file(&self, file: &dyn S3File) -> ObjectResult {
        let path = file.local_path();
        let body = match tokio::fs::read(path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                return ObjectResult::default();
            }
        };
        self.upload_object(
            file.remote_relative_path(),
            body,
            DEFAULT_ACL,
            PutOptions::default(),
        )
        .await
    }

    /// Server-side copy of `source` to `dest`.
    ///
    /// A missing source is a no-op with an empty result.  On success the
    /// handler waits for `dest` to become visible, then records its ETag
    /// when `dest` lives in the default bucket.
    pub async fn copy_object(
        &self,
        source: &str,
        dest: &str,
        source_bucket: &str,
        dest_bucket: &str,
    ) -> ObjectResult {
        let (source, dest) = (source.trim(), dest.trim());
        if source.is_empty() || dest.is_empty() {
            return ObjectResult::default();
        }
        let source_bucket = self.resolve_bucket(source_bucket);
        let dest_bucket = self.resolve_bucket(dest_bucket);

        if !self.object_exists(source, source_bucket).await {
            debug!("copy skipped: {}/{} does not exist", source_bucket, source);
            return ObjectResult::default();
        }

        let result = match self
            .backend
            .copy(source_bucket, source, dest_bucket, dest)
            .await
        {
            Ok(result) => {
                handler_metrics::record_operation("copy", true);
                result
            }
            Err(e) => {
                handler_metrics::record_operation("copy", false);
                warn!(
                    "copy {}/{} -> {}/{} failed: {}",
                    source_bucket, source, dest_bucket, dest, e
                );
                return ObjectResult::default();
            }
        };

        if !self.wait_until_exists(dest_bucket, dest).await {
            warn!(
                "copied object {}/{} never became visible",
                dest_bucket, dest
            );
            return ObjectResult::default();
        }

        // Cache rows are keyed by object key within the default bucket.
        if dest_bucket == self.default_bucket {
            let etag = self.cache.fetch_fingerprint(dest).await;
            self.cache.record_write(dest, &etag, Some(Utc::now())).await;
        }
        result
    }

    /// Delete `key`.  `None` for a blank key; an empty result when the
    /// backend fails.  The cache row for `key` is left in place.
    pub async fn delete_object(&self, key: &str, bucket: &str) -> Option<ObjectResult> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let bucket = self.resolve_bucket(bucket);

        match self.backend.delete(bucket, key).await {
            Ok(result) => {
                handler_metrics::record_operation("delete", true);
                Some(result)
            }
            Err(e) => {
                handler_metrics::record_operation("delete", false);
                warn!("delete of {}/{} failed: {}", bucket, key, e);
                Some(ObjectResult::default())
            }
        }
    }

    // -- Downloads ------------------------------------------------------------

    /// Save `key` to `save_path`.  `true` on success.
    pub async fn download_object(&self, key: &str, save_path: &str, bucket: &str) -> bool {
        self.download_object_response(key, save_path, bucket)
            .await
            .is_some()
    }

    /// Save `key` to `save_path` and describe what was written.
    pub async fn download_object_response(
        &self,
        key: &str,
        save_path: &str,
        bucket: &str,
    ) -> Option<DownloadedObject> {
        let (key, save_path) = (key.trim(), save_path.trim());
        if key.is_empty() || save_path.is_empty() || !self.object_exists(key, bucket).await {
            return None;
        }
        let bucket = self.resolve_bucket(bucket);

        let body = match self.backend.get(bucket, key).await {
            Ok(body) => {
                handler_metrics::record_operation("get", true);
                body
            }
            Err(e) => {
                handler_metrics::record_operation("get", false);
                warn!("download of {}/{} failed: {}", bucket, key, e);
                return None;
            }
        };

        if let Err(e) = tokio::fs::write(save_path, &body).await {
            warn!("cannot write {}: {}", save_path, e);
            return None;
        }

        Some(DownloadedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            path: PathBuf::from(save_path),
            size: body.len() as u64,
        })
    }

    // -- URLs -----------------------------------------------------------------

    /// URL of `key` in the default bucket.
    ///
    /// With CDN rewriting on (and `ignore_cdn` false) the CDN URL is
    /// returned without checking that the object exists.  Otherwise the
    /// backend URL is returned when `force` is set or the object exists,
    /// presigned for `expire` when given, and `""` if not.
    pub async fn object_url(
        &self,
        key: &str,
        force: bool,
        ignore_cdn: bool,
        expire: Option<Duration>,
    ) -> String {
        let key = key.trim();
        if key.is_empty() {
            return String::new();
        }

        if let (Some(cdn), false) = (&self.cdn_url, ignore_cdn) {
            return format!("{cdn}/{key}");
        }

        if !force && !self.object_exists(key, "").await {
            return String::new();
        }

        match self
            .backend
            .public_url(&self.default_bucket, key, expire)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                warn!("cannot build URL for {}: {}", key, e);
                String::new()
            }
        }
    }

    /// [`Self::object_url`] with a mandatory expiry.
    pub async fn object_url_with_expire(
        &self,
        key: &str,
        expire: Duration,
        force: bool,
        ignore_cdn: bool,
    ) -> String {
        self.object_url(key, force, ignore_cdn, Some(expire)).await
    }

    /// Replace the regional S3 base URL of the default bucket in
    /// `absolute_url` with the CDN base URL.
    ///
    /// Unchanged when CDN rewriting is off; `""` for a blank input.
    pub fn rewrite_for_cdn(&self, absolute_url: &str) -> String {
        let absolute_url = absolute_url.trim();
        if absolute_url.is_empty() {
            return String::new();
        }
        match &self.cdn_url {
            Some(cdn) => absolute_url.replace(&self.s3_base_url(), cdn),
            None => absolute_url.to_string(),
        }
    }

    fn s3_base_url(&self) -> String {
        format!(
            "https://s3-{}.amazonaws.com/{}",
            self.region, self.default_bucket
        )
    }

    // -- Waiters --------------------------------------------------------------

    /// Poll until `key` exists, up to `wait.max_attempts` probes.
    async fn wait_until_exists(&self, bucket: &str, key: &str) -> bool {
        let attempts = self.wait.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.backend.exists(bucket, key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!("waiting for {}/{}: {}", bucket, key, e),
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.wait.delay_ms)).await;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::sqlite::SqliteEtagStore;
    use crate::config::{CdnConfig, ParametersConfig};
    use crate::storage::testing::InstrumentedBackend;

    struct Fixture {
        backend: Arc<InstrumentedBackend>,
        store: Arc<SqliteEtagStore>,
        handler: S3Handler,
    }

    fn test_config(cdn_url: &str, page_size: usize) -> Config {
        let mut config = Config {
            parameters: ParametersConfig {
                region: "eu-west-1".to_string(),
                default_bucket: "media".to_string(),
                ..ParametersConfig::default()
            },
            cdn: CdnConfig {
                enable: !cdn_url.is_empty(),
                url: cdn_url.to_string(),
            },
            ..Config::default()
        };
        config.storage.memory.page_size = page_size;
        config.wait.delay_ms = 0;
        config.wait.max_attempts = 2;
        config.upload.multipart_threshold = 64;
        config.upload.part_size = 16;
        config
    }

    fn fixture_with(config: Config, max_single_put: u64) -> Fixture {
        let backend = Arc::new(InstrumentedBackend::new(
            config.storage.memory.page_size,
            max_single_put,
        ));
        let store = Arc::new(SqliteEtagStore::new(":memory:").unwrap());
        let handler = S3Handler::new(&config, backend.clone(), store.clone());
        Fixture {
            backend,
            store,
            handler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config("", 1000), 1 << 20)
    }

    async fn seed(backend: &InstrumentedBackend, bucket: &str, key: &str, body: &'static [u8]) {
        backend
            .inner()
            .put(bucket, key, Bytes::from_static(body), &PutOptions::default())
            .await
            .unwrap();
    }

    // -- Fingerprints ---------------------------------------------------------

    #[tokio::test]
    async fn test_create_object_records_etag() {
        let f = fixture();
        let result = f
            .handler
            .create_object("images/a.png", Bytes::from_static(b"X"), PutOptions::default())
            .await;
        assert!(result.acknowledged);
        let expected = strip_etag_quotes(result.etag.as_deref().unwrap());

        let row = f.store.get("images/a.png").await.unwrap().unwrap();
        assert_eq!(row.etag, expected);
        assert!(row.updated_at.is_some());

        f.backend.reset_calls();
        assert_eq!(f.handler.etag_for_object("images/a.png").await, expected);
        assert_eq!(f.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_object_keeps_put_options() {
        let f = fixture();
        let mut options = PutOptions::default();
        options.content_type = Some("image/png".to_string());
        f.handler
            .create_object("a.png", Bytes::from_static(b"X"), options)
            .await;
        let meta = f.handler.head_object("a.png", "").await.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_create_object_failure_is_empty_and_uncached() {
        let f = fixture();
        f.backend.set_unavailable(true);
        let result = f
            .handler
            .create_object("a.png", Bytes::from_static(b"X"), PutOptions::default())
            .await;
        assert!(result.is_empty());
        assert!(f.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_object_rejects_blank_input() {
        let f = fixture();
        let result = f
            .handler
            .create_object("  ", Bytes::from_static(b"X"), PutOptions::default())
            .await;
        assert!(result.is_empty());
        let result = f
            .handler
            .create_object("a.png", Bytes::new(), PutOptions::default())
            .await;
        assert!(result.is_empty());
        assert_eq!(f.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_etag_for_object_miss_then_hit() {
        let f = fixture();
        seed(&f.backend, "media", "k", b"abc").await;

        let first = f.handler.etag_for_object("k").await;
        assert!(!first.is_empty());
        assert_eq!(f.backend.calls("head"), 1);

        let second = f.handler.etag_for_object("k").await;
        assert_eq!(second, first);
        assert_eq!(f.backend.calls("head"), 1);
    }

    #[tokio::test]
    async fn test_etag_for_key_never_caches() {
        let f = fixture();
        seed(&f.backend, "media", "k", b"abc").await;
        assert!(!f.handler.etag_for_key("k").await.is_empty());
        assert!(!f.handler.etag_for_key("k").await.is_empty());
        assert_eq!(f.backend.calls("head"), 2);
        assert!(f.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_etag_lookups_fail_soft() {
        let f = fixture();
        assert_eq!(f.handler.etag_for_object("missing").await, "");
        f.backend.set_unavailable(true);
        assert_eq!(f.handler.etag_for_key("missing").await, "");
        assert_eq!(f.handler.etag_for_object("missing").await, "");
    }

    // -- Copy -----------------------------------------------------------------

    #[tokio::test]
    async fn test_copy_missing_source_is_noop() {
        let f = fixture();
        let result = f.handler.copy_object("a.png", "b.png", "", "").await;
        assert!(result.is_empty());
        assert_eq!(f.backend.calls("copy"), 0);
        assert!(f.store.get("b.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_records_destination_etag() {
        let f = fixture();
        seed(&f.backend, "media", "a.png", b"pixels").await;
        let result = f.handler.copy_object("a.png", "b.png", "", "").await;
        assert!(result.acknowledged);

        let row = f.store.get("b.png").await.unwrap().unwrap();
        assert_eq!(row.etag, strip_etag_quotes(result.etag.as_deref().unwrap()));
        assert!(f.store.get("a.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_into_other_bucket_leaves_default_bucket_etag() {
        let f = fixture();
        seed(&f.backend, "media", "final.png", b"AAAA").await;
        seed(&f.backend, "uploads", "raw.png", b"BBBB").await;
        let result = f
            .handler
            .copy_object("raw.png", "final.png", "uploads", "archive")
            .await;
        assert!(result.acknowledged);
        assert!(f.handler.object_exists("final.png", "archive").await);
        assert!(f.store.get("final.png").await.unwrap().is_none());

        let media_etag = f.handler.etag_for_key("final.png").await;
        assert_eq!(f.handler.etag_for_object("final.png").await, media_etag);
        assert_ne!(
            media_etag,
            strip_etag_quotes(result.etag.as_deref().unwrap())
        );
    }

    #[tokio::test]
    async fn test_copy_into_default_bucket_records_etag() {
        let f = fixture();
        seed(&f.backend, "uploads", "raw.png", b"BBBB").await;
        let result = f
            .handler
            .copy_object("raw.png", "final.png", "uploads", "")
            .await;
        assert!(result.acknowledged);
        let row = f.store.get("final.png").await.unwrap().unwrap();
        assert_eq!(row.etag, strip_etag_quotes(result.etag.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn test_copy_gives_up_when_destination_never_appears() {
        let f = fixture();
        seed(&f.backend, "media", "a.png", b"pixels").await;
        f.backend.hide_key("b.png");
        let result = f.handler.copy_object("a.png", "b.png", "", "").await;
        assert!(result.is_empty());
        assert_eq!(f.backend.calls("copy"), 1);
        // One source probe plus `wait.max_attempts` destination probes.
        assert_eq!(f.backend.calls("exists"), 3);
        assert!(f.store.get("b.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_copy_backend_failure_is_empty() {
        let f = fixture();
        seed(&f.backend, "media", "a.png", b"pixels").await;
        f.backend.set_unavailable(true);
        assert!(f.handler.copy_object("a.png", "b.png", "", "").await.is_empty());
        assert!(f.store.get("b.png").await.unwrap().is_none());
    }

    // -- Listing --------------------------------------------------------------

    #[tokio::test]
    async fn test_listing_is_independent_of_page_size() {
        let keys: Vec<String> = (0..7).map(|i| format!("obj-{i:02}")).collect();
        for page_size in [1, 2, 3, 7, 100] {
            let f = fixture_with(test_config("", page_size), 1 << 20);
            for key in &keys {
                f.backend
                    .inner()
                    .put("media", key, Bytes::from_static(b"x"), &PutOptions::default())
                    .await
                    .unwrap();
            }
            let listed: Vec<String> = f
                .handler
                .list_objects_in_bucket("", "")
                .await
                .into_iter()
                .map(|o| o.key)
                .collect();
            assert_eq!(listed, keys, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn test_listing_strips_quotes_and_filters_prefix() {
        let f = fixture();
        seed(&f.backend, "media", "images/a.png", b"a").await;
        seed(&f.backend, "media", "images/b.png", b"bb").await;
        seed(&f.backend, "media", "docs/c.txt", b"c").await;

        let listed = f.handler.list_objects_in_bucket("media", " images/ ").await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].key, "images/b.png");
        assert_eq!(listed[1].size, 2);
        assert!(listed.iter().all(|o| !o.etag.contains('"')));
        assert!(listed.iter().all(|o| o.last_modified.is_some()));
    }

    #[tokio::test]
    async fn test_listing_keeps_entries_before_failing_page() {
        let f = fixture_with(test_config("", 2), 1 << 20);
        for key in ["a", "b", "c", "d", "e"] {
            seed(&f.backend, "media", key, b"x").await;
        }
        f.backend.fail_list_page_after(2);
        let listed: Vec<String> = f
            .handler
            .list_objects_in_bucket("", "")
            .await
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, ["a", "b", "c", "d"]);
        assert_eq!(f.backend.calls("list_page"), 3);
    }

    #[tokio::test]
    async fn test_listing_failure_returns_empty() {
        let f = fixture();
        seed(&f.backend, "media", "a", b"a").await;
        f.backend.set_unavailable(true);
        assert!(f.handler.list_objects_in_bucket("", "").await.is_empty());
    }

    // -- Reads and deletes ----------------------------------------------------

    #[tokio::test]
    async fn test_exists_and_head() {
        let f = fixture();
        seed(&f.backend, "media", "a.txt", b"abc").await;
        assert!(f.handler.object_exists(" a.txt ", "").await);
        assert!(!f.handler.object_exists("b.txt", "").await);
        assert!(!f.handler.object_exists("", "").await);
        assert_eq!(f.handler.head_object("a.txt", "media").await.unwrap().size, 3);
        assert!(f.handler.head_object("b.txt", "").await.is_none());
    }

    #[tokio::test]
    async fn test_get_object_content() {
        let f = fixture();
        seed(&f.backend, "media", "a.txt", b"abc").await;
        assert_eq!(&f.handler.get_object_content("a.txt", "").await[..], b"abc");
        assert!(f.handler.get_object_content("nope", "").await.is_empty());
        f.backend.set_unavailable(true);
        assert!(f.handler.get_object_content("a.txt", "").await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_cache_row() {
        let f = fixture();
        f.handler
            .create_object("a.png", Bytes::from_static(b"X"), PutOptions::default())
            .await;
        let result = f.handler.delete_object("a.png", "").await.unwrap();
        assert!(result.acknowledged);
        assert!(!f.handler.object_exists("a.png", "").await);
        assert!(f.store.get("a.png").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_sentinels() {
        let f = fixture();
        assert!(f.handler.delete_object("  ", "").await.is_none());
        f.backend.set_unavailable(true);
        assert!(f.handler.delete_object("a.png", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_object() {
        let f = fixture();
        seed(&f.backend, "media", "a.txt", b"abc").await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let path_str = path.to_str().unwrap();

        let downloaded = f
            .handler
            .download_object_response("a.txt", path_str, "")
            .await
            .unwrap();
        assert_eq!(downloaded.size, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");

        assert!(!f.handler.download_object("nope", path_str, "").await);
        assert!(!f.handler.download_object("a.txt", " ", "").await);
    }

    #[tokio::test]
    async fn test_upload_file() {
        let f = fixture();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.bin");
        std::fs::write(&path, vec![7u8; 100]).unwrap();

        let file = LocalFile {
            local_path: path,
            remote_path: "remote/local.bin".to_string(),
        };
        let result = f.handler.upload_file(&file).await;
        assert!(result.acknowledged);
        // 100 bytes over a 64-byte threshold with 16-byte parts.
        assert_eq!(f.backend.calls("upload_part"), 7);

        let missing = LocalFile {
            local_path: dir.path().join("missing.bin"),
            remote_path: "remote/missing.bin".to_string(),
        };
        assert!(f.handler.upload_file(&missing).await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_object_acl_override() {
        let f = fixture();
        let options = PutOptions {
            acl: Some("private".to_string()),
            ..PutOptions::default()
        };
        let result = f
            .handler
            .upload_object("a.txt", Bytes::from_static(b"abc"), DEFAULT_ACL, options)
            .await;
        assert!(result.acknowledged);
        // upload_object alone never touches the cache.
        assert!(f.store.list().await.unwrap().is_empty());
    }

    // -- URLs -----------------------------------------------------------------

    #[tokio::test]
    async fn test_cdn_url_ignores_existence() {
        let f = fixture_with(test_config("https://cdn.example.com/", 1000), 1 << 20);
        assert_eq!(
            f.handler.object_url("ghost.png", false, false, None).await,
            "https://cdn.example.com/ghost.png"
        );
        assert_eq!(f.backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cdn_can_be_ignored() {
        let f = fixture_with(test_config("https://cdn.example.com", 1000), 1 << 20);
        seed(&f.backend, "media", "a.png", b"x").await;
        assert_eq!(
            f.handler.object_url("a.png", false, true, None).await,
            "memory://media/a.png"
        );
    }

    #[tokio::test]
    async fn test_object_url_without_cdn() {
        let f = fixture();
        seed(&f.backend, "media", "a.png", b"x").await;
        assert_eq!(
            f.handler.object_url("a.png", false, false, None).await,
            "memory://media/a.png"
        );
        assert_eq!(f.handler.object_url("ghost.png", false, false, None).await, "");
        assert_eq!(
            f.handler.object_url("ghost.png", true, false, None).await,
            "memory://media/ghost.png"
        );
        assert_eq!(
            f.handler
                .object_url_with_expire("a.png", Duration::from_secs(600), false, false)
                .await,
            "memory://media/a.png?expires=600"
        );
        assert_eq!(f.handler.object_url(" ", true, false, None).await, "");
    }

    #[test]
    fn test_rewrite_for_cdn() {
        let f = fixture_with(test_config("https://cdn.example.com/", 1000), 1 << 20);
        assert_eq!(
            f.handler.rewrite_for_cdn(
                "https://s3-eu-west-1.amazonaws.com/media/cache/thumb/images/a.png"
            ),
            "https://cdn.example.com/cache/thumb/images/a.png"
        );
        assert_eq!(f.handler.rewrite_for_cdn(""), "");

        let plain = fixture();
        let url = "https://s3-eu-west-1.amazonaws.com/media/a.png";
        assert_eq!(plain.handler.rewrite_for_cdn(url), url);
    }
}
