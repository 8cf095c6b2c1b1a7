//! Test double wrapping [`MemoryBackend`] with call counting and fault
//! injection.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::backend::{
    BackendFuture, CompletedPart, ListPage, ObjectMetadata, ObjectResult, PutOptions,
    StorageBackend,
};
use super::memory::MemoryBackend;
use crate::errors::{StorageError, StorageResult};

pub(crate) struct InstrumentedBackend {
    inner: MemoryBackend,
    calls: Mutex<HashMap<&'static str, usize>>,
    unavailable: AtomicBool,
    /// part_number -> remaining injected failures
    failing_parts: Mutex<HashMap<i32, usize>>,
    /// `list_page` calls allowed before every further call fails.
    list_pages_allowed: Mutex<Option<usize>>,
    /// Keys `exists` always reports as absent.
    hidden_keys: Mutex<HashSet<String>>,
}

impl InstrumentedBackend {
    pub(crate) fn new(page_size: usize, max_single_put_bytes: u64) -> Self {
        Self {
            inner: MemoryBackend::new(page_size, max_single_put_bytes),
            calls: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            failing_parts: Mutex::new(HashMap::new()),
            list_pages_allowed: Mutex::new(None),
            hidden_keys: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Every call fails with `BackendUnavailable` while set.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next upload of `part_number` fails.  Stacks when called again.
    pub(crate) fn fail_part_once(&self, part_number: i32) {
        *self
            .failing_parts
            .lock()
            .unwrap()
            .entry(part_number)
            .or_insert(0) += 1;
    }

    /// `list_page` succeeds `pages` times, then fails.
    pub(crate) fn fail_list_page_after(&self, pages: usize) {
        *self.list_pages_allowed.lock().unwrap() = Some(pages);
    }

    /// `exists` reports `key` as absent in every bucket.
    pub(crate) fn hide_key(&self, key: &str) {
        self.hidden_keys.lock().unwrap().insert(key.to_string());
    }

    fn record(&self, op: &'static str) -> StorageResult<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::BackendUnavailable(format!(
                "injected failure on {op}"
            )));
        }
        Ok(())
    }

    fn take_part_failure(&self, part_number: i32) -> bool {
        let mut failing = self.failing_parts.lock().unwrap();
        match failing.get_mut(&part_number) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl StorageBackend for InstrumentedBackend {
    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            self.record("exists")?;
            if self.hidden_keys.lock().unwrap().contains(key) {
                return Ok(false);
            }
            self.inner.exists(bucket, key).await
        })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            self.record("head")?;
            self.inner.head(bucket, key).await
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Bytes> {
        Box::pin(async move {
            self.record("get")?;
            self.inner.get(bucket, key).await
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
            self.record("put")?;
            self.inner.put(bucket, key, data, options).await
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
            self.record("copy")?;
            self.inner.copy(src_bucket, src_key, dst_bucket, dst_key).await
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            self.record("delete")?;
            self.inner.delete(bucket, key).await
        })
    }

    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
        marker: Option<&'a str>,
    ) -> BackendFuture<'a, ListPage> {
        Box::pin(async move {
            self.record("list_page")?;
            {
                let mut allowed = self.list_pages_allowed.lock().unwrap();
                if let Some(remaining) = allowed.as_mut() {
                    if *remaining == 0 {
                        return Err(StorageError::BackendUnavailable(
                            "injected failure on list_page".to_string(),
                        ));
                    }
                    *remaining -= 1;
                }
            }
            self.inner.list_page(bucket, prefix, marker).await
        })
    }

    fn public_url<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        expires_in: Option<Duration>,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.record("public_url")?;
            self.inner.public_url(bucket, key, expires_in).await
        })
    }

    fn create_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.record("create_multipart")?;
            self.inner.create_multipart(bucket, key, options).await
        })
    }

    fn upload_part<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: i32,
        data: Bytes,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.record("upload_part")?;
            if self.take_part_failure(part_number) {
                return Err(StorageError::BackendUnavailable(format!(
                    "injected failure on part {part_number}"
                )));
            }
            self.inner
                .upload_part(bucket, key, upload_id, part_number, data)
                .await
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
            self.record("complete_multipart")?;
            self.inner
                .complete_multipart(bucket, key, upload_id, parts)
                .await
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.record("abort_multipart")?;
            self.inner.abort_multipart(bucket, key, upload_id).await
        })
    }
}
