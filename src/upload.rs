//! Object uploader with multipart fallback.
//!
//! Small bodies go out as a single put.  Bodies at or above the configured
//! threshold, or any body the backend rejects with
//! [`StorageError::EntityTooLarge`], are sent as a multipart upload.  A
//! multipart session that fails part-way reports its [`UploadState`], and
//! the next attempt resumes from it, skipping parts already accepted.
//! Failing to open the session at all is returned as-is.

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use crate::config::UploadConfig;
use crate::errors::{StorageError, StorageResult};
use crate::metrics::MULTIPART_RESUMES_TOTAL;
use crate::storage::backend::{CompletedPart, ObjectResult, PutOptions, StorageBackend};

/// S3 rejects multipart uploads with more parts than this.
const MAX_PARTS: u64 = 10_000;

/// Progress of a multipart upload, enough to resume it.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadState {
    pub bucket: String,
    pub key: String,
    /// Backend upload id, once the session exists.
    pub upload_id: Option<String>,
    pub part_size: u64,
    /// Parts the backend has accepted so far.
    pub completed: Vec<CompletedPart>,
}

impl UploadState {
    pub fn new(bucket: &str, key: &str, part_size: u64) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: None,
            part_size: part_size.max(1),
            completed: Vec::new(),
        }
    }

    fn has_part(&self, part_number: i32) -> bool {
        self.completed.iter().any(|p| p.part_number == part_number)
    }

    fn interrupted(self, source: StorageError) -> StorageError {
        StorageError::MultipartInterrupted {
            state: self,
            source: Box::new(source),
        }
    }
}

enum Attempt {
    SingleShot,
    Multipart(UploadState),
}

/// Uploads one body to one key.
pub struct Uploader<'a> {
    backend: &'a dyn StorageBackend,
    config: &'a UploadConfig,
}

impl<'a> Uploader<'a> {
    pub fn new(backend: &'a dyn StorageBackend, config: &'a UploadConfig) -> Self {
        Self { backend, config }
    }

    /// Part size for a body of `len` bytes, grown so the upload stays
    /// within [`MAX_PARTS`].
    fn part_size_for(&self, len: u64) -> u64 {
        let min_for_len = len.div_ceil(MAX_PARTS);
        self.config.part_size.max(min_for_len).max(1)
    }

    /// Upload `data` to `bucket`/`key`, retrying through multipart until a
    /// result is obtained or `max_attempts` is spent.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> StorageResult<ObjectResult> {
        if data.is_empty() {
            return Err(StorageError::InvalidInput("empty upload body".to_string()));
        }

        let len = data.len() as u64;
        let fresh_state = || UploadState::new(bucket, key, self.part_size_for(len));
        let mut attempt = if len >= self.config.multipart_threshold {
            Attempt::Multipart(fresh_state())
        } else {
            Attempt::SingleShot
        };
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = match attempt {
                Attempt::SingleShot => self.backend.put(bucket, key, data.clone(), options).await,
                Attempt::Multipart(state) => self.multipart(state, &data, options).await,
            };

            let err = match result {
                Ok(res) => return Ok(res),
                Err(err) => err,
            };

            let resume = match err {
                StorageError::EntityTooLarge => {
                    debug!("single-shot put rejected for {}/{}, switching to multipart", bucket, key);
                    fresh_state()
                }
                StorageError::MultipartInterrupted { ref state, .. } => state.clone(),
                other => return Err(other),
            };

            if attempts >= max_attempts {
                warn!(
                    "upload of {}/{} gave up after {} attempts ({}): {}",
                    bucket,
                    key,
                    attempts,
                    err.kind(),
                    err
                );
                self.abort(&resume).await;
                return Err(err);
            }

            if resume.upload_id.is_some() {
                counter!(MULTIPART_RESUMES_TOTAL).increment(1);
                warn!(
                    "resuming multipart upload of {}/{} ({} parts done): {}",
                    bucket,
                    key,
                    resume.completed.len(),
                    err
                );
            }
            attempt = Attempt::Multipart(resume);
        }
    }

    async fn multipart(
        &self,
        mut state: UploadState,
        data: &Bytes,
        options: &PutOptions,
    ) -> StorageResult<ObjectResult> {
        let upload_id = match state.upload_id.clone() {
            Some(id) => id,
            None => match self
                .backend
                .create_multipart(&state.bucket, &state.key, options)
                .await
            {
                Ok(id) => {
                    state.upload_id = Some(id.clone());
                    id
                }
                // No session yet, so nothing to resume.
                Err(e) => return Err(e),
            },
        };

        let part_size = state.part_size.max(1) as usize;
        for (idx, start) in (0..data.len()).step_by(part_size).enumerate() {
            let part_number = idx as i32 + 1;
            if state.has_part(part_number) {
                continue;
            }
            let end = (start + part_size).min(data.len());
            let uploaded = self
                .backend
                .upload_part(
                    &state.bucket,
                    &state.key,
                    &upload_id,
                    part_number,
                    data.slice(start..end),
                )
                .await;
            match uploaded {
                Ok(etag) => state.completed.push(CompletedPart { part_number, etag }),
                Err(e) => return Err(state.interrupted(e)),
            }
        }

        state.completed.sort_by_key(|p| p.part_number);
        let completed = self
            .backend
            .complete_multipart(&state.bucket, &state.key, &upload_id, &state.completed)
            .await;
        completed.map_err(|e| state.interrupted(e))
    }

    async fn abort(&self, state: &UploadState) {
        let Some(upload_id) = &state.upload_id else {
            return;
        };
        if let Err(e) = self
            .backend
            .abort_multipart(&state.bucket, &state.key, upload_id)
            .await
        {
            warn!("failed to abort multipart upload {}: {}", upload_id, e);
        }
    }
}
