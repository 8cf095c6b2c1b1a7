//! AWS S3 storage backend.
//!
//! Forwards every operation to S3 (or an S3-compatible endpoint) through
//! the official SDK.  Buckets are addressed directly; no key prefixing.
//!
//! Credentials come from `parameters.access`/`parameters.secret` when both
//! are set, otherwise from the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.).

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{
    encode_key, BackendFuture, CompletedPart, ListEntry, ListPage, ObjectMetadata, ObjectResult,
    PutOptions, StorageBackend,
};
use crate::config::ParametersConfig;
use crate::errors::StorageError;

/// Backend that talks to S3.
pub struct AwsBackend {
    /// AWS S3 SDK client.
    client: Client,
    /// Region used to build plain object URLs.
    region: String,
    /// Custom endpoint, empty for AWS itself.
    endpoint_url: String,
    /// Path-style addressing for plain object URLs.
    use_path_style: bool,
}

impl AwsBackend {
    /// Create a new S3 backend from the connection parameters.
    pub async fn new(params: &ParametersConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if !params.region.is_empty() {
            config_loader = config_loader.region(aws_config::Region::new(params.region.clone()));
        }

        if !params.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&params.endpoint_url);
        }

        // Explicit credentials win over the default chain.
        if !params.access.is_empty() && !params.secret.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &params.access,
                &params.secret,
                None, // session_token
                None, // expiry
                "s3handler-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(params.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| params.region.clone());

        info!(
            "AWS backend initialized: region={} endpoint='{}' path_style={}",
            region, params.endpoint_url, params.use_path_style
        );

        Ok(Self {
            client,
            region,
            endpoint_url: params.endpoint_url.trim_end_matches('/').to_string(),
            use_path_style: params.use_path_style,
        })
    }

    /// Unsigned URL of an object.
    fn plain_url(&self, bucket: &str, key: &str) -> String {
        object_url(
            &self.endpoint_url,
            &self.region,
            self.use_path_style,
            bucket,
            key,
        )
    }

    /// Map an AWS SDK error to a [`StorageError`] with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::BackendUnavailable(format!("AWS S3 {context}: {err}"))
    }

    fn to_chrono(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
        dt.and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
    }
}

/// Build the unsigned URL of `bucket`/`key`.
///
/// A custom endpoint always uses path-style addressing.
pub fn object_url(
    endpoint_url: &str,
    region: &str,
    use_path_style: bool,
    bucket: &str,
    key: &str,
) -> String {
    let key = encode_key(key);
    if !endpoint_url.is_empty() {
        format!("{endpoint_url}/{bucket}/{key}")
    } else if use_path_style {
        format!("https://s3.{region}.amazonaws.com/{bucket}/{key}")
    } else {
        format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
    }
}

impl StorageBackend for AwsBackend {
    fn exists<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            debug!("AWS head_object (exists): bucket={} key={}", bucket, key);

            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn head<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectMetadata> {
        Box::pin(async move {
            debug!("AWS head_object: bucket={} key={}", bucket, key);

            let resp = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        StorageError::not_found(bucket, key)
                    } else {
                        Self::map_sdk_error("head_object", service_err)
                    }
                })?;

            Ok(ObjectMetadata {
                etag: resp.e_tag().unwrap_or("").to_string(),
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: Self::to_chrono(resp.last_modified()),
                content_type: resp.content_type().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
                user_metadata: resp.metadata().cloned().unwrap_or_default(),
            })
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Bytes> {
        Box::pin(async move {
            debug!("AWS get_object: bucket={} key={}", bucket, key);

            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        StorageError::not_found(bucket, key)
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();

            Ok(body)
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
            debug!(
                "AWS put_object: bucket={} key={} size={}",
                bucket,
                key,
                data.len()
            );

            let metadata = (!options.metadata.is_empty()).then(|| options.metadata.clone());
            let resp = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(data))
                .set_acl(options.acl.as_deref().map(ObjectCannedAcl::from))
                .set_content_type(options.content_type.clone())
                .set_cache_control(options.cache_control.clone())
                .set_metadata(metadata)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.meta().code() == Some("EntityTooLarge") {
                        StorageError::EntityTooLarge
                    } else {
                        Self::map_sdk_error("put_object", service_err)
                    }
                })?;

            Ok(ObjectResult {
                acknowledged: true,
                etag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
                location: Some(self.plain_url(bucket, key)),
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
            debug!(
                "AWS copy_object: src={}/{} dst={}/{}",
                src_bucket, src_key, dst_bucket, dst_key
            );

            // CopySource must be URL-encoded.
            let copy_source = format!("{src_bucket}/{}", encode_key(src_key));
            let resp = self
                .client
                .copy_object()
                .bucket(dst_bucket)
                .key(dst_key)
                .copy_source(&copy_source)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("copy_object", e.into_service_error()))?;

            Ok(ObjectResult {
                acknowledged: true,
                etag: resp
                    .copy_object_result()
                    .and_then(|r| r.e_tag())
                    .map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
                location: Some(self.plain_url(dst_bucket, dst_key)),
            })
        })
    }

    fn delete<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectResult> {
        Box::pin(async move {
            debug!("AWS delete_object: bucket={} key={}", bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            let resp = self
                .client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(ObjectResult {
                acknowledged: true,
                etag: None,
                version_id: resp.version_id().map(str::to_string),
                location: None,
            })
        })
    }

    fn list_page<'a>(
        &'a self,
        bucket: &'a str,
        prefix: Option<&'a str>,
        marker: Option<&'a str>,
    ) -> BackendFuture<'a, ListPage> {
        Box::pin(async move {
            debug!(
                "AWS list_objects: bucket={} prefix={:?} marker={:?}",
                bucket, prefix, marker
            );

            let resp = self
                .client
                .list_objects()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_string))
                .set_marker(marker.map(str::to_string))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("list_objects", e))?;

            let entries = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ListEntry {
                        key: key.to_string(),
                        etag: obj.e_tag().unwrap_or("").to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: Self::to_chrono(obj.last_modified()),
                    })
                })
                .collect();

            Ok(ListPage {
                entries,
                is_truncated: resp.is_truncated() == Some(true),
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
            let Some(ttl) = expires_in else {
                return Ok(self.plain_url(bucket, key));
            };

            let presigning = PresigningConfig::expires_in(ttl)
                .map_err(|e| StorageError::InvalidInput(format!("presigning config: {e}")))?;
            let request = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| Self::map_sdk_error("presign get_object", e))?;

            Ok(request.uri().to_string())
        })
    }

    fn create_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        options: &'a PutOptions,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            debug!("AWS create_multipart_upload: bucket={} key={}", bucket, key);

            let metadata = (!options.metadata.is_empty()).then(|| options.metadata.clone());
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .set_acl(options.acl.as_deref().map(ObjectCannedAcl::from))
                .set_content_type(options.content_type.clone())
                .set_cache_control(options.cache_control.clone())
                .set_metadata(metadata)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("create_multipart_upload", e))?;

            resp.upload_id()
                .map(str::to_string)
                .ok_or_else(|| Self::map_sdk_error("create_multipart_upload", "no upload id"))
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
            debug!(
                "AWS upload_part: bucket={} key={} upload={} part={}",
                bucket, key, upload_id, part_number
            );

            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e))?;

            Ok(resp.e_tag().unwrap_or("").to_string())
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
            debug!(
                "AWS complete_multipart_upload: bucket={} key={} upload={} parts={}",
                bucket,
                key,
                upload_id,
                parts.len()
            );

            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(
                    parts
                        .iter()
                        .map(|p| {
                            aws_sdk_s3::types::CompletedPart::builder()
                                .e_tag(&p.etag)
                                .part_number(p.part_number)
                                .build()
                        })
                        .collect(),
                ))
                .build();

            let resp = self
                .client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("complete_multipart_upload", e))?;

            Ok(ObjectResult {
                acknowledged: true,
                etag: resp.e_tag().map(str::to_string),
                version_id: resp.version_id().map(str::to_string),
                location: resp
                    .location()
                    .map(str::to_string)
                    .or_else(|| Some(self.plain_url(bucket, key))),
            })
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            debug!(
                "AWS abort_multipart_upload: bucket={} key={} upload={}",
                bucket, key, upload_id
            );

            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("abort_multipart_upload", e))?;
            Ok(())
        })
    }
}
