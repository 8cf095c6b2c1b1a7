//! s3handler library: a fail-soft S3 object façade with a persistent ETag
//! cache.
//!
//! [`S3Handler`] wraps a pluggable [`storage::backend::StorageBackend`]
//! (the AWS SDK gateway or an in-memory store) and mirrors the ETag of
//! every object it writes into an [`cache::store::EtagStore`] so that
//! later fingerprint lookups avoid a round trip to S3.

pub mod cache;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod storage;
pub mod upload;

pub use handler::{DownloadedObject, ListedObject, LocalFile, S3File, S3Handler, DEFAULT_ACL};
