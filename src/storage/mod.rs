//! Object storage backends.
//!
//! The [`backend::StorageBackend`] trait abstracts over where objects
//! physically live.  [`aws::AwsBackend`] talks to S3 (or an S3-compatible
//! endpoint); [`memory::MemoryBackend`] keeps everything in process.

pub mod aws;
pub mod backend;
pub mod memory;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::Config;
use backend::StorageBackend;

/// Build the storage backend selected by `storage.backend`.
pub async fn from_config(config: &Config) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.storage.backend.as_str() {
        "memory" => Arc::new(memory::MemoryBackend::new(
            config.storage.memory.page_size,
            config.storage.memory.max_single_put_bytes,
        )),
        "aws" => Arc::new(aws::AwsBackend::new(&config.parameters).await?),
        other => anyhow::bail!("unknown storage backend '{other}' (expected 'aws' or 'memory')"),
    };
    Ok(backend)
}
