//! Local ETag cache.
//!
//! [`store::EtagStore`] persists object key → ETag rows;
//! [`sqlite::SqliteEtagStore`] is the default implementation.
//! [`metadata::MetadataCache`] puts the read-through / write-through
//! policy on top of a store and a storage backend.

pub mod export;
pub mod memory;
pub mod metadata;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use crate::config::CacheConfig;
use store::EtagStore;

/// Open the ETag store selected by `cache.engine`.
pub fn from_config(config: &CacheConfig) -> anyhow::Result<Arc<dyn EtagStore>> {
    let store: Arc<dyn EtagStore> = match config.engine.as_str() {
        "memory" => Arc::new(memory::MemoryEtagStore::new()),
        "sqlite" => {
            let path = &config.sqlite.path;
            if path != ":memory:" {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Arc::new(sqlite::SqliteEtagStore::new(path)?)
        }
        other => anyhow::bail!("unknown cache engine '{other}' (expected 'sqlite' or 'memory')"),
    };
    Ok(store)
}
