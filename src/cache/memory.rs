//! In-memory ETag store.
//!
//! No persistence.  Useful for tests and ephemeral deployments.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{CachedObjectMetadata, EtagStore};

#[derive(Debug, Default)]
pub struct MemoryEtagStore {
    rows: RwLock<BTreeMap<String, CachedObjectMetadata>>,
}

impl MemoryEtagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EtagStore for MemoryEtagStore {
    fn get(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<CachedObjectMetadata>>> + Send + '_>>
    {
        let key = key.to_string();
        Box::pin(async move {
            let rows = self
                .rows
                .read()
                .map_err(|_| anyhow::anyhow!("rwlock poisoned"))?;
            Ok(rows.get(&key).cloned())
        })
    }

    fn upsert(
        &self,
        key: &str,
        etag: &str,
        updated_at: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let record = CachedObjectMetadata {
            key: key.to_string(),
            etag: etag.to_string(),
            updated_at,
        };
        Box::pin(async move {
            let mut rows = self
                .rows
                .write()
                .map_err(|_| anyhow::anyhow!("rwlock poisoned"))?;
            rows.insert(record.key.clone(), record);
            Ok(())
        })
    }

    fn list(
        &self,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<CachedObjectMetadata>>> + Send + '_>> {
        Box::pin(async move {
            let rows = self
                .rows
                .read()
                .map_err(|_| anyhow::anyhow!("rwlock poisoned"))?;
            Ok(rows.values().cloned().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = MemoryEtagStore::new();
        store.upsert("k", "e1", None).await.unwrap();
        store.upsert("k", "e2", Some(Utc::now())).await.unwrap();

        let rows = store.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].etag, "e2");
        assert!(rows[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryEtagStore::new();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
