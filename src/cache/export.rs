//! ETag cache serialization: export/import between a store and JSON.
//!
//! The document is an envelope plus one array of rows:
//!
//! ```json
//! {
//!   "s3handler_export": { "exported_at": "...", "source": "rust/0.1.0", "version": 1 },
//!   "objects": [ { "key": "images/a.png", "etag": "...", "updated_at": "..." } ]
//! }
//! ```
//!
//! Import upserts every row, so re-importing the same document is a no-op.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::store::{format_timestamp, parse_timestamp, CachedObjectMetadata, EtagStore};

pub const EXPORT_VERSION: i64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    exported_at: String,
    source: String,
    version: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportedRow {
    key: String,
    etag: String,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportDocument {
    s3handler_export: Envelope,
    #[serde(default)]
    objects: Vec<ExportedRow>,
}

/// Outcome of [`import_etags`].
#[derive(Debug, Default)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl From<CachedObjectMetadata> for ExportedRow {
    fn from(row: CachedObjectMetadata) -> Self {
        Self {
            key: row.key,
            etag: row.etag,
            updated_at: row.updated_at.as_ref().map(format_timestamp),
        }
    }
}

/// Serialize every row of `store` as a pretty-printed JSON document.
pub async fn export_etags(store: &dyn EtagStore) -> anyhow::Result<String> {
    let rows = store.list().await?;
    let doc = ExportDocument {
        s3handler_export: Envelope {
            exported_at: format_timestamp(&Utc::now()),
            source: format!("rust/{}", env!("CARGO_PKG_VERSION")),
            version: EXPORT_VERSION,
        },
        objects: rows.into_iter().map(ExportedRow::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Upsert every row of a JSON document produced by [`export_etags`].
pub async fn import_etags(store: &dyn EtagStore, json: &str) -> anyhow::Result<ImportResult> {
    let doc: ExportDocument = serde_json::from_str(json)?;
    let version = doc.s3handler_export.version;
    if !(1..=EXPORT_VERSION).contains(&version) {
        anyhow::bail!("unsupported export version: {}", version);
    }

    let mut result = ImportResult::default();
    for row in doc.objects {
        let key = row.key.trim();
        if key.is_empty() {
            result.skipped += 1;
            result.warnings.push("Skipped row with empty key".to_string());
            continue;
        }

        let updated_at = match row.updated_at.as_deref() {
            None => None,
            Some(raw) => match parse_timestamp(raw) {
                Some(ts) => Some(ts),
                None => {
                    result
                        .warnings
                        .push(format!("Row '{}': unparseable updated_at '{}'", key, raw));
                    None
                }
            },
        };

        store.upsert(key, &row.etag, updated_at).await?;
        result.imported += 1;
    }
    Ok(result)
}
