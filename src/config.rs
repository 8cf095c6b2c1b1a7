//! Configuration loading and types for s3handler.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: S3 credentials and default bucket, CDN rewriting, the local
//! ETag cache, the storage backend, uploads, waiters, and logging.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// S3 credentials, region, and default bucket.
    #[serde(default)]
    pub parameters: ParametersConfig,

    /// CDN URL rewriting.
    #[serde(default)]
    pub cdn: CdnConfig,

    /// Local ETag cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload tuning (multipart threshold, part size, resume attempts).
    #[serde(default)]
    pub upload: UploadConfig,

    /// Polling settings used while waiting for a copied object to appear.
    #[serde(default)]
    pub wait: WaitConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// S3 connection parameters.
///
/// Empty `access`/`secret` fall back to the standard AWS credential chain.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParametersConfig {
    /// Access key id.
    #[serde(default, alias = "access_key_id")]
    pub access: String,

    /// Secret access key.
    #[serde(default, alias = "secret_access_key")]
    pub secret: String,

    /// AWS region (e.g. `eu-west-1`).
    #[serde(default)]
    pub region: String,

    /// Bucket used whenever a caller passes an empty bucket name.
    #[serde(default)]
    pub default_bucket: String,

    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,

    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
}

/// CDN settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CdnConfig {
    /// Whether object URLs are served from the CDN.
    #[serde(default)]
    pub enable: bool,

    /// CDN base URL.  Leading and trailing `/` are ignored.
    #[serde(default)]
    pub url: String,
}

impl CdnConfig {
    /// The CDN base URL with surrounding slashes trimmed.
    pub fn base_url(&self) -> &str {
        self.url.trim_matches('/')
    }

    /// CDN rewriting applies only when enabled *and* a base URL is set.
    pub fn is_enabled(&self) -> bool {
        self.enable && !self.base_url().is_empty()
    }
}

/// ETag cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Store engine: `sqlite` or `memory`.
    #[serde(default = "default_cache_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            engine: default_cache_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `aws` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Memory backend configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            memory: MemoryStorageConfig::default(),
        }
    }
}

/// In-memory backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum entries returned per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Largest body accepted by a single-shot put.
    #[serde(default = "default_max_single_put")]
    pub max_single_put_bytes: u64,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_single_put_bytes: default_max_single_put(),
        }
    }
}

/// Upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Bodies at or above this size are sent as multipart uploads.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Size of each multipart part (S3 minimum is 5 MiB except the last).
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Attempts (initial + resumes) before an upload is given up.
    #[serde(default = "default_upload_attempts")]
    pub max_attempts: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            max_attempts: default_upload_attempts(),
        }
    }
}

/// Waiter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
    /// Number of existence probes.
    #[serde(default = "default_wait_attempts")]
    pub max_attempts: u32,

    /// Delay between probes, in milliseconds.
    #[serde(default = "default_wait_delay_ms")]
    pub delay_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_wait_attempts(),
            delay_ms: default_wait_delay_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_cache_engine() -> String {
    "sqlite".to_string()
}

fn default_cache_path() -> String {
    "./data/s3_objects.db".to_string()
}

fn default_storage_backend() -> String {
    "aws".to_string()
}

fn default_page_size() -> usize {
    1000
}

fn default_max_single_put() -> u64 {
    5_368_709_120 // 5 GiB
}

fn default_multipart_threshold() -> u64 {
    16_777_216 // 16 MiB
}

fn default_part_size() -> u64 {
    5_242_880 // 5 MiB
}

fn default_upload_attempts() -> u32 {
    5
}

fn default_wait_attempts() -> u32 {
    20
}

fn default_wait_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_config(&contents)
}

/// Parse configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
}
