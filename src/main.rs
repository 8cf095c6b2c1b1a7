//! s3handler -- command-line front end for the S3 object façade.
//!
//! Every subcommand maps to one [`S3Handler`] operation.  The handler never
//! fails; empty results exit with status 1.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::info;

use s3handler::config::{Config, LoggingConfig};
use s3handler::storage::backend::PutOptions;
use s3handler::S3Handler;

/// Command-line arguments for s3handler.
#[derive(Parser, Debug)]
#[command(name = "s3handler", version, about = "S3 object façade with a local ETag cache")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3handler.yaml")]
    config: String,

    /// Print Prometheus metrics to stderr after the command.
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether an object exists
    Exists {
        key: String,
        #[arg(long, default_value = "")]
        bucket: String,
    },
    /// Print object metadata
    Head {
        key: String,
        #[arg(long, default_value = "")]
        bucket: String,
    },
    /// Write an object's body to stdout
    Get {
        key: String,
        #[arg(long, default_value = "")]
        bucket: String,
    },
    /// Upload a local file (public-read) and cache its ETag
    Put {
        key: String,
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
    },
    /// Server-side copy
    Copy {
        source: String,
        dest: String,
        #[arg(long, default_value = "")]
        source_bucket: String,
        #[arg(long, default_value = "")]
        dest_bucket: String,
    },
    /// Delete an object
    Delete {
        key: String,
        #[arg(long, default_value = "")]
        bucket: String,
    },
    /// List objects under a prefix
    List {
        #[arg(long, default_value = "")]
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Print an object URL
    Url {
        key: String,
        /// Skip the existence check.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Return the backend URL even when CDN rewriting is enabled.
        /// Older releases accepted this flag but always used the CDN.
        #[arg(long, default_value_t = false)]
        ignore_cdn: bool,
        /// Presign for this many seconds.
        #[arg(long)]
        expire: Option<u64>,
    },
    /// Print an object's ETag
    Etag {
        key: String,
        /// Ask the backend directly instead of the cache.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
    /// Save an object to a local path
    Download {
        key: String,
        path: String,
        #[arg(long, default_value = "")]
        bucket: String,
    },
    /// Rewrite an S3 URL to its CDN form
    CdnRewrite { url: String },
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config: Config = s3handler::config::load_config(&cli.config)?;
    init_logging(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    if cli.metrics {
        s3handler::metrics::init_metrics()?;
        s3handler::metrics::describe_metrics();
    }

    let handler = S3Handler::from_config(&config).await?;
    let ok = run(&handler, cli.command).await?;

    if let Some(text) = s3handler::metrics::render() {
        eprintln!("{}", text);
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn run(handler: &S3Handler, command: Command) -> anyhow::Result<bool> {
    let ok = match command {
        Command::Exists { key, bucket } => {
            let exists = handler.object_exists(&key, &bucket).await;
            println!("{}", exists);
            exists
        }
        Command::Head { key, bucket } => match handler.head_object(&key, &bucket).await {
            Some(meta) => {
                println!("etag\t{}", meta.etag);
                println!("size\t{}", meta.size);
                if let Some(ts) = meta.last_modified {
                    println!("last_modified\t{}", ts.to_rfc3339());
                }
                if let Some(ct) = meta.content_type {
                    println!("content_type\t{}", ct);
                }
                if let Some(v) = meta.version_id {
                    println!("version_id\t{}", v);
                }
                let mut user: Vec<_> = meta.user_metadata.into_iter().collect();
                user.sort();
                for (k, v) in user {
                    println!("x-amz-meta-{}\t{}", k, v);
                }
                true
            }
            None => false,
        },
        Command::Get { key, bucket } => {
            let body = handler.get_object_content(&key, &bucket).await;
            std::io::stdout().write_all(&body)?;
            !body.is_empty()
        }
        Command::Put {
            key,
            file,
            content_type,
            cache_control,
        } => {
            let body = Bytes::from(tokio::fs::read(&file).await?);
            let options = PutOptions {
                content_type,
                cache_control,
                ..PutOptions::default()
            };
            print_result(handler.create_object(&key, body, options).await)
        }
        Command::Copy {
            source,
            dest,
            source_bucket,
            dest_bucket,
        } => print_result(
            handler
                .copy_object(&source, &dest, &source_bucket, &dest_bucket)
                .await,
        ),
        Command::Delete { key, bucket } => match handler.delete_object(&key, &bucket).await {
            Some(result) => print_result(result),
            None => false,
        },
        Command::List { bucket, prefix } => {
            for object in handler.list_objects_in_bucket(&bucket, &prefix).await {
                let modified = object
                    .last_modified
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}",
                    object.key, object.size, object.etag, modified
                );
            }
            true
        }
        Command::Url {
            key,
            force,
            ignore_cdn,
            expire,
        } => {
            let url = handler
                .object_url(&key, force, ignore_cdn, expire.map(Duration::from_secs))
                .await;
            print_non_empty(url)
        }
        Command::Etag { key, no_cache } => {
            let etag = if no_cache {
                handler.etag_for_key(&key).await
            } else {
                handler.etag_for_object(&key).await
            };
            print_non_empty(etag)
        }
        Command::Download { key, path, bucket } => {
            match handler.download_object_response(&key, &path, &bucket).await {
                Some(downloaded) => {
                    println!(
                        "{}/{} -> {} ({} bytes)",
                        downloaded.bucket,
                        downloaded.key,
                        downloaded.path.display(),
                        downloaded.size
                    );
                    true
                }
                None => false,
            }
        }
        Command::CdnRewrite { url } => print_non_empty(handler.rewrite_for_cdn(&url)),
    };
    Ok(ok)
}

fn print_result(result: s3handler::storage::backend::ObjectResult) -> bool {
    if result.is_empty() {
        return false;
    }
    if let Some(etag) = &result.etag {
        println!("etag\t{}", etag);
    }
    if let Some(version) = &result.version_id {
        println!("version_id\t{}", version);
    }
    if let Some(location) = &result.location {
        println!("location\t{}", location);
    }
    true
}

fn print_non_empty(value: String) -> bool {
    if value.is_empty() {
        return false;
    }
    println!("{}", value);
    true
}
