//! CLI entry point for s3handler-cache: ETag cache inspection and
//! export/import tool.

use clap::{Parser, Subcommand};
use s3handler::cache::export::{export_etags, import_etags};
use s3handler::cache::sqlite::SqliteEtagStore;
use s3handler::cache::store::{format_timestamp, EtagStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "s3handler-cache", about = "s3handler ETag cache tool")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "s3handler.yaml", global = true)]
    config: PathBuf,

    /// SQLite database path, overriding `cache.sqlite.path`.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every cached row
    List,
    /// Export the cache to JSON
    Export {
        #[arg(long, default_value = "-")]
        output: String,
    },
    /// Import (upsert) rows from JSON
    Import {
        #[arg(long, default_value = "-")]
        input: String,
    },
}

fn resolve_db_path(config_path: &PathBuf) -> anyhow::Result<String> {
    let config = s3handler::config::load_config(config_path)?;
    Ok(config.cache.sqlite.path)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let db_path = match cli.db {
        Some(p) => p,
        None => match resolve_db_path(&cli.config) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Error reading config: {}", e);
                std::process::exit(1);
            }
        },
    };

    let store = match SqliteEtagStore::new(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening {}: {}", db_path, e);
            std::process::exit(1);
        }
    };

    let rc = match cli.command {
        Commands::List => run_list(&store).await,
        Commands::Export { output } => run_export(&store, &output).await,
        Commands::Import { input } => run_import(&store, &input).await,
    };
    std::process::exit(rc);
}

async fn run_list(store: &SqliteEtagStore) -> i32 {
    match store.list().await {
        Ok(rows) => {
            for row in rows {
                let updated = row
                    .updated_at
                    .as_ref()
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}", row.key, row.etag, updated);
            }
            0
        }
        Err(e) => {
            eprintln!("Error listing cache: {}", e);
            1
        }
    }
}

async fn run_export(store: &SqliteEtagStore, output: &str) -> i32 {
    match export_etags(store).await {
        Ok(json) => {
            if output == "-" {
                println!("{}", json);
            } else {
                if let Err(e) = std::fs::write(output, format!("{}\n", json)) {
                    eprintln!("Error writing output: {}", e);
                    return 1;
                }
                eprintln!("Exported to {}", output);
            }
            0
        }
        Err(e) => {
            eprintln!("Error exporting: {}", e);
            1
        }
    }
}

async fn run_import(store: &SqliteEtagStore, input: &str) -> i32 {
    let json = if input == "-" {
        use std::io::Read;
        let mut buf = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
            eprintln!("Error reading stdin: {}", e);
            return 1;
        }
        buf
    } else {
        match std::fs::read_to_string(input) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                return 1;
            }
        }
    };

    match import_etags(store, &json).await {
        Ok(result) => {
            let mut msg = format!("  objects: {} imported", result.imported);
            if result.skipped > 0 {
                msg.push_str(&format!(", {} skipped", result.skipped));
            }
            eprintln!("{}", msg);
            for w in &result.warnings {
                eprintln!("  WARNING: {}", w);
            }
            0
        }
        Err(e) => {
            eprintln!("Error importing: {}", e);
            1
        }
    }
}
