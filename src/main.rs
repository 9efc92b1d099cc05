//! # anyfile CLI
//!
//! ## Usage
//!
//! ```bash
//! anyfile --config ./config/anyfile.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `anyfile index [--force]` | Build or load the index and table database |
//! | `anyfile tables` | Materialize tables only and print their summary cards |
//! | `anyfile retrieve "<query>" --tag <tag>` | Run the retrieval tool |
//! | `anyfile sql "<query>"` | Run the guarded SQL tool |
//! | `anyfile schema [<tables>]` | List tables, or describe the given ones |
//! | `anyfile tools` | Print tool schemas as JSON |
//! | `anyfile serve` | Start the HTTP tool server |
//! | `anyfile clean` | Remove the table database and the index |
//!
//! Command results go to stdout; logs go to stderr (`RUST_LOG` overrides
//! the level).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anyfile_index::config::{self, Config};
use anyfile_index::materialize::materialize_with;
use anyfile_index::models::SourceType;
use anyfile_index::scan::ScanOptions;
use anyfile_index::session::Session;
use anyfile_index::sql::SqliteEngine;
use anyfile_index::tools::{ToolContext, ToolOutput, ToolRegistry};
use anyfile_index::{db, index, server};

/// Index a directory of mixed files for semantic retrieval and guarded SQL.
#[derive(Parser)]
#[command(
    name = "anyfile",
    version,
    about = "Index a directory of mixed files for semantic retrieval and guarded SQL",
    long_about = "Scans a data directory for documents, images, and spreadsheets; builds a \
    modality-tagged similarity index and a SQLite mirror of every table; and exposes both \
    as tools for an external reasoning loop."
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/anyfile.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index and table database, or load the persisted index.
    Index {
        /// Discard the persisted index and rebuild from the data directory.
        #[arg(long)]
        force: bool,
    },

    /// Load tabular files into the database and print a summary card per table.
    Tables,

    /// Semantic search over one document type.
    Retrieve {
        query: String,

        /// Document type: text_chunk, image_text, or table_summary.
        #[arg(long)]
        tag: SourceType,
    },

    /// Run a read-only SQL query against the table database.
    Sql { query: String },

    /// Without arguments, list tables; otherwise describe the comma-separated tables.
    Schema { tables: Option<String> },

    /// Print the tool schemas as JSON.
    Tools,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,

    /// Remove the table database and the persisted index.
    Clean,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { force } => {
            let session = Session::open(cfg)?;
            let report = session.ingest(force).await?;
            if report.cache_hit {
                println!("index loaded from {}", session.index_path().display());
            } else {
                println!("index built at {}", session.index_path().display());
            }
            println!("  text chunks: {}", report.text_chunks);
            println!("  image documents: {}", report.image_docs);
            println!("  table cards: {}", report.table_cards);
            session.teardown().await?;
        }
        Commands::Tables => {
            let materialized = materialize_with(
                &cfg.paths.data_dir,
                &cfg.paths.db_path,
                &ScanOptions::from(&cfg.scan),
            )
            .await?;
            materialized.close().await;
            if materialized.cards.is_empty() {
                println!("No tabular files found.");
            } else {
                let cards: Vec<&str> =
                    materialized.cards.iter().map(|c| c.content.as_str()).collect();
                println!("{}", cards.join("\n\n"));
            }
        }
        Commands::Retrieve { query, tag } => {
            let session = Session::open(cfg)?;
            session.ingest(false).await?;
            let out = session
                .call_tool(
                    "retrieve",
                    serde_json::json!({ "query": query, "tag": tag.as_str() }),
                )
                .await;
            session.teardown().await?;
            print_output(out)?;
        }
        Commands::Sql { query } => {
            let out = call_sql_tool(&cfg, "sql_db_query", serde_json::json!({ "query": query }))
                .await?;
            print_output(out)?;
        }
        Commands::Schema { tables } => {
            let out = match tables {
                Some(names) => {
                    call_sql_tool(&cfg, "sql_db_schema", serde_json::json!({ "table_names": names }))
                        .await?
                }
                None => call_sql_tool(&cfg, "sql_db_list_tables", serde_json::json!({})).await?,
            };
            print_output(out)?;
        }
        Commands::Tools => {
            let tools = ToolRegistry::with_builtins().list();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Commands::Serve => {
            let bind = cfg.server.bind.clone();
            let session = Arc::new(Session::open(cfg)?);
            if let Err(e) = session.ingest(false).await {
                tracing::error!(
                    error = %format!("{:#}", e),
                    "ingestion failed; tools will report the index as not ready"
                );
            }
            let served = server::run_server(Arc::clone(&session), &bind).await;
            session.teardown().await?;
            served?;
        }
        Commands::Clean => {
            db::remove_database(&cfg.paths.db_path)?;
            index::remove_index(&cfg.paths.index_path)?;
            println!("removed {}", cfg.paths.db_path.display());
            println!("removed {}", cfg.paths.index_path.display());
        }
    }

    Ok(())
}

/// Run a SQL tool against the existing database, without touching the index.
async fn call_sql_tool(cfg: &Config, tool: &str, params: serde_json::Value) -> Result<ToolOutput> {
    let db_path: &Path = &cfg.paths.db_path;
    if !db_path.is_file() {
        bail!(
            "no table database at {}; run `anyfile tables` or `anyfile index` first",
            db_path.display()
        );
    }
    let engine = SqliteEngine::open(db_path).await?;
    let pool = engine.pool().clone();
    let ctx = ToolContext::new().with_sql(engine);
    let out = ToolRegistry::with_builtins().call(tool, params, &ctx).await;
    pool.close().await;
    Ok(out)
}

fn print_output(out: ToolOutput) -> Result<()> {
    if out.is_error() {
        bail!("{}", out.content.trim_start_matches("Error: "));
    }
    println!("{}", out.content);
    Ok(())
}
