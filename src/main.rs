//! Tagstore CLI - operator tool for the tagged document store

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tagstore::ui;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tagstore")]
#[command(version)]
#[command(about = "Multi-tenant tagged document store")]
#[command(long_about = r#"
Tagstore keeps JSON documents per tenant and index and finds them by tag:
  • Create-or-update documents together with their tag sets
  • List a tenant's documents, newest first
  • Search for documents carrying every one of a set of tags

Example usage:
  tagstore init
  tagstore put --tenant acme --index notes --id n1 --tag urgent --data '{"title":"hi"}'
  tagstore search --tenant acme --tag urgent
"#)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "tagstore.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and ignore the local database directory
    Init {
        /// Database file for the SQLite backend
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Apply pending schema migrations
    Migrate {
        /// Show applied and pending migrations without changing anything
        #[arg(long, conflicts_with = "revert")]
        status: bool,

        /// Revert the most recently applied migration
        #[arg(long)]
        revert: bool,
    },

    /// Create or replace a document
    Put {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        index: String,

        /// Document id
        #[arg(long)]
        id: String,

        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// JSON payload; read from --file or stdin when absent
        #[arg(short, long, conflicts_with = "file")]
        data: Option<String>,

        /// File holding the JSON payload
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show one document
    Get {
        /// Document id
        id: String,
    },

    /// Delete a document and its tags
    Delete {
        /// Document id
        id: String,
    },

    /// List a tenant's documents, newest first
    List {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        index: Option<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Find documents carrying every given tag
    Search {
        #[arg(short, long)]
        tenant: String,

        /// Required tag (repeatable)
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,

        #[arg(short, long)]
        index: Option<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the tag vocabulary
    Tags {
        /// Restrict to tags used by one tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Count a tenant's documents
    Count {
        #[arg(short, long)]
        tenant: String,

        #[arg(short, long)]
        index: Option<String>,
    },
}

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

/// Print a successful result envelope in JSON mode
pub fn emit_success(
    output_mode: OutputMode,
    command: &str,
    data: serde_json::Value,
) -> anyhow::Result<()> {
    if output_mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn emit_failure(output_mode: OutputMode, err: &anyhow::Error) {
    let kind = err
        .downcast_ref::<tagstore::Error>()
        .map(|e| e.kind().as_str())
        .unwrap_or("internal");

    match output_mode {
        OutputMode::Json => {
            let envelope = serde_json::json!({
                "ok": false,
                "error": { "kind": kind, "message": format!("{err:#}") },
            });
            println!("{envelope}");
        }
        OutputMode::Human => ui::failure(&format!("{err:#}")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    if let Err(err) = run(cli, output_mode).await {
        emit_failure(output_mode, &err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output_mode: OutputMode) -> anyhow::Result<()> {
    if let Commands::Init { database, force } = &cli.command {
        return commands::run_init(output_mode, &cli.config, database.clone(), *force);
    }

    let config = tagstore::config::load_config(Some(&cli.config))?;
    tracing::debug!("Using backend {}", config.backend.describe());

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Migrate { status, revert } => {
            commands::run_migrate(output_mode, &config, status, revert).await
        }
        Commands::Put {
            tenant,
            index,
            id,
            tags,
            data,
            file,
        } => {
            let payload = commands::read_payload(data, file)?;
            let store = tagstore::TagStore::connect(&config).await?;
            let doc = tagstore::NewDocument::new(tenant, index, id, payload).with_tags(tags);
            commands::run_put(output_mode, &store, doc).await
        }
        Commands::Get { id } => {
            let store = tagstore::TagStore::connect(&config).await?;
            commands::run_get(output_mode, &store, &id).await
        }
        Commands::Delete { id } => {
            let store = tagstore::TagStore::connect(&config).await?;
            commands::run_delete(output_mode, &store, &id).await
        }
        Commands::List {
            tenant,
            index,
            limit,
        } => {
            let store = tagstore::TagStore::connect(&config).await?;
            let docs = store.search().list(&tenant, index.as_deref(), limit).await?;
            commands::print_documents(output_mode, "list", &tenant, &docs)
        }
        Commands::Search {
            tenant,
            tags,
            index,
            limit,
        } => {
            let store = tagstore::TagStore::connect(&config).await?;
            let docs = store
                .search()
                .search_by_tags(&tenant, &tags, index.as_deref(), limit)
                .await?;
            commands::print_documents(output_mode, "search", &tenant, &docs)
        }
        Commands::Tags { tenant } => {
            let store = tagstore::TagStore::connect(&config).await?;
            commands::run_tags(output_mode, &store, tenant.as_deref()).await
        }
        Commands::Count { tenant, index } => {
            let store = tagstore::TagStore::connect(&config).await?;
            commands::run_count(output_mode, &store, &tenant, index.as_deref()).await
        }
    }
}
