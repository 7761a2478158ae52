use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use table_indexer::commands::{RunOptions, run_pipeline, show_schema};
use table_indexer::config::{Config, resolve_config_dir, run_interactive_config, show_config};
use table_indexer::embeddings::EmbeddingFailurePolicy;

#[derive(Parser)]
#[command(name = "table-indexer")]
#[command(about = "Summarize and embed database rows, then publish them to a vector search index")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Table to read, overriding the configured one
    #[arg(long)]
    table: Option<String>,
    /// Column used as the document key; without one keys are generated
    #[arg(long)]
    key_column: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the source database and the AI and search services
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Fetch, summarize, embed and publish a batch of rows
    Run {
        #[command(flatten)]
        source: SourceArgs,
        /// Maximum number of rows to read
        #[arg(long)]
        limit: Option<u32>,
        /// Records enriched at the same time
        #[arg(long)]
        concurrency: Option<usize>,
        /// What to do when a record cannot be embedded: abort, skip or zero-vector
        #[arg(long)]
        on_embedding_failure: Option<EmbeddingFailurePolicy>,
        /// Enrich records without touching the search index
        #[arg(long)]
        dry_run: bool,
        /// Write the index definition and documents to this JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the index definition inferred from the first row
    Schema {
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Run {
            source,
            limit,
            concurrency,
            on_embedding_failure,
            dry_run,
            output,
        } => {
            let options = RunOptions {
                table: source.table,
                key_column: source.key_column,
                limit,
                concurrency,
                on_embedding_failure,
                dry_run,
                output,
            };
            run_pipeline(Config::load(&config_dir)?, &options).await?;
        }
        Commands::Schema { source } => {
            let options = RunOptions {
                table: source.table,
                key_column: source.key_column,
                ..RunOptions::default()
            };
            show_schema(Config::load(&config_dir)?, &options).await?;
        }
    }

    Ok(())
}
