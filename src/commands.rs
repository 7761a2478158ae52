use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::document::Document;
use crate::embeddings::EmbeddingFailurePolicy;
use crate::openai::{ChatCompletionClient, EmbeddingClient};
use crate::pipeline::{Pipeline, RunReport, RunSettings, infer_definition, load_records};
use crate::schema::IndexDefinition;
use crate::search::SearchIndexClient;
use crate::source::SqliteSource;

/// Command line overrides for the configured source and pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub table: Option<String>,
    pub key_column: Option<String>,
    pub limit: Option<u32>,
    pub concurrency: Option<usize>,
    pub on_embedding_failure: Option<EmbeddingFailurePolicy>,
    pub dry_run: bool,
    /// Write the index definition and documents here as JSON.
    pub output: Option<PathBuf>,
}

impl RunOptions {
    #[inline]
    pub fn apply(&self, config: &mut Config) {
        if let Some(table) = &self.table {
            config.source.table.clone_from(table);
        }
        if let Some(key_column) = &self.key_column {
            config.source.key_column = Some(key_column.clone());
        }
        if let Some(limit) = self.limit {
            config.source.row_limit = limit;
        }
        if let Some(concurrency) = self.concurrency {
            config.pipeline.concurrency = concurrency;
        }
        if let Some(policy) = self.on_embedding_failure {
            config.pipeline.on_embedding_failure = policy;
        }
    }
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    index: &'a IndexDefinition,
    documents: &'a [Document],
}

/// Run the whole pipeline against the configured services.
#[inline]
pub async fn run_pipeline(mut config: Config, options: &RunOptions) -> Result<RunReport> {
    options.apply(&mut config);
    config.ensure_run_ready(options.dry_run)?;

    let http = config.http_client();
    let source = SqliteSource::connect(&config.source.database_url).await?;
    let text_provider = ChatCompletionClient::new(&config.completion, http.clone())?;
    let embedding_provider = EmbeddingClient::new(&config.embedding, http.clone())?;

    let mut pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(text_provider),
        Arc::new(embedding_provider),
        RunSettings::from_config(&config),
    );
    if !options.dry_run {
        let publisher = SearchIndexClient::new(&config.search, http)?;
        pipeline = pipeline.with_publisher(Arc::new(publisher));
    }

    let report = pipeline.run().await?;
    print_report(&report);

    if let Some(path) = &options.output {
        write_output(path, &report)?;
        println!("Documents written to {}", style(path.display()).cyan());
    }

    Ok(report)
}

/// Print the index definition the next run would publish. Reads one row and
/// calls no AI service.
#[inline]
pub async fn show_schema(mut config: Config, options: &RunOptions) -> Result<IndexDefinition> {
    options.apply(&mut config);
    config.ensure_source_ready()?;

    let mut settings = RunSettings::from_config(&config);
    settings.row_limit = 1;
    if settings.index_name.is_empty() {
        settings.index_name = settings.table.to_lowercase();
    }

    let source = SqliteSource::connect(&config.source.database_url).await?;
    let records = load_records(&source, &settings).await?;
    if records.is_empty() {
        info!("Table {} is empty, only system fields are defined", settings.table);
    }
    let definition = infer_definition(&settings, records.first());

    let json = serde_json::to_string_pretty(&definition)
        .context("Failed to serialize index definition")?;
    println!("{json}");

    Ok(definition)
}

fn write_output(path: &Path, report: &RunReport) -> Result<()> {
    let output = RunOutput {
        index: &report.definition,
        documents: &report.documents,
    };
    let json = serde_json::to_string_pretty(&output).context("Failed to serialize documents")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write output file {}", path.display()))?;
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", style("Run complete").bold().green());
    println!("  Records retrieved: {}", report.records_retrieved);
    println!("  Records processed: {}", report.records_processed);
    if report.records_skipped > 0 {
        println!(
            "  Records skipped: {}",
            style(report.records_skipped).yellow()
        );
    }
    if report.summary_fallbacks > 0 {
        println!(
            "  Fallback summaries: {}",
            style(report.summary_fallbacks).yellow()
        );
    }
    if report.zero_vectors > 0 {
        println!("  Zero vectors: {}", style(report.zero_vectors).yellow());
    }
    if !report.dropped_fields.is_empty() {
        println!(
            "  Fields not in schema: {}",
            style(report.dropped_fields.join(", ")).yellow()
        );
    }
    println!(
        "  Index: {} ({} fields)",
        style(&report.definition.name).cyan(),
        report.definition.fields.len()
    );
    match report.documents_uploaded {
        Some(uploaded) => {
            println!("  {}", style("✓ Index created or updated").green());
            println!("  Documents uploaded: {uploaded}");
        }
        None => println!("  Documents uploaded: {}", style("none (dry run)").dim()),
    }
}
