// Enrichment pipeline
// Fetch, normalize, infer the schema from the first record, enrich every
// record on a bounded worker pool, then publish.

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use futures::{StreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::document::{Document, assemble, resolve_key};
use crate::embeddings::{Embedder, EmbeddingError, EmbeddingFailurePolicy, EmbeddingProvider};
use crate::record::{Record, normalize_row};
use crate::schema::{IndexDefinition, ReservedNames, infer_schema, key_field_name};
use crate::search::IndexPublisher;
use crate::source::RecordSource;
use crate::summary::{Summarizer, TextProvider, summary_or_fallback};
use crate::{IndexerError, Result};

/// Everything a run needs, resolved once from configuration and CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub table: String,
    pub key_column: Option<String>,
    pub row_limit: u32,
    pub index_name: String,
    pub dimensions: u32,
    pub language: String,
    pub concurrency: usize,
    pub on_embedding_failure: EmbeddingFailurePolicy,
    pub show_progress: bool,
}

impl RunSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            table: config.source.table.clone(),
            key_column: config.source.key_column.clone(),
            row_limit: config.source.row_limit,
            index_name: config.search.index_name.clone(),
            dimensions: config.embedding.dimensions,
            language: config.completion.language.clone(),
            concurrency: config.pipeline.concurrency,
            on_embedding_failure: config.pipeline.on_embedding_failure,
            show_progress: true,
        }
    }

    #[inline]
    pub fn key_field(&self) -> &str {
        key_field_name(self.key_column.as_deref())
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub records_retrieved: usize,
    pub records_processed: usize,
    pub records_skipped: usize,
    pub summary_fallbacks: usize,
    pub zero_vectors: usize,
    /// Fields present in later records but absent from the schema.
    pub dropped_fields: Vec<String>,
    /// `None` when nothing was published.
    pub documents_uploaded: Option<usize>,
    pub definition: IndexDefinition,
    pub documents: Vec<Document>,
}

#[derive(Debug)]
enum RecordOutcome {
    Document {
        document: Document,
        fallback_summary: bool,
        zero_vector: bool,
    },
    Skipped(EmbeddingError),
    /// The run was aborted before this record reached a provider.
    Cancelled,
}

/// Per-record work: summary, then embedding, then assembly.
struct RecordEnricher {
    text_provider: Arc<dyn TextProvider>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    key_column: Option<String>,
    key_field: String,
    language: String,
    dimensions: usize,
    on_embedding_failure: EmbeddingFailurePolicy,
    /// Set once the run aborts; checked before every provider call.
    cancelled: AtomicBool,
}

impl RecordEnricher {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn enrich(&self, record: &Record) -> std::result::Result<RecordOutcome, EmbeddingError> {
        if self.is_cancelled() {
            return Ok(RecordOutcome::Cancelled);
        }
        let key = resolve_key(record, self.key_column.as_deref());

        let summarizer = Summarizer::new(self.text_provider.as_ref(), &self.language);
        let attempt = summarizer.try_summarize(record);
        let fallback_summary = attempt.is_err();
        let summary = summary_or_fallback(attempt);

        if self.is_cancelled() {
            return Ok(RecordOutcome::Cancelled);
        }

        let embedder = Embedder::new(self.embedding_provider.as_ref(), self.dimensions);
        let (vector, zero_vector) = match embedder.embed(&summary) {
            Ok(vector) => (vector, false),
            Err(err) => match self.on_embedding_failure {
                EmbeddingFailurePolicy::Abort => return Err(err),
                EmbeddingFailurePolicy::Skip => return Ok(RecordOutcome::Skipped(err)),
                EmbeddingFailurePolicy::ZeroVector => {
                    warn!("Embedding failed for {}, using a zero vector: {}", key, err);
                    (embedder.zero_vector(), true)
                }
            },
        };

        Ok(RecordOutcome::Document {
            document: assemble(record, &key, &self.key_field, &summary, vector),
            fallback_summary,
            zero_vector,
        })
    }
}

pub struct Pipeline {
    source: Arc<dyn RecordSource>,
    text_provider: Arc<dyn TextProvider>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    publisher: Option<Arc<dyn IndexPublisher>>,
    settings: RunSettings,
}

impl Pipeline {
    #[inline]
    pub fn new(
        source: Arc<dyn RecordSource>,
        text_provider: Arc<dyn TextProvider>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            text_provider,
            embedding_provider,
            publisher: None,
            settings,
        }
    }

    /// Publish to this index service. Without a publisher the run is a dry run.
    #[inline]
    pub fn with_publisher(mut self, publisher: Arc<dyn IndexPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    #[inline]
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Fetch and normalize the source rows.
    #[inline]
    pub async fn load_records(&self) -> Result<Vec<Record>> {
        load_records(self.source.as_ref(), &self.settings).await
    }

    #[inline]
    pub async fn run(&self) -> Result<RunReport> {
        let records = self.load_records().await?;
        info!("Retrieved {} records from {}", records.len(), self.settings.table);

        let definition = infer_definition(&self.settings, records.first());
        debug!("Schema has {} fields", definition.fields.len());

        let mut report = self.enrich_all(records, definition).await?;

        if let Some(publisher) = &self.publisher {
            let publisher = Arc::clone(publisher);
            let definition = report.definition.clone();
            let documents = std::mem::take(&mut report.documents);

            let (documents, published) = tokio::task::spawn_blocking(move || {
                let published = publish(publisher.as_ref(), &definition, &documents);
                (documents, published)
            })
            .await
            .map_err(|e| IndexerError::Other(anyhow!("publish task failed: {e}")))?;

            report.documents = documents;
            report.documents_uploaded = Some(published?);
        } else {
            info!("Dry run, nothing published");
        }

        Ok(report)
    }

    async fn enrich_all(&self, records: Vec<Record>, definition: IndexDefinition) -> Result<RunReport> {
        let settings = &self.settings;
        let enricher = Arc::new(RecordEnricher {
            text_provider: Arc::clone(&self.text_provider),
            embedding_provider: Arc::clone(&self.embedding_provider),
            key_column: settings.key_column.clone(),
            key_field: settings.key_field().to_string(),
            language: settings.language.clone(),
            dimensions: settings.dimensions as usize,
            on_embedding_failure: settings.on_embedding_failure,
            cancelled: AtomicBool::new(false),
        });
        let reserved = ReservedNames::for_key_column(settings.key_column.as_deref());

        let bar = if settings.show_progress && console::user_attended_stderr() {
            ProgressBar::new(records.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Enriching records {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut report = RunReport {
            records_retrieved: records.len(),
            records_processed: 0,
            records_skipped: 0,
            summary_fallbacks: 0,
            zero_vectors: 0,
            dropped_fields: Vec::new(),
            documents_uploaded: None,
            documents: Vec::with_capacity(records.len()),
            definition,
        };
        let mut dropped_fields = BTreeSet::new();

        let mut outcomes = stream::iter(records.into_iter().enumerate())
            .map(|(position, record)| {
                let enricher = Arc::clone(&enricher);
                tokio::task::spawn_blocking(move || (position, enricher.enrich(&record)))
            })
            .buffered(settings.concurrency.max(1));

        while let Some(joined) = outcomes.next().await {
            let (position, outcome) =
                joined.map_err(|e| IndexerError::Other(anyhow!("enrichment task failed: {e}")))?;
            bar.inc(1);

            match outcome {
                Ok(RecordOutcome::Document {
                    mut document,
                    fallback_summary,
                    zero_vector,
                }) => {
                    let drifted = document
                        .retain_schema_fields(&report.definition)
                        .into_iter()
                        .filter(|name| !reserved.excludes(name, settings.key_field()));
                    for name in drifted {
                        if dropped_fields.insert(name.clone()) {
                            warn!("Field '{}' is not in the index schema and will not be uploaded", name);
                        }
                    }
                    report.summary_fallbacks += usize::from(fallback_summary);
                    report.zero_vectors += usize::from(zero_vector);
                    report.records_processed += 1;
                    report.documents.push(document);
                }
                Ok(RecordOutcome::Skipped(err)) => {
                    warn!("Skipping record {}: {}", position + 1, err);
                    report.records_skipped += 1;
                }
                Ok(RecordOutcome::Cancelled) => {}
                Err(err) => {
                    // Tasks already in flight stop before their next provider call.
                    enricher.cancel();
                    bar.abandon();
                    error!("Embedding failed for record {}: {}", position + 1, err);
                    return Err(IndexerError::Embedding(format!("record {}: {err}", position + 1)));
                }
            }
        }

        bar.finish_and_clear();
        report.dropped_fields = dropped_fields.into_iter().collect();
        info!(
            "Processed {} records ({} skipped)",
            report.records_processed, report.records_skipped
        );
        Ok(report)
    }
}

/// Fetch at most `row_limit` rows and normalize them. A key column absent
/// from the fetched rows fails the run before any provider is called.
#[inline]
pub async fn load_records(source: &dyn RecordSource, settings: &RunSettings) -> Result<Vec<Record>> {
    let rows = source.fetch(&settings.table, settings.row_limit).await?;

    if let (Some(column), Some(first)) = (settings.key_column.as_deref(), rows.first()) {
        if !first.contains_column(column) {
            return Err(IndexerError::Config(format!(
                "key column '{column}' not found in table '{}'",
                settings.table
            )));
        }
    }

    Ok(rows
        .into_iter()
        .map(|row| normalize_row(row, settings.key_column.as_deref()))
        .collect())
}

/// Index definition derived from the first record only.
#[inline]
pub fn infer_definition(settings: &RunSettings, first_record: Option<&Record>) -> IndexDefinition {
    let reserved = ReservedNames::for_key_column(settings.key_column.as_deref());
    let fields = infer_schema(
        first_record,
        settings.key_field(),
        &reserved,
        settings.dimensions,
    );
    IndexDefinition::new(&settings.index_name, fields)
}

fn publish(
    publisher: &dyn IndexPublisher,
    definition: &IndexDefinition,
    documents: &[Document],
) -> Result<usize> {
    publisher.create_or_update_index(definition)?;
    if documents.is_empty() {
        info!("No documents to upload");
        return Ok(0);
    }
    publisher.upload(&definition.name, documents)
}
