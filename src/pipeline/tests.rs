use super::*;
use crate::record::{SourceRow, SourceValue};
use crate::schema::{FieldType, TEXT_FIELD, VECTOR_FIELD};
use crate::summary::ERROR_SUMMARY_FALLBACK;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;

const DIMENSIONS: u32 = 4;

struct InMemorySource {
    rows: Vec<SourceRow>,
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn fetch(&self, _table: &str, limit: u32) -> crate::Result<Vec<SourceRow>> {
        Ok(self.rows.iter().take(limit as usize).cloned().collect())
    }
}

/// Summarizes a record by echoing its prompt; fails for prompts containing `fail_on`.
struct EchoText {
    fail_on: Option<&'static str>,
}

impl TextProvider for EchoText {
    fn complete(&self, _system_instruction: &str, user_prompt: &str) -> anyhow::Result<String> {
        if let Some(marker) = self.fail_on {
            if user_prompt.contains(marker) {
                anyhow::bail!("content filtered");
            }
        }
        let name = user_prompt
            .lines()
            .find_map(|line| line.strip_prefix("Name: "))
            .unwrap_or("unknown");
        Ok(format!("Summary of {name}"))
    }
}

/// Embeds any text as a fixed vector; fails for texts containing `fail_on`.
struct FixedEmbedding {
    dimensions: usize,
    fail_on: Option<&'static str>,
}

impl EmbeddingProvider for FixedEmbedding {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if let Some(marker) = self.fail_on {
            if text.contains(marker) {
                anyhow::bail!("rate limited");
            }
        }
        Ok(vec![0.5; self.dimensions])
    }
}

#[derive(Default)]
struct RecordingPublisher {
    definitions: Mutex<Vec<IndexDefinition>>,
    uploads: Mutex<Vec<Vec<Document>>>,
}

impl IndexPublisher for RecordingPublisher {
    fn create_or_update_index(&self, definition: &IndexDefinition) -> crate::Result<()> {
        self.definitions
            .lock()
            .expect("lock should not be poisoned")
            .push(definition.clone());
        Ok(())
    }

    fn upload(&self, _index_name: &str, documents: &[Document]) -> crate::Result<usize> {
        self.uploads
            .lock()
            .expect("lock should not be poisoned")
            .push(documents.to_vec());
        Ok(documents.len())
    }
}

/// Counts every call it receives.
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

impl TextProvider for CountingProvider {
    fn complete(&self, _system_instruction: &str, _user_prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("A summary".to_string())
    }
}

impl EmbeddingProvider for CountingProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.5; DIMENSIONS as usize])
    }
}

fn customer_row(id: i64, name: &str) -> SourceRow {
    SourceRow::new(vec![
        ("CustomerId".to_string(), SourceValue::I64(id)),
        ("Name".to_string(), SourceValue::Text(name.to_string())),
        ("Balance".to_string(), SourceValue::F64(10.5)),
    ])
}

fn settings(key_column: Option<&str>) -> RunSettings {
    RunSettings {
        table: "Customers".to_string(),
        key_column: key_column.map(str::to_string),
        row_limit: 100,
        index_name: "customers".to_string(),
        dimensions: DIMENSIONS,
        language: "English (en-US)".to_string(),
        concurrency: 1,
        on_embedding_failure: EmbeddingFailurePolicy::Abort,
        show_progress: false,
    }
}

fn pipeline(rows: Vec<SourceRow>, settings: RunSettings) -> Pipeline {
    pipeline_with(rows, settings, None, None)
}

fn pipeline_with(
    rows: Vec<SourceRow>,
    settings: RunSettings,
    text_fail_on: Option<&'static str>,
    embed_fail_on: Option<&'static str>,
) -> Pipeline {
    Pipeline::new(
        Arc::new(InMemorySource { rows }),
        Arc::new(EchoText {
            fail_on: text_fail_on,
        }),
        Arc::new(FixedEmbedding {
            dimensions: DIMENSIONS as usize,
            fail_on: embed_fail_on,
        }),
        settings,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn customer_table_is_published() {
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = pipeline(
        vec![customer_row(42, "Ada"), customer_row(43, "Grace")],
        settings(Some("CustomerId")),
    )
    .with_publisher(publisher.clone());

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.records_retrieved, 2);
    assert_eq!(report.records_processed, 2);
    assert_eq!(report.documents_uploaded, Some(2));

    let definitions = publisher.definitions.lock().expect("lock");
    assert_eq!(definitions.len(), 1);
    let names: Vec<&str> = definitions[0].fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["CustomerId", TEXT_FIELD, VECTOR_FIELD, "Name", "Balance"]
    );
    assert_eq!(
        definitions[0].key_field().map(|f| f.field_type),
        Some(FieldType::String)
    );

    let uploads = publisher.uploads.lock().expect("lock");
    assert_eq!(uploads.len(), 1);
    let first = &uploads[0][0];
    assert_eq!(first.get("CustomerId"), Some(&json!("42")));
    assert_eq!(first.get("Name"), Some(&json!("Ada")));
    assert_eq!(first.get(TEXT_FIELD), Some(&json!("Summary of Ada")));
    assert_eq!(first.get(VECTOR_FIELD), Some(&json!([0.5, 0.5, 0.5, 0.5])));
    assert_eq!(uploads[0][1].get("CustomerId"), Some(&json!("43")));
}

#[tokio::test]
async fn publishes_on_current_thread_runtime() {
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = pipeline(
        vec![customer_row(42, "Ada"), customer_row(43, "Grace")],
        settings(Some("CustomerId")),
    )
    .with_publisher(publisher.clone());

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.documents_uploaded, Some(2));
    assert_eq!(report.documents.len(), 2);
    assert_eq!(publisher.definitions.lock().expect("lock").len(), 1);
    assert_eq!(publisher.uploads.lock().expect("lock")[0].len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn generated_keys_without_key_column() {
    let pipeline = pipeline(vec![customer_row(1, "Ada")], settings(None));

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.documents_uploaded, None);
    let key = report.documents[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("generated key");
    assert!(uuid::Uuid::parse_str(key).is_ok());
    assert!(report.definition.has_field("CustomerId"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_key_column_fails_before_enrichment() {
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = pipeline(vec![customer_row(1, "Ada")], settings(Some("AccountNo")))
        .with_publisher(publisher.clone());

    let result = pipeline.run().await;

    assert!(matches!(result, Err(IndexerError::Config(ref m)) if m.contains("AccountNo")));
    assert!(publisher.definitions.lock().expect("lock").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_table_creates_fixed_fields_only() {
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = pipeline(Vec::new(), settings(None)).with_publisher(publisher.clone());

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.records_retrieved, 0);
    assert_eq!(report.documents_uploaded, Some(0));
    let definitions = publisher.definitions.lock().expect("lock");
    assert_eq!(definitions[0].fields.len(), 3);
    assert!(publisher.uploads.lock().expect("lock").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_failure_aborts_before_publishing() {
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = pipeline_with(
        vec![customer_row(1, "Ada"), customer_row(2, "Grace")],
        settings(Some("CustomerId")),
        None,
        Some("Grace"),
    )
    .with_publisher(publisher.clone());

    let result = pipeline.run().await;

    assert!(matches!(result, Err(IndexerError::Embedding(ref m)) if m.contains("record 2")));
    assert!(publisher.definitions.lock().expect("lock").is_empty());
    assert!(publisher.uploads.lock().expect("lock").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_failure_can_skip_record() {
    let mut run_settings = settings(Some("CustomerId"));
    run_settings.on_embedding_failure = EmbeddingFailurePolicy::Skip;
    let pipeline = pipeline_with(
        vec![customer_row(1, "Ada"), customer_row(2, "Grace")],
        run_settings,
        None,
        Some("Grace"),
    );

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.records_processed, 1);
    assert_eq!(report.records_skipped, 1);
    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].get("CustomerId"), Some(&json!("1")));
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_failure_can_use_zero_vector() {
    let mut run_settings = settings(Some("CustomerId"));
    run_settings.on_embedding_failure = EmbeddingFailurePolicy::ZeroVector;
    let pipeline = pipeline_with(
        vec![customer_row(1, "Ada"), customer_row(2, "Grace")],
        run_settings,
        None,
        Some("Grace"),
    );

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.records_processed, 2);
    assert_eq!(report.zero_vectors, 1);
    assert_eq!(
        report.documents[1].get(VECTOR_FIELD),
        Some(&json!([0.0, 0.0, 0.0, 0.0]))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn summary_failure_uses_fallback_text() {
    let pipeline = pipeline_with(
        vec![customer_row(1, "Ada"), customer_row(2, "Grace")],
        settings(Some("CustomerId")),
        Some("Ada"),
        None,
    );

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.summary_fallbacks, 1);
    assert_eq!(
        report.documents[0].get(TEXT_FIELD),
        Some(&json!(ERROR_SUMMARY_FALLBACK))
    );
    assert_eq!(
        report.documents[1].get(TEXT_FIELD),
        Some(&json!("Summary of Grace"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn fields_missing_from_first_record_are_dropped() {
    let mut later = customer_row(2, "Grace");
    later
        .columns
        .push(("Region".to_string(), SourceValue::Text("EMEA".to_string())));
    let pipeline = pipeline(
        vec![customer_row(1, "Ada"), later],
        settings(Some("CustomerId")),
    );

    let report = pipeline.run().await.expect("run should succeed");

    assert_eq!(report.dropped_fields, vec!["Region".to_string()]);
    assert!(!report.definition.has_field("Region"));
    assert!(report.documents[1].get("Region").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn reserved_name_variants_are_not_reported_as_drift() {
    let mut first = customer_row(1, "Ada");
    first
        .columns
        .push(("TEXTREPRESENTATION".to_string(), SourceValue::Text("stale".to_string())));
    first
        .columns
        .push(("ID".to_string(), SourceValue::I64(7)));
    let mut later = customer_row(2, "Grace");
    later
        .columns
        .push(("ContentVector".to_string(), SourceValue::Text("stale".to_string())));

    let report = pipeline(vec![first, later], settings(None))
        .run()
        .await
        .expect("run should succeed");

    assert!(report.dropped_fields.is_empty());
    assert!(!report.definition.has_field("TEXTREPRESENTATION"));
    assert!(report.documents[0].get("TEXTREPRESENTATION").is_none());
    assert!(report.documents[0].get("ID").is_none());
    assert!(report.documents[1].get("ContentVector").is_none());
}

#[test]
fn cancelled_enricher_calls_no_provider() {
    let text = Arc::new(CountingProvider::default());
    let embedding = Arc::new(CountingProvider::default());
    let enricher = RecordEnricher {
        text_provider: text.clone(),
        embedding_provider: embedding.clone(),
        key_column: Some("CustomerId".to_string()),
        key_field: "CustomerId".to_string(),
        language: "English (en-US)".to_string(),
        dimensions: DIMENSIONS as usize,
        on_embedding_failure: EmbeddingFailurePolicy::Abort,
        cancelled: AtomicBool::new(false),
    };
    let record = normalize_row(customer_row(1, "Ada"), Some("CustomerId"));

    let outcome = enricher.enrich(&record).expect("enrichment should succeed");
    assert!(matches!(outcome, RecordOutcome::Document { .. }));
    assert_eq!(text.calls.load(Ordering::SeqCst), 1);
    assert_eq!(embedding.calls.load(Ordering::SeqCst), 1);

    enricher.cancel();
    let outcome = enricher.enrich(&record).expect("cancelled enrichment is not an error");

    assert!(matches!(outcome, RecordOutcome::Cancelled));
    assert_eq!(text.calls.load(Ordering::SeqCst), 1);
    assert_eq!(embedding.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_with_concurrency_still_fails_the_run() {
    let publisher = Arc::new(RecordingPublisher::default());
    let rows: Vec<SourceRow> = (0..12)
        .map(|i| customer_row(i, &format!("customer-{i}")))
        .collect();
    let mut run_settings = settings(Some("CustomerId"));
    run_settings.concurrency = 4;
    let pipeline = pipeline_with(rows, run_settings, None, Some("customer-2"))
        .with_publisher(publisher.clone());

    let result = pipeline.run().await;

    assert!(matches!(result, Err(IndexerError::Embedding(ref m)) if m.contains("record 3")));
    assert!(publisher.definitions.lock().expect("lock").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_enrichment_keeps_source_order() {
    let rows: Vec<SourceRow> = (0..20)
        .map(|i| customer_row(i, &format!("customer-{i}")))
        .collect();
    let mut run_settings = settings(Some("CustomerId"));
    run_settings.concurrency = 4;

    let report = pipeline(rows, run_settings)
        .run()
        .await
        .expect("run should succeed");

    let keys: Vec<String> = report
        .documents
        .iter()
        .filter_map(|d| d.get("CustomerId").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(keys, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_limit_bounds_the_batch() {
    let rows: Vec<SourceRow> = (0..5).map(|i| customer_row(i, "x")).collect();
    let mut run_settings = settings(None);
    run_settings.row_limit = 3;

    let report = pipeline(rows, run_settings)
        .run()
        .await
        .expect("run should succeed");

    assert_eq!(report.records_retrieved, 3);
}

#[test]
fn settings_follow_config() {
    let mut config = Config::default();
    config.source.table = "Orders".to_string();
    config.source.key_column = Some("OrderId".to_string());
    config.search.index_name = "orders".to_string();
    config.pipeline.concurrency = 8;

    let settings = RunSettings::from_config(&config);

    assert_eq!(settings.table, "Orders");
    assert_eq!(settings.key_field(), "OrderId");
    assert_eq!(settings.index_name, "orders");
    assert_eq!(settings.concurrency, 8);
    assert_eq!(settings.dimensions, config.embedding.dimensions);
}
