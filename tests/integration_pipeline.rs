#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end runs against a temporary SQLite table and mocked AI and search services

use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use table_indexer::IndexerError;
use table_indexer::commands::{RunOptions, run_pipeline, show_schema};
use table_indexer::config::Config;
use table_indexer::embeddings::EmbeddingFailurePolicy;
use table_indexer::schema::{FieldType, TEXT_FIELD, VECTOR_FIELD};

const DIMENSIONS: u32 = 3;

async fn create_customer_table(temp_dir: &TempDir) -> String {
    let db_path = temp_dir.path().join("customers.db");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true),
        )
        .await
        .expect("Failed to create source database");

    sqlx::query(
        "CREATE TABLE Customers (
            CustomerId INTEGER PRIMARY KEY,
            Name TEXT NOT NULL,
            Balance REAL,
            Active BOOLEAN,
            SignedUp DATETIME
        )",
    )
    .execute(&pool)
    .await
    .expect("Failed to create table");

    for (id, name, balance) in [(42, "Ada", 120.5), (43, "Grace", 80.0), (44, "Edsger", 0.0)] {
        sqlx::query(
            "INSERT INTO Customers (CustomerId, Name, Balance, Active, SignedUp)
             VALUES (?, ?, ?, 1, '2024-03-01 09:30:00')",
        )
        .bind(id)
        .bind(name)
        .bind(balance)
        .execute(&pool)
        .await
        .expect("Failed to insert customer");
    }
    pool.close().await;

    format!("sqlite://{}", db_path.display())
}

fn test_config(database_url: String, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.source.database_url = database_url;
    config.source.table = "Customers".to_string();
    config.source.key_column = Some("CustomerId".to_string());
    config.search.endpoint = server.uri();
    config.search.api_key = "search-key".to_string();
    config.search.index_name = "customers".to_string();
    config.completion.endpoint = server.uri();
    config.completion.api_key = "chat-key".to_string();
    config.embedding.endpoint = server.uri();
    config.embedding.api_key = "embed-key".to_string();
    config.embedding.dimensions = DIMENSIONS;
    config.http.retry_attempts = 1;
    config.http.timeout_seconds = 5;
    config
}

async fn mount_ai_services(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(header("api-key", "chat-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"choices": [{"message": {"role": "assistant", "content": " A valued customer. "}}]}"#,
        ))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/text-embedding-3-large/embeddings"))
        .and(header("api-key", "embed-key"))
        .and(body_partial_json(json!({"input": ["A valued customer."]})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]}"#),
        )
        .mount(server)
        .await;
}

fn request_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).expect("request body should be JSON")
}

#[tokio::test(flavor = "multi_thread")]
async fn publishes_customer_table() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;
    mount_ai_services(&server).await;

    Mock::given(method("PUT"))
        .and(path("/indexes/customers"))
        .and(header("api-key", "search-key"))
        .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes/customers/docs/index"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let report = run_pipeline(test_config(database_url, &server), &RunOptions::default())
        .await
        .expect("run should succeed");

    assert_eq!(report.records_retrieved, 3);
    assert_eq!(report.documents_uploaded, Some(3));

    let requests = server.received_requests().await.expect("recording enabled");
    let definition = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .map(request_json)
        .expect("index definition sent");
    let field_names: Vec<&str> = definition["fields"]
        .as_array()
        .expect("fields array")
        .iter()
        .filter_map(|f| f["name"].as_str())
        .collect();
    assert_eq!(
        field_names,
        vec!["CustomerId", TEXT_FIELD, VECTOR_FIELD, "Name", "Balance", "Active", "SignedUp"]
    );
    assert_eq!(definition["fields"][0]["key"], json!(true));
    assert_eq!(definition["fields"][2]["dimensions"], json!(DIMENSIONS));
    assert_eq!(definition["fields"][6]["type"], json!("Edm.DateTimeOffset"));

    let upload = requests
        .iter()
        .find(|r| r.url.path() == "/indexes/customers/docs/index")
        .map(request_json)
        .expect("documents uploaded");
    let first = &upload["value"][0];
    assert_eq!(first["@search.action"], json!("mergeOrUpload"));
    assert_eq!(first["CustomerId"], json!("42"));
    assert_eq!(first["Name"], json!("Ada"));
    assert_eq!(first["Active"], json!(true));
    assert_eq!(first[TEXT_FIELD], json!("A valued customer."));
    assert_eq!(first[VECTOR_FIELD].as_array().map(Vec::len), Some(3));
    assert_eq!(upload["value"][2]["CustomerId"], json!("44"));
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_writes_documents_without_publishing() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;
    mount_ai_services(&server).await;

    Mock::given(path_regex("^/indexes"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let output = temp_dir.path().join("documents.json");
    let options = RunOptions {
        dry_run: true,
        limit: Some(2),
        concurrency: Some(2),
        output: Some(output.clone()),
        ..RunOptions::default()
    };

    let report = run_pipeline(test_config(database_url, &server), &options)
        .await
        .expect("dry run should succeed");

    assert_eq!(report.documents_uploaded, None);
    assert_eq!(report.documents.len(), 2);

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&output).expect("output written"))
            .expect("output is JSON");
    assert_eq!(written["index"]["name"], json!("customers"));
    assert_eq!(written["documents"][0]["CustomerId"], json!("42"));
    assert_eq!(written["documents"][1]["CustomerId"], json!("43"));
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_failure_stops_before_index_changes() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"choices": [{"message": {"content": "A valued customer."}}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/text-embedding-3-large/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error": {"message": "This model's maximum context length is 8192 tokens."}}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(path_regex("^/indexes"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let error = run_pipeline(test_config(database_url, &server), &RunOptions::default())
        .await
        .expect_err("run should abort");

    let indexer_error = error
        .downcast_ref::<IndexerError>()
        .expect("pipeline error is an IndexerError");
    assert!(matches!(indexer_error, IndexerError::Embedding(m) if m.contains("maximum context length")));
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_vector_policy_still_publishes() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"choices": [{"message": {"content": "A valued customer."}}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/text-embedding-3-large/embeddings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"data": [{"index": 0, "embedding": [0.1, 0.2]}]}"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes/customers/docs/index"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"value": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let options = RunOptions {
        on_embedding_failure: Some(EmbeddingFailurePolicy::ZeroVector),
        ..RunOptions::default()
    };
    let report = run_pipeline(test_config(database_url, &server), &options)
        .await
        .expect("run should succeed");

    assert_eq!(report.zero_vectors, 3);
    assert_eq!(
        report.documents[0].get(VECTOR_FIELD),
        Some(&json!([0.0, 0.0, 0.0]))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn schema_command_calls_no_services() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;
    Mock::given(path_regex(".*"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let definition = show_schema(test_config(database_url, &server), &RunOptions::default())
        .await
        .expect("schema should be inferred");

    assert_eq!(definition.name, "customers");
    assert_eq!(definition.fields.len(), 7);
    let balance = definition
        .fields
        .iter()
        .find(|f| f.name == "Balance")
        .expect("Balance field");
    assert_eq!(balance.field_type, FieldType::Double);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_key_column_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database_url = create_customer_table(&temp_dir).await;
    let server = MockServer::start().await;

    let options = RunOptions {
        key_column: Some("AccountNumber".to_string()),
        ..RunOptions::default()
    };
    let error = show_schema(test_config(database_url, &server), &options)
        .await
        .expect_err("missing key column should fail");

    assert!(error.to_string().contains("AccountNumber"));
}
