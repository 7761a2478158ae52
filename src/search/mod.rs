// Search index publisher
// Creates or updates the index definition and uploads documents in batches


use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::IndexerError;
use crate::config::SearchConfig;
use crate::document::Document;
use crate::http::HttpClient;
use crate::schema::IndexDefinition;

/// Indexing requests above 16 MiB are rejected by the service; keep headroom
/// for the envelope.
pub const MAX_REQUEST_BYTES: usize = 15 * 1024 * 1024;

const PAYLOAD_TOO_LARGE: u16 = 413;

pub trait IndexPublisher: Send + Sync {
    fn create_or_update_index(&self, definition: &IndexDefinition) -> crate::Result<()>;

    /// Upload documents; returns how many were accepted.
    fn upload(&self, index_name: &str, documents: &[Document]) -> crate::Result<usize>;
}

const MERGE_OR_UPLOAD: &str = "mergeOrUpload";

#[derive(Debug, Serialize)]
struct UploadBatch<'a> {
    value: Vec<UploadAction<'a>>,
}

#[derive(Debug, Serialize)]
struct UploadAction<'a> {
    #[serde(rename = "@search.action")]
    action: &'static str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    value: Vec<UploadResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchIndexClient {
    endpoint: Url,
    api_key: String,
    api_version: String,
    batch_size: usize,
    max_request_bytes: usize,
    http: HttpClient,
}

impl SearchIndexClient {
    #[inline]
    pub fn new(config: &SearchConfig, http: HttpClient) -> anyhow::Result<Self> {
        let endpoint = config.endpoint_url().context("Invalid search endpoint")?;
        info!("Using search service at {}", endpoint);

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            batch_size: config.upload_batch_size.max(1),
            max_request_bytes: MAX_REQUEST_BYTES,
            http,
        })
    }

    #[inline]
    pub fn with_max_request_bytes(mut self, max_request_bytes: usize) -> Self {
        self.max_request_bytes = max_request_bytes.max(1);
        self
    }

    /// Split documents into consecutive batches bounded by both the document
    /// count and the serialized request size. A single oversized document
    /// still gets its own batch.
    fn plan_batches(&self, documents: &[Document]) -> serde_json::Result<Vec<std::ops::Range<usize>>> {
        // `{"value":[` + `]}`
        const ENVELOPE_BYTES: usize = 12;

        let mut batches = Vec::new();
        let mut start = 0;
        let mut bytes = ENVELOPE_BYTES;

        for (position, document) in documents.iter().enumerate() {
            let action = UploadAction {
                action: MERGE_OR_UPLOAD,
                fields: document.fields(),
            };
            // One extra byte for the separating comma.
            let size = serde_json::to_vec(&action)?.len() + 1;
            let count = position - start;

            if count > 0 && (count >= self.batch_size || bytes + size > self.max_request_bytes) {
                batches.push(start..position);
                start = position;
                bytes = ENVELOPE_BYTES;
            }
            bytes += size;
        }
        if start < documents.len() {
            batches.push(start..documents.len());
        }

        Ok(batches)
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        let mut url = self
            .endpoint
            .join(path)
            .with_context(|| format!("Failed to build search URL for {path}"))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn upload_batch(&self, index_name: &str, documents: &[Document]) -> crate::Result<usize> {
        let upload_error = |message: String| IndexerError::Upload {
            index: index_name.to_string(),
            message,
        };

        let url = self
            .url(&format!("indexes/{index_name}/docs/index"))
            .map_err(|e| upload_error(format!("{e:#}")))?;

        let batch = UploadBatch {
            value: documents
                .iter()
                .map(|document| UploadAction {
                    action: MERGE_OR_UPLOAD,
                    fields: document.fields(),
                })
                .collect(),
        };
        let body = serde_json::to_string(&batch)
            .map_err(|e| upload_error(format!("failed to serialize documents: {e}")))?;

        let response_text = match self.http.post_json(url.as_str(), &self.api_key, &body) {
            Ok(text) => text,
            Err(err) if err.status() == Some(PAYLOAD_TOO_LARGE) && documents.len() > 1 => {
                let (left, right) = documents.split_at(documents.len() / 2);
                warn!(
                    "Batch of {} documents ({} bytes) too large, splitting in half",
                    documents.len(),
                    body.len()
                );
                return Ok(self.upload_batch(index_name, left)? + self.upload_batch(index_name, right)?);
            }
            Err(err) => return Err(upload_error(err.to_string())),
        };

        let response: UploadResponse = serde_json::from_str(&response_text)
            .map_err(|e| upload_error(format!("failed to parse upload response: {e}")))?;

        let failures: Vec<String> = response
            .value
            .iter()
            .filter(|result| !result.status)
            .map(|result| {
                format!(
                    "{}: {}",
                    result.key,
                    result.error_message.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        if !failures.is_empty() {
            return Err(upload_error(format!(
                "{} of {} documents rejected ({})",
                failures.len(),
                documents.len(),
                failures.join("; ")
            )));
        }

        Ok(documents.len())
    }
}

impl IndexPublisher for SearchIndexClient {
    fn create_or_update_index(&self, definition: &IndexDefinition) -> crate::Result<()> {
        let publish_error = |message: String| IndexerError::SchemaPublish {
            index: definition.name.clone(),
            message,
        };

        let url = self
            .url(&format!("indexes/{}", definition.name))
            .map_err(|e| publish_error(format!("{e:#}")))?;
        let body = serde_json::to_string(definition)
            .map_err(|e| publish_error(format!("failed to serialize index definition: {e}")))?;

        debug!(
            "Creating or updating index {} with {} fields",
            definition.name,
            definition.fields.len()
        );
        self.http
            .put_json(url.as_str(), &self.api_key, &body)
            .map_err(|e| publish_error(e.to_string()))?;

        info!("Index {} created or updated", definition.name);
        Ok(())
    }

    fn upload(&self, index_name: &str, documents: &[Document]) -> crate::Result<usize> {
        let batches = self.plan_batches(documents).map_err(|e| IndexerError::Upload {
            index: index_name.to_string(),
            message: format!("failed to serialize documents: {e}"),
        })?;

        let mut uploaded = 0;
        for (number, range) in batches.into_iter().enumerate() {
            debug!("Uploading batch {} ({} documents)", number + 1, range.len());
            uploaded += self.upload_batch(index_name, &documents[range])?;
        }
        info!("Uploaded {} documents to {}", uploaded, index_name);
        Ok(uploaded)
    }
}
