// Azure OpenAI REST clients
// Chat completions back the TextProvider, embeddings back the EmbeddingProvider.


use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::{CompletionConfig, EmbeddingConfig};
use crate::embeddings::EmbeddingProvider;
use crate::http::HttpClient;
use crate::summary::TextProvider;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// URL of a deployment operation, e.g. `.../openai/deployments/gpt-4o/chat/completions?api-version=...`.
#[inline]
pub fn deployment_url(
    endpoint: &Url,
    deployment: &str,
    operation: &str,
    api_version: &str,
) -> Result<Url> {
    let mut url = endpoint
        .join(&format!("openai/deployments/{deployment}/{operation}"))
        .context("Failed to build deployment URL")?;
    url.query_pairs_mut().append_pair("api-version", api_version);
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    url: Url,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    http: HttpClient,
}

impl ChatCompletionClient {
    #[inline]
    pub fn new(config: &CompletionConfig, http: HttpClient) -> Result<Self> {
        let endpoint = config
            .endpoint_url()
            .context("Invalid completion endpoint")?;
        let url = deployment_url(
            &endpoint,
            &config.deployment,
            "chat/completions",
            &config.api_version,
        )?;
        info!("Using chat deployment {} at {}", config.deployment, endpoint);

        Ok(Self {
            url,
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http,
        })
    }
}

impl TextProvider for ChatCompletionClient {
    fn complete(&self, system_instruction: &str, user_prompt: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize chat request")?;

        let response_text = self
            .http
            .post_json(self.url.as_str(), &self.api_key, &request_json)
            .context("Chat completion request failed")?;

        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse chat response")?;

        let first = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Chat response contained no choices"))?;

        debug!("Received chat completion");
        Ok(first.message.content.unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    url: Url,
    api_key: String,
    http: HttpClient,
}

impl EmbeddingClient {
    #[inline]
    pub fn new(config: &EmbeddingConfig, http: HttpClient) -> Result<Self> {
        let endpoint = config
            .endpoint_url()
            .context("Invalid embedding endpoint")?;
        let url = deployment_url(
            &endpoint,
            &config.deployment,
            "embeddings",
            &config.api_version,
        )?;
        info!(
            "Using embedding deployment {} at {}",
            config.deployment, endpoint
        );

        Ok(Self {
            url,
            api_key: config.api_key.clone(),
            http,
        })
    }
}

impl EmbeddingProvider for EmbeddingClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest { input: [text] };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .http
            .post_json(self.url.as_str(), &self.api_key, &request_json)
            .context("Embedding request failed")?;

        let response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| anyhow!("Embedding response contained no data"))
    }
}
