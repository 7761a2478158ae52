
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::embeddings::EmbeddingFailurePolicy;
use crate::http::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, HttpClient};
use crate::schema::DEFAULT_EMBEDDING_DIMENSION;
use crate::summary::DEFAULT_SUMMARY_LANGUAGE;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_ROW_LIMIT: u32 = 1000;
pub const MAX_UPLOAD_BATCH_SIZE: usize = 1000;
/// Roughly 65 KiB per document with 3072-dimension vectors; the publisher
/// also splits batches by request size.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 100;

pub const ENV_DATABASE_URL: &str = "TABLE_INDEXER_DATABASE_URL";
pub const ENV_SEARCH_API_KEY: &str = "TABLE_INDEXER_SEARCH_API_KEY";
pub const ENV_COMPLETION_API_KEY: &str = "TABLE_INDEXER_COMPLETION_API_KEY";
pub const ENV_EMBEDDING_API_KEY: &str = "TABLE_INDEXER_EMBEDDING_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// sqlx connection URL, e.g. `sqlite://data/customers.db`
    pub database_url: String,
    pub table: String,
    pub key_column: Option<String>,
    pub row_limit: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            table: String::new(),
            key_column: None,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: String,
    pub index_name: String,
    pub api_version: String,
    pub upload_batch_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            index_name: String::new(),
            api_version: "2024-07-01".to_string(),
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Language variant the summaries are written in.
    pub language: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-06-01".to_string(),
            max_tokens: 300,
            temperature: 0.2,
            language: DEFAULT_SUMMARY_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub dimensions: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            deployment: "text-embedding-3-large".to_string(),
            api_version: "2024-06-01".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records enriched at the same time. 1 keeps the run strictly sequential.
    pub concurrency: usize,
    pub on_embedding_failure: EmbeddingFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            on_embedding_failure: EmbeddingFailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL for {0}: {1}")]
    InvalidUrl(&'static str, String),
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),
    #[error("Invalid row limit: {0} (must be between 1 and 100000)")]
    InvalidRowLimit(u32),
    #[error("Invalid upload batch size: {0} (must be between 1 and 1000)")]
    InvalidUploadBatchSize(usize),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid concurrency: {0} (must be between 1 and 64)")]
    InvalidConcurrency(usize),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Parse an endpoint and make sure its path ends with `/` so relative joins append.
#[inline]
pub fn parse_endpoint(name: &'static str, endpoint: &str) -> Result<Url, ConfigError> {
    let trimmed = endpoint.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|_| ConfigError::InvalidUrl(name, endpoint.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(name, endpoint.to_string()));
    }
    Ok(url)
}

fn validate_optional_endpoint(name: &'static str, endpoint: &str) -> Result<(), ConfigError> {
    if endpoint.trim().is_empty() {
        return Ok(());
    }
    parse_endpoint(name, endpoint).map(|_| ())
}

fn require(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingSetting(name))
    } else {
        Ok(())
    }
}

impl Config {
    /// Platform configuration directory for this tool.
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("table-indexer"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when it
    /// does not exist. Environment overrides are applied before validation.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load only what `config.toml` holds. Environment overrides are never
    /// applied, so a config saved from this value carries no env secrets.
    #[inline]
    pub fn load_file<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            debug!("No config file at {}, using defaults", config_path.display());
            Config::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Secrets and the database URL may come from the environment instead of the file.
    #[inline]
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            (ENV_DATABASE_URL, &mut self.source.database_url),
            (ENV_SEARCH_API_KEY, &mut self.search.api_key),
            (ENV_COMPLETION_API_KEY, &mut self.completion.api_key),
            (ENV_EMBEDDING_API_KEY, &mut self.embedding.api_key),
        ];
        for (var, target) in overrides {
            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {
                    debug!("Using {} from environment", var);
                    *target = value;
                }
                _ => {}
            }
        }
    }

    /// Range checks. Empty endpoints are allowed here so a partially filled
    /// file can still be loaded and edited.
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100_000).contains(&self.source.row_limit) {
            return Err(ConfigError::InvalidRowLimit(self.source.row_limit));
        }
        if !self.source.table.is_empty() {
            validate_table_name(&self.source.table)?;
        }

        validate_optional_endpoint("search", &self.search.endpoint)?;
        validate_optional_endpoint("completion", &self.completion.endpoint)?;
        validate_optional_endpoint("embedding", &self.embedding.endpoint)?;

        if !(1..=MAX_UPLOAD_BATCH_SIZE).contains(&self.search.upload_batch_size) {
            return Err(ConfigError::InvalidUploadBatchSize(
                self.search.upload_batch_size,
            ));
        }
        if !(1..=4096).contains(&self.embedding.dimensions) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding.dimensions,
            ));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ConfigError::InvalidTemperature(self.completion.temperature));
        }
        if !(1..=64).contains(&self.pipeline.concurrency) {
            return Err(ConfigError::InvalidConcurrency(self.pipeline.concurrency));
        }
        if !(1..=600).contains(&self.http.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.http.timeout_seconds));
        }
        if !(1..=10).contains(&self.http.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.http.retry_attempts));
        }

        Ok(())
    }

    /// Settings needed to read from the source table.
    #[inline]
    pub fn ensure_source_ready(&self) -> Result<(), ConfigError> {
        self.validate()?;
        require("source.database_url", &self.source.database_url)?;
        require("source.table", &self.source.table)?;
        Ok(())
    }

    /// Settings needed for a full run, including publishing unless `dry_run`.
    #[inline]
    pub fn ensure_run_ready(&self, dry_run: bool) -> Result<(), ConfigError> {
        self.ensure_source_ready()?;

        require("completion.endpoint", &self.completion.endpoint)?;
        require("completion.api_key", &self.completion.api_key)?;
        require("completion.deployment", &self.completion.deployment)?;
        require("embedding.endpoint", &self.embedding.endpoint)?;
        require("embedding.api_key", &self.embedding.api_key)?;
        require("embedding.deployment", &self.embedding.deployment)?;
        require("search.index_name", &self.search.index_name)?;

        if !dry_run {
            require("search.endpoint", &self.search.endpoint)?;
            require("search.api_key", &self.search.api_key)?;
        }

        Ok(())
    }

    /// HTTP client shared by every provider client.
    #[inline]
    pub fn http_client(&self) -> HttpClient {
        HttpClient::new(
            Duration::from_secs(self.http.timeout_seconds),
            self.http.retry_attempts,
        )
    }
}

/// Table names are quoted when queried; reject the few characters that
/// cannot appear in a quoted SQLite identifier.
#[inline]
pub fn validate_table_name(table: &str) -> Result<(), ConfigError> {
    if table.trim().is_empty() || table.contains('\0') || table.len() > 128 {
        return Err(ConfigError::InvalidTable(table.to_string()));
    }
    Ok(())
}

impl SearchConfig {
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_endpoint("search", &self.endpoint)
    }
}

impl CompletionConfig {
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_endpoint("completion", &self.endpoint)
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        parse_endpoint("embedding", &self.endpoint)
    }
}

/// Show only the last four characters of a secret.
#[inline]
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}
