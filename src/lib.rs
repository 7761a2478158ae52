use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source fetch error: {0}")]
    SourceFetch(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Schema publish error for index '{index}': {message}")]
    SchemaPublish { index: String, message: String },

    #[error("Upload error for index '{index}': {message}")]
    Upload { index: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod http;
pub mod openai;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod search;
pub mod source;
pub mod summary;
