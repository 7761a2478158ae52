// Embeddings module
// Embedding provider contract and the per-record embedding step


use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub trait EmbeddingProvider: Send + Sync {
    /// Embed exactly one input string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// What the pipeline does with a record whose embedding failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingFailurePolicy {
    /// Stop the run before anything is published.
    #[default]
    Abort,
    /// Leave the record out of the upload.
    Skip,
    /// Publish the record with an all-zero vector.
    ZeroVector,
}

impl std::fmt::Display for EmbeddingFailurePolicy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            EmbeddingFailurePolicy::Abort => write!(f, "abort"),
            EmbeddingFailurePolicy::Skip => write!(f, "skip"),
            EmbeddingFailurePolicy::ZeroVector => write!(f, "zero-vector"),
        }
    }
}

impl std::str::FromStr for EmbeddingFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "abort" => Ok(EmbeddingFailurePolicy::Abort),
            "skip" => Ok(EmbeddingFailurePolicy::Skip),
            "zero-vector" => Ok(EmbeddingFailurePolicy::ZeroVector),
            other => Err(format!(
                "unknown embedding failure policy '{other}' (expected abort, skip or zero-vector)"
            )),
        }
    }
}

pub struct Embedder<'a> {
    provider: &'a dyn EmbeddingProvider,
    dimensions: usize,
}

impl<'a> Embedder<'a> {
    #[inline]
    pub fn new(provider: &'a dyn EmbeddingProvider, dimensions: usize) -> Self {
        Self {
            provider,
            dimensions,
        }
    }

    /// Embed a text. The vector is returned as the provider produced it;
    /// only its length is checked.
    #[inline]
    pub fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        debug!("Generating embedding for text (length: {})", text.len());

        let vector = self
            .provider
            .embed(text)
            .map_err(|e| EmbeddingError::Provider(format!("{e:#}")))?;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }

        debug!("Generated embedding with {} dimensions", vector.len());
        Ok(vector)
    }

    #[inline]
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimensions]
    }
}
