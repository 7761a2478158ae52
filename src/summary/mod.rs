
use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::record::Record;

pub const SYSTEM_INSTRUCTION: &str = "You are an assistant that writes concise, factual summaries of database records so they can be indexed for search.";
pub const DEFAULT_SUMMARY_LANGUAGE: &str = "English (en-US)";
pub const PROMPT_DELIMITER: &str = "---";

pub const EMPTY_SUMMARY_FALLBACK: &str = "No summary generated for the record.";
pub const ERROR_SUMMARY_FALLBACK: &str = "Error generating text representation.";

/// A generative text provider: one system instruction, one user turn, first completion back.
pub trait TextProvider: Send + Sync {
    fn complete(&self, system_instruction: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("text provider failed: {0}")]
    Provider(String),
    #[error("text provider returned an empty completion")]
    Empty,
}

impl SummaryError {
    /// The sentinel text stored in place of a summary.
    #[inline]
    pub fn fallback_text(&self) -> &'static str {
        match self {
            SummaryError::Provider(_) => ERROR_SUMMARY_FALLBACK,
            SummaryError::Empty => EMPTY_SUMMARY_FALLBACK,
        }
    }
}

/// Build the user prompt for one record.
#[inline]
pub fn build_prompt(record: &Record, language: &str) -> String {
    format!(
        "Write a concise summary in {language} of the following record, suitable for search indexing.\n{PROMPT_DELIMITER}\n{}{PROMPT_DELIMITER}",
        record.to_prompt_lines()
    )
}

pub struct Summarizer<'a> {
    provider: &'a dyn TextProvider,
    language: &'a str,
}

impl<'a> Summarizer<'a> {
    #[inline]
    pub fn new(provider: &'a dyn TextProvider, language: &'a str) -> Self {
        Self { provider, language }
    }

    /// One summarization attempt. Failures are returned, never swallowed.
    #[inline]
    pub fn try_summarize(&self, record: &Record) -> Result<String, SummaryError> {
        let prompt = build_prompt(record, self.language);
        debug!("Summarizing record with {} fields", record.len());

        let completion = self
            .provider
            .complete(SYSTEM_INSTRUCTION, &prompt)
            .map_err(|e| SummaryError::Provider(format!("{e:#}")))?;

        let trimmed = completion.trim();
        if trimmed.is_empty() {
            Err(SummaryError::Empty)
        } else {
            Ok(trimmed.to_string())
        }
    }

    /// Summary text for a record, substituting the sentinel on failure.
    /// Never returns an empty string.
    #[inline]
    pub fn summarize(&self, record: &Record) -> String {
        summary_or_fallback(self.try_summarize(record))
    }
}

/// Apply the fail-open policy to a summary attempt.
#[inline]
pub fn summary_or_fallback(attempt: Result<String, SummaryError>) -> String {
    match attempt {
        Ok(summary) => summary,
        Err(err @ SummaryError::Empty) => {
            warn!("{}", err);
            err.fallback_text().to_string()
        }
        Err(err) => {
            error!("Error generating summary: {}", err);
            err.fallback_text().to_string()
        }
    }
}
