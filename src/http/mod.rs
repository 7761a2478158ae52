// Shared blocking HTTP layer for the provider clients
// Retries are client configuration; the pipeline itself never retries.


use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};
use ureq::Body;
use ureq::http::Response;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl HttpError {
    #[inline]
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Pull the most useful message out of an error body. Both Azure services
/// answer with `{"error": {"message": ...}}`.
#[inline]
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .or_else(|| json.get("error"))
                .or_else(|| json.get("message"))
                .and_then(|message| message.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_base: Duration,
}

impl HttpClient {
    #[inline]
    pub fn new(timeout: Duration, retry_attempts: u32) -> Self {
        Self {
            agent: Self::build_agent(timeout),
            retry_attempts: retry_attempts.max(1),
            backoff_base: Duration::from_secs(1),
        }
    }

    fn build_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into()
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = Self::build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay between attempts; doubles after every failure.
    #[inline]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// POST a JSON body and return the response text.
    #[inline]
    pub fn post_json(&self, url: &str, api_key: &str, body: &str) -> Result<String, HttpError> {
        self.execute_with_retry(url, || {
            self.agent
                .post(url)
                .header("Content-Type", "application/json")
                .header("api-key", api_key)
                .send(body)
        })
    }

    /// PUT a JSON body and return the response text.
    #[inline]
    pub fn put_json(&self, url: &str, api_key: &str, body: &str) -> Result<String, HttpError> {
        self.execute_with_retry(url, || {
            self.agent
                .put(url)
                .header("Content-Type", "application/json")
                .header("api-key", api_key)
                .send(body)
        })
    }

    fn execute_with_retry<F>(&self, url: &str, mut request_fn: F) -> Result<String, HttpError>
    where
        F: FnMut() -> Result<Response<Body>, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{} to {}", attempt, self.retry_attempts, url);

            let error = match request_fn() {
                Ok(mut response) => {
                    let status = response.status().as_u16();
                    let text = response
                        .body_mut()
                        .read_to_string()
                        .map_err(|e| HttpError::Decode(e.to_string()))?;

                    if (200..300).contains(&status) {
                        debug!("Request succeeded on attempt {}", attempt);
                        return Ok(text);
                    }

                    let error = HttpError::Status {
                        status,
                        message: extract_error_message(&text),
                    };
                    if status == 429 || status >= 500 {
                        warn!(
                            "Server error (status {}), attempt {}/{}",
                            status, attempt, self.retry_attempts
                        );
                        error
                    } else {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(error);
                    }
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    HttpError::Transport(error.to_string())
                }
                Err(error) => {
                    warn!("Non-retryable error: {}", error);
                    return Err(HttpError::Transport(error.to_string()));
                }
            };

            last_error = Some(error);

            if attempt < self.retry_attempts {
                let delay = self.backoff_base * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", url);

        Err(last_error
            .unwrap_or_else(|| HttpError::Transport("Request failed after retries".to_string())))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            DEFAULT_RETRY_ATTEMPTS,
        )
    }
}
