use retry_utils::RetryableError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Run {run_id} ended as {status}: {message}")]
    RunFailed {
        run_id: String,
        status: String,
        message: String,
    },

    #[error("Run {run_id} still pending after {waited:?}")]
    PollTimeout { run_id: String, waited: Duration },

    #[error("Thread {thread_id} has no assistant reply")]
    NoReply { thread_id: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AssistantError {
    /// How the retry loop should treat this failure. Auth and bad-request
    /// errors stop immediately; everything the provider may recover from is
    /// retried.
    pub fn retry_class(&self) -> RetryableError {
        match self {
            AssistantError::Http(e) if e.is_timeout() => RetryableError::Timeout,
            AssistantError::Http(e) if e.is_connect() || e.is_request() => {
                RetryableError::ServerError
            }
            AssistantError::Api { status: 429, .. } => RetryableError::RateLimit,
            AssistantError::Api { status, .. } if *status >= 500 => RetryableError::ServerError,
            AssistantError::RunFailed { .. } | AssistantError::NoReply { .. } => {
                RetryableError::ServerError
            }
            AssistantError::PollTimeout { .. } => RetryableError::Timeout,
            _ => RetryableError::Other,
        }
    }
}
