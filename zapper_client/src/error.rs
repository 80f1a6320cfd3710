use retry_utils::RetryableError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZapperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ZapperError {
    /// How the retry loop should treat this failure
    pub fn retry_class(&self) -> RetryableError {
        match self {
            ZapperError::Http(e) if e.is_timeout() => RetryableError::Timeout,
            ZapperError::Http(e) if e.is_connect() || e.is_request() => RetryableError::ServerError,
            ZapperError::Api { status: 429, .. } => RetryableError::RateLimit,
            ZapperError::Api { status, .. } if *status >= 500 => RetryableError::ServerError,
            _ => RetryableError::Other,
        }
    }
}
