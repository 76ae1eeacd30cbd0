use std::time::Duration;

use thiserror::Error;

/// Streaming service error types
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status} from {url}: {body}")]
    Http {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Gave up polling {url} after {waited:?}")]
    Timeout { url: String, waited: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed ICE candidate: {0}")]
    MalformedCandidate(String),

    #[error("Malformed exchange response: {0}")]
    MalformedExchange(String),

    #[error("Invalid session path: {0}")]
    InvalidSessionPath(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, StreamError>;
