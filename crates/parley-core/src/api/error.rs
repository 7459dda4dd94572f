use eventsource_stream::EventStreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseParseError {
    #[error("UTF-8 error: {details}")]
    Utf8 { details: String },
    #[error("Parse error: {details}")]
    Parser { details: String },
    #[error("Transport error: {details}")]
    Transport { details: String },
}

impl<E> From<EventStreamError<E>> for SseParseError
where
    E: std::error::Error,
{
    fn from(err: EventStreamError<E>) -> Self {
        match err {
            EventStreamError::Utf8(err) => Self::Utf8 {
                details: err.to_string(),
            },
            EventStreamError::Parser(err) => Self::Parser {
                details: err.to_string(),
            },
            EventStreamError::Transport(err) => Self::Transport {
                details: err.to_string(),
            },
        }
    }
}

/// Failures of the HTTP collaborators.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status_code}: {details}")]
    ServerError {
        endpoint: String,
        status_code: u16,
        details: String,
    },

    #[error("Request to {endpoint} cancelled")]
    Cancelled { endpoint: String },

    #[error("Failed to parse response from {endpoint}: {details}")]
    ResponseParsingError { endpoint: String, details: String },

    #[error("Stream error from {endpoint}: {details}")]
    StreamError { endpoint: String, details: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled { .. })
    }
}
