use thiserror::Error;

use crate::api::ApiError;
use crate::conversation::RepositoryError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while assembling the engine: configuration, logging and the
/// HTTP adapter.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Failures surfaced by the session controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("No model selected")]
    NoModelSelected,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to open stream (status {status}): {details}")]
    OpenFailed { status: u16, details: String },

    #[error("Expected an event stream, got {content_type}")]
    UnexpectedContentType { content_type: String },

    #[error("Cannot parse non-stream response ({content_type})")]
    CannotParseFallback { content_type: String },

    #[error("Server reported an error: {0}")]
    ServerReported(String),

    #[error("Malformed event payload: {0}")]
    MalformedEventPayload(String),

    #[error("No data received for {0} seconds")]
    IdleTimeout(u64),

    #[error("Response not finished within {0} seconds")]
    TotalTimeout(u64),

    #[error("Stream closed before the response completed")]
    StreamClosed,

    #[error("No selected tool source exports {0}")]
    ToolResolutionFailure(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("No previous message to resend")]
    NothingToResend,

    #[error("A resend is already in progress")]
    ResendInProgress,

    #[error("Session controller has shut down")]
    Shutdown,
}

impl EngineError {
    /// Map a failure to open the stream request.
    pub fn from_open(err: ApiError) -> Self {
        match err {
            ApiError::ServerError {
                status_code,
                details,
                ..
            } => EngineError::OpenFailed {
                status: status_code,
                details,
            },
            other => EngineError::Transport(other.to_string()),
        }
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<RepositoryError> for EngineError {
    fn from(err: RepositoryError) -> Self {
        EngineError::Repository(err.to_string())
    }
}
