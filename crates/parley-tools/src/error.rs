use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("{tool_name} failed: {message}")]
    Execution { tool_name: String, message: String },

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("Failed to reach tool endpoint for {tool_name}: {message}")]
    Transport { tool_name: String, message: String },
}

impl ToolError {
    pub fn execution<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Execution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn transport<T: Into<String>, M: Into<String>>(tool_name: T, message: M) -> Self {
        ToolError::Transport {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Text recorded as the output of a failed call.
    ///
    /// Execution failures carry the endpoint's own message verbatim; every
    /// other variant falls back to its display form.
    pub fn output_text(&self) -> String {
        match self {
            ToolError::Execution { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
