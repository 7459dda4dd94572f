use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Body posted to the tool execution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_source_id: String,
    pub tool_name: String,
    pub tool_args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutputPart {
    #[serde(default)]
    pub text: String,
}

/// Response of the tool execution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ToolOutputPart>,
    /// `None` when the endpoint did not report an outcome at all.
    #[serde(default)]
    pub is_error: Option<bool>,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputPart { text: text.into() }],
            is_error: Some(false),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputPart { text: text.into() }],
            is_error: Some(true),
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|part| part.text.as_str())
    }

    /// Interpret the response: the first text part on success, a
    /// [`ToolError`] when the endpoint flagged an error or omitted the flag.
    pub fn into_result(self, tool_name: &str) -> Result<String, ToolError> {
        match self.is_error {
            Some(false) => Ok(self.first_text().unwrap_or_default().to_string()),
            Some(true) => {
                let message = self
                    .first_text()
                    .filter(|text| !text.is_empty())
                    .unwrap_or("tool execution failed");
                Err(ToolError::execution(tool_name, message))
            }
            None => Err(ToolError::EmptyResponse(tool_name.to_string())),
        }
    }
}
