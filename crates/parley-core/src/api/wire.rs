//! JSON bodies exchanged with the conversation server.

use parley_tools::{ToolDescriptor, ToolDirective, ToolSourceCatalog};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::DeltaKind;

/// Body of a stream request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_source_ids: Vec<String>,
    /// Set on continuation turns: the group whose result `content` carries.
    #[serde(
        default,
        rename = "toolGroupID",
        alias = "toolGroupId",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_group_id: Option<String>,
}

/// One decoded stream packet.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "is_complete")]
    pub is_complete: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub thoughts: Option<String>,
    #[serde(default, rename = "tool_calls", alias = "toolCalls")]
    pub tool_calls: Option<Vec<ToolDirective>>,
    /// Server-issued group the packet's tool calls belong to.
    #[serde(default, rename = "tool_group_id", alias = "toolGroupId")]
    pub tool_group_id: Option<String>,
}

impl StreamEvent {
    pub fn response_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn tool_group_id(&self) -> Option<&str> {
        self.tool_group_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete.unwrap_or(false)
    }

    pub fn delta_kind(&self) -> DeltaKind {
        DeltaKind::classify(self.is_complete(), self.kind.as_deref())
    }

    pub fn take_tool_calls(&mut self) -> Vec<ToolDirective> {
        self.tool_calls.take().unwrap_or_default()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventPayload {
    Envelope { data: StreamEvent },
    Bare(StreamEvent),
}

/// Decode an SSE `data:` payload, with or without the `{bcode, data}` envelope.
pub fn parse_stream_event(data: &str) -> Result<StreamEvent, serde_json::Error> {
    let payload: EventPayload = serde_json::from_str(data)?;
    Ok(match payload {
        EventPayload::Envelope { data } | EventPayload::Bare(data) => data,
    })
}

/// Body of a non-stream reply to a stream request.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FallbackBody {
    #[serde(default)]
    pub data: Option<FallbackData>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FallbackData {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Content(String),
    ServerError(String),
}

impl FallbackBody {
    /// `None` when the body carries neither content nor an error.
    pub fn parse(body: &str) -> Option<FallbackOutcome> {
        let parsed: FallbackBody = serde_json::from_str(body).ok()?;
        if let Some(content) = parsed.data.and_then(|data| data.content) {
            return Some(FallbackOutcome::Content(content));
        }
        parsed.error.map(|error| {
            let message = match &error {
                Value::String(message) => message.clone(),
                Value::Object(fields) => fields
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| error.to_string(), str::to_string),
                other => other.to_string(),
            };
            FallbackOutcome::ServerError(message)
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CatalogRequest<'a> {
    pub tool_source_ids: &'a [String],
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CatalogResponse {
    #[serde(default)]
    pub mcp_tools: Vec<SourceTools>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourceTools {
    pub mcp_id: String,
    #[serde(default)]
    pub tools: Vec<FunctionTool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionTool {
    pub function: ToolDescriptor,
}

impl CatalogResponse {
    pub fn into_catalogs(self) -> Vec<ToolSourceCatalog> {
        self.mcp_tools
            .into_iter()
            .map(|source| {
                ToolSourceCatalog::new(
                    source.mcp_id,
                    source.tools.into_iter().map(|tool| tool.function).collect(),
                )
            })
            .collect()
    }
}
