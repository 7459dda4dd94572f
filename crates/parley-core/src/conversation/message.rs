//! Persisted conversation messages.
//!
//! A [`Message`] is an ordered list of [`ContentBlock`]s: visible text,
//! reasoning, and groups of tool calls issued during one turn.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::Display;

use super::segment::ContentSegment;

/// Role in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Copy, Display)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStatus {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Progress,
    Success,
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Progress)
    }
}

/// One tool invocation and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub id: String,
    pub tool_source_id: String,
    pub name: String,
    pub description: String,
    pub input_params_json: String,
    pub output_params_json: Option<String>,
    pub status: ToolCallStatus,
}

impl ToolCallRecord {
    pub fn in_progress(
        tool_source_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        input_params_json: impl Into<String>,
    ) -> Self {
        Self {
            id: Message::generate_id("call"),
            tool_source_id: tool_source_id.into(),
            name: name.into(),
            description: description.into(),
            input_params_json: input_params_json.into(),
            output_params_json: None,
            status: ToolCallStatus::Progress,
        }
    }

    pub fn succeed(&mut self, output: impl Into<String>) {
        self.output_params_json = Some(output.into());
        self.status = ToolCallStatus::Success;
    }

    pub fn fail(&mut self, output: impl Into<String>) {
        self.output_params_json = Some(output.into());
        self.status = ToolCallStatus::Error;
    }
}

/// Tool calls issued together; the status is derived from the calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolGroup {
    pub group_id: String,
    pub status: ToolCallStatus,
    pub calls: Vec<ToolCallRecord>,
}

impl ToolGroup {
    pub fn new(calls: Vec<ToolCallRecord>) -> Self {
        Self::with_id(Message::generate_id("group"), calls)
    }

    pub fn with_id(group_id: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        let status = Self::aggregate_status(&calls);
        Self {
            group_id: group_id.into(),
            status,
            calls,
        }
    }

    /// `Success` when every call succeeded, `Error` when all are terminal and
    /// at least one failed, `Progress` otherwise (including no calls).
    pub fn aggregate_status(calls: &[ToolCallRecord]) -> ToolCallStatus {
        if calls.is_empty() || calls.iter().any(|call| !call.status.is_terminal()) {
            ToolCallStatus::Progress
        } else if calls
            .iter()
            .any(|call| call.status == ToolCallStatus::Error)
        {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Success
        }
    }

    pub fn push(&mut self, call: ToolCallRecord) {
        self.calls.push(call);
        self.recompute();
    }

    pub fn recompute(&mut self) -> ToolCallStatus {
        self.status = Self::aggregate_status(&self.calls);
        self.status
    }

    pub fn call_mut(&mut self, id: &str) -> Option<&mut ToolCallRecord> {
        self.calls.iter_mut().find(|call| call.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Plain {
        text: String,
    },
    Reasoning {
        text: String,
        status: ReasoningStatus,
    },
    ToolGroup(ToolGroup),
}

impl From<ContentSegment> for ContentBlock {
    fn from(segment: ContentSegment) -> Self {
        match segment {
            ContentSegment::Plain { text } => ContentBlock::Plain { text },
            ContentSegment::Reasoning { text, status } => ContentBlock::Reasoning { text, status },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: u64,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            vec![ContentBlock::Plain { text: text.into() }],
        )
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        let prefix = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            id: Self::generate_id(prefix),
            role,
            timestamp: Self::current_timestamp(),
            content,
        }
    }

    /// Helper to get current timestamp
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Helper to generate unique IDs
    pub fn generate_id(prefix: &str) -> String {
        use uuid::Uuid;
        format!("{}_{}", prefix, Uuid::now_v7())
    }

    /// Visible text: plain blocks joined by a blank line.
    pub fn rendered_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Plain { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn reasoning_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Reasoning { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn tool_groups(&self) -> impl Iterator<Item = &ToolGroup> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolGroup(group) => Some(group),
            _ => None,
        })
    }

    pub fn tool_groups_mut(&mut self) -> impl Iterator<Item = &mut ToolGroup> {
        self.content.iter_mut().filter_map(|block| match block {
            ContentBlock::ToolGroup(group) => Some(group),
            _ => None,
        })
    }

    pub fn tool_group_mut(&mut self, group_id: &str) -> Option<&mut ToolGroup> {
        self.tool_groups_mut()
            .find(|group| group.group_id == group_id)
    }

    /// The group still collecting calls, if any.
    pub fn progress_group_mut(&mut self) -> Option<&mut ToolGroup> {
        self.tool_groups_mut()
            .find(|group| group.status == ToolCallStatus::Progress)
    }
}
