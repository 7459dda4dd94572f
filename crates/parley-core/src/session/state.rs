use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::conversation::ResponseBuffers;

/// Where the controller is in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    ToolPending,
    Completing,
    Cancelling,
    Erroring,
}

/// Conversation state owned by the controller.
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    pub session_id: Option<String>,
    /// Ordered, without duplicates.
    pub selected_tool_source_ids: Vec<String>,
    pub last_user_input: Option<String>,
    pub buffers: ResponseBuffers,
    pub tool_call_active: bool,
    /// Server-assigned id of the response being streamed.
    pub pending_response_id: Option<String>,
}

impl StreamSession {
    pub fn set_tool_sources(&mut self, ids: impl IntoIterator<Item = String>) {
        self.selected_tool_source_ids.clear();
        for id in ids {
            if !id.is_empty() && !self.selected_tool_source_ids.contains(&id) {
                self.selected_tool_source_ids.push(id);
            }
        }
    }

    /// Clear everything that belongs to a single turn.
    pub fn reset_turn(&mut self) {
        self.buffers = ResponseBuffers::default();
        self.tool_call_active = false;
        self.pending_response_id = None;
    }
}

/// Why a turn was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum CancelReason {
    User,
    Superseded,
    IdleTimeout,
    TotalTimeout,
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnOutcome {
    /// `message_id` is `None` when the response was empty.
    Completed { message_id: Option<String> },
    /// `message_id` is the persisted partial response, if any.
    Cancelled {
        reason: CancelReason,
        message_id: Option<String>,
    },
}

impl TurnOutcome {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            TurnOutcome::Completed { message_id } | TurnOutcome::Cancelled { message_id, .. } => {
                message_id.as_deref()
            }
        }
    }
}

/// Point-in-time view of the controller, for UIs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub selected_model: Option<String>,
    pub selected_tool_source_ids: Vec<String>,
    pub plain_channel: String,
    pub reasoning_channel: String,
    pub reasoning_in_progress: bool,
    pub tool_call_active: bool,
    pub busy: bool,
    pub resending: bool,
    pub last_error: Option<String>,
}
