use crate::conversation::{Message, Role};

use super::state::{SessionPhase, TurnOutcome};

/// Notifications published by the controller on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        phase: SessionPhase,
    },
    /// Live projection of the response so far.
    ChannelsUpdated {
        plain: String,
        reasoning: String,
        reasoning_in_progress: bool,
    },
    /// A tool message was created or one of its calls changed.
    ToolMessageUpdated {
        message: Message,
    },
    MessagePersisted {
        message_id: String,
        role: Role,
    },
    SessionIdAssigned {
        session_id: String,
    },
    Error {
        message: String,
    },
    TurnFinished {
        outcome: Result<TurnOutcome, String>,
    },
}
