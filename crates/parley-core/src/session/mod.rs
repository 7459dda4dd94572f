pub mod controller;
pub mod event;
pub mod state;
pub mod timeout;

pub use controller::{Collaborators, SessionController};
pub use event::SessionEvent;
pub use state::{CancelReason, SessionPhase, SessionSnapshot, StreamSession, TurnOutcome};
pub use timeout::{TimeoutKind, TimeoutSupervisor};
