// Streaming conversation engine without UI dependencies

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod session;
pub mod test_utils;
pub mod tools;

pub use config::EngineConfig;
pub use error::{EngineError, Error, Result};
pub use session::{Collaborators, SessionController, SessionEvent, SessionSnapshot, TurnOutcome};
