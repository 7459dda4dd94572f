pub mod orchestrator;
pub mod resolver;

pub use orchestrator::{PlacedCall, ToolCycle, ToolCycleOutcome, ToolOrchestrator};
pub use resolver::{ResolvedTool, ToolResolver};
