pub mod accumulate;
pub mod message;
pub mod repository;
pub mod segment;

pub use accumulate::{DeltaKind, ResponseBuffers, fold};
pub use message::{
    ContentBlock, Message, ReasoningStatus, Role, ToolCallRecord, ToolCallStatus, ToolGroup,
};
pub use repository::{InMemoryMessageRepository, MessageRepository, RepositoryError};
pub use segment::{ContentSegment, LiveChannels, ReasoningMarkers, reconstruct};
