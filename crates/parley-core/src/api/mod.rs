pub mod error;
pub mod http;
pub mod sse;
pub mod transport;
pub mod wire;

pub use error::{ApiError, SseParseError};
pub use http::HttpClient;
pub use sse::{SseEvent, SseStream, parse_sse_stream};
pub use transport::{ToolCatalog, ToolEndpoint, Transport, TransportResponse};
pub use wire::{ChatRequest, FallbackBody, FallbackOutcome, StreamEvent, parse_stream_event};
