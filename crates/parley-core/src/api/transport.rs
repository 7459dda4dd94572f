use async_trait::async_trait;
use parley_tools::{ToolInvocation, ToolOutput, ToolSourceCatalog};
use tokio_util::sync::CancellationToken;

use crate::api::error::ApiError;
use crate::api::sse::SseStream;
use crate::api::wire::ChatRequest;

/// What the server answered to a stream request.
pub enum TransportResponse {
    /// `text/event-stream` body.
    Stream(SseStream),
    /// Any other content type, read in full.
    Buffered {
        content_type: Option<String>,
        body: String,
    },
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportResponse::Stream(_) => f.write_str("Stream(..)"),
            TransportResponse::Buffered { content_type, body } => f
                .debug_struct("Buffered")
                .field("content_type", content_type)
                .field("body", body)
                .finish(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a stream request. Cancelling `token` aborts the request and ends
    /// the returned stream.
    async fn open(
        &self,
        request: ChatRequest,
        token: CancellationToken,
    ) -> Result<TransportResponse, ApiError>;
}

#[async_trait]
pub trait ToolEndpoint: Send + Sync + 'static {
    async fn run_tool(
        &self,
        invocation: ToolInvocation,
        token: CancellationToken,
    ) -> Result<ToolOutput, ApiError>;
}

#[async_trait]
pub trait ToolCatalog: Send + Sync + 'static {
    /// Catalogs of the given sources. Sources the server does not know are
    /// simply absent from the result.
    async fn fetch_catalogs(&self, source_ids: &[String]) -> Result<Vec<ToolSourceCatalog>, ApiError>;
}
