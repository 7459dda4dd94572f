use eventsource_stream::Eventsource;
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::error::{ApiError, SseParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
            id: None,
        }
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent, ApiError>> + Send>>;

pub fn parse_sse_stream<S, E>(byte_stream: S) -> SseStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let event_stream = byte_stream
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())))
        .eventsource()
        .map(|result| {
            result
                .map(|event| SseEvent {
                    event_type: (!event.event.is_empty()).then_some(event.event),
                    data: event.data,
                    id: (!event.id.is_empty()).then_some(event.id),
                })
                .map_err(|e| ApiError::StreamError {
                    endpoint: "sse".to_string(),
                    details: SseParseError::from(e).to_string(),
                })
        });

    Box::pin(event_stream)
}

/// Ends `stream` as soon as `token` is cancelled.
///
/// Once the token fires no further events are yielded, even when the
/// underlying connection still has buffered data.
pub fn with_cancellation(mut stream: SseStream, token: CancellationToken) -> SseStream {
    Box::pin(async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::debug!(target: "parley::api", "SSE stream cancelled");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(item) => yield item,
                None => break,
            }
        }
    })
}
