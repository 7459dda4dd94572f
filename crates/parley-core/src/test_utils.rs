//! Scripted collaborators for exercising the engine without a server.
//!
//! These live outside `#[cfg(test)]` so integration tests and downstream
//! crates can drive a [`SessionController`](crate::session::SessionController)
//! deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_tools::{ToolInvocation, ToolOutput, ToolSourceCatalog};
use tokio_util::sync::CancellationToken;

use crate::api::sse::with_cancellation;
use crate::api::{
    ApiError, ChatRequest, SseEvent, ToolCatalog, ToolEndpoint, Transport, TransportResponse,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    /// An SSE event carrying this `data:` payload.
    Data(String),
    /// Sleep before the next item.
    Delay(Duration),
    /// A transport error on the stream.
    Error(String),
}

/// What a scripted stream does after its last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Close,
    /// Stay open until cancelled.
    Hang,
}

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Stream {
        events: Vec<ScriptedEvent>,
        then: StreamEnd,
    },
    Buffered {
        content_type: Option<String>,
        body: String,
    },
    Fail {
        status: u16,
        body: String,
    },
}

/// A request seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct OpenedRequest {
    pub request: ChatRequest,
    pub token: CancellationToken,
    /// Whether every token handed out before this request had been cancelled
    /// when it arrived. Continuation requests share their turn's token, so
    /// this is `false` for them.
    pub prior_turns_cancelled: bool,
}

/// Transport answering stream requests from a queue, in order.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    opened: Mutex<Vec<OpenedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) -> &Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Queue a stream of data events that closes after the last one.
    pub fn push_stream<I, S>(&self, packets: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedResponse::Stream {
            events: packets.into_iter().map(|p| ScriptedEvent::Data(p.into())).collect(),
            then: StreamEnd::Close,
        })
    }

    /// Queue a stream of data events that stays open afterwards.
    pub fn push_hanging_stream<I, S>(&self, packets: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ScriptedResponse::Stream {
            events: packets.into_iter().map(|p| ScriptedEvent::Data(p.into())).collect(),
            then: StreamEnd::Hang,
        })
    }

    pub fn opened(&self) -> Vec<OpenedRequest> {
        lock(&self.opened).clone()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.opened).iter().map(|o| o.request.clone()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        request: ChatRequest,
        token: CancellationToken,
    ) -> Result<TransportResponse, ApiError> {
        {
            let mut opened = lock(&self.opened);
            let prior_turns_cancelled = opened.iter().all(|o| o.token.is_cancelled());
            opened.push(OpenedRequest {
                request,
                token: token.clone(),
                prior_turns_cancelled,
            });
        }

        let Some(response) = lock(&self.responses).pop_front() else {
            return Err(ApiError::Configuration(
                "no scripted response left".to_string(),
            ));
        };

        match response {
            ScriptedResponse::Stream { events, then } => {
                let stream = Box::pin(async_stream::stream! {
                    for event in events {
                        match event {
                            ScriptedEvent::Data(data) => yield Ok(SseEvent::data(data)),
                            ScriptedEvent::Delay(delay) => tokio::time::sleep(delay).await,
                            ScriptedEvent::Error(details) => yield Err(ApiError::StreamError {
                                endpoint: "stream".to_string(),
                                details,
                            }),
                        }
                    }
                    if then == StreamEnd::Hang {
                        std::future::pending::<()>().await;
                    }
                });
                Ok(TransportResponse::Stream(with_cancellation(stream, token)))
            }
            ScriptedResponse::Buffered { content_type, body } => {
                Ok(TransportResponse::Buffered { content_type, body })
            }
            ScriptedResponse::Fail { status, body } => Err(ApiError::ServerError {
                endpoint: "stream".to_string(),
                status_code: status,
                details: body,
            }),
        }
    }
}

/// Tool endpoint with canned outputs per tool name. Unscripted tools answer
/// with an empty [`ToolOutput`].
#[derive(Default)]
pub struct ScriptedToolEndpoint {
    outputs: Mutex<HashMap<String, ToolOutput>>,
    unreachable: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedToolEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, tool_name: impl Into<String>, output: ToolOutput) -> &Self {
        lock(&self.outputs).insert(tool_name.into(), output);
        self
    }

    /// Calls to `tool_name` fail as if the endpoint were down.
    pub fn fail_transport(&self, tool_name: impl Into<String>) -> &Self {
        lock(&self.unreachable).push(tool_name.into());
        self
    }

    /// Every call takes `delay` before answering.
    pub fn delay(&self, delay: Duration) -> &Self {
        *lock(&self.delay) = Some(delay);
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        lock(&self.invocations).clone()
    }
}

#[async_trait]
impl ToolEndpoint for ScriptedToolEndpoint {
    async fn run_tool(
        &self,
        invocation: ToolInvocation,
        token: CancellationToken,
    ) -> Result<ToolOutput, ApiError> {
        let tool_name = invocation.tool_name.clone();
        lock(&self.invocations).push(invocation);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::select! {
                () = token.cancelled() => {
                    return Err(ApiError::Cancelled { endpoint: "run_tool".to_string() });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        if lock(&self.unreachable).contains(&tool_name) {
            return Err(ApiError::ServerError {
                endpoint: "run_tool".to_string(),
                status_code: 503,
                details: "tool endpoint unavailable".to_string(),
            });
        }
        Ok(lock(&self.outputs).get(&tool_name).cloned().unwrap_or_default())
    }
}

/// Catalog serving a fixed set of sources.
#[derive(Default)]
pub struct StaticToolCatalog {
    catalogs: Vec<ToolSourceCatalog>,
    failing: bool,
    requested: Mutex<Vec<Vec<String>>>,
}

impl StaticToolCatalog {
    pub fn new(catalogs: Vec<ToolSourceCatalog>) -> Self {
        Self {
            catalogs,
            ..Self::default()
        }
    }

    /// A catalog whose every fetch fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn fetch_count(&self) -> usize {
        lock(&self.requested).len()
    }

    /// Source ids of each fetch, in order.
    pub fn requested(&self) -> Vec<Vec<String>> {
        lock(&self.requested).clone()
    }
}

#[async_trait]
impl ToolCatalog for StaticToolCatalog {
    async fn fetch_catalogs(&self, source_ids: &[String]) -> Result<Vec<ToolSourceCatalog>, ApiError> {
        lock(&self.requested).push(source_ids.to_vec());
        if self.failing {
            return Err(ApiError::ServerError {
                endpoint: "tool_catalog".to_string(),
                status_code: 500,
                details: "catalog unavailable".to_string(),
            });
        }
        Ok(self
            .catalogs
            .iter()
            .filter(|catalog| source_ids.contains(&catalog.source_id))
            .cloned()
            .collect())
    }
}

/// Stream packet JSON builders.
pub mod packets {
    use serde_json::{Value, json};

    pub fn packet(value: Value) -> String {
        value.to_string()
    }

    /// An unlabelled content delta.
    pub fn delta(content: &str) -> String {
        packet(json!({ "content": content }))
    }

    /// A delta labelled as appended answer text.
    pub fn answer(content: &str) -> String {
        packet(json!({ "content": content, "type": "answer" }))
    }

    /// The completion packet carrying the final text.
    pub fn complete(content: &str) -> String {
        packet(json!({ "content": content, "isComplete": true }))
    }

    pub fn thoughts(thoughts: &str, content: &str) -> String {
        packet(json!({ "thoughts": thoughts, "content": content }))
    }

    pub fn tool_call(name: &str, arguments: Value) -> String {
        packet(json!({
            "tool_calls": [{ "function": { "name": name, "arguments": arguments } }]
        }))
    }

    /// A tool call tagged with the server's group id.
    pub fn grouped_tool_call(group_id: &str, name: &str, arguments: Value) -> String {
        packet(json!({
            "tool_group_id": group_id,
            "tool_calls": [{ "function": { "name": name, "arguments": arguments } }]
        }))
    }

    /// `inner` wrapped in the `{bcode, data}` envelope.
    pub fn enveloped(inner: Value) -> String {
        packet(json!({ "bcode": 0, "data": inner }))
    }
}
