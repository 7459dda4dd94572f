//! The stream session controller.
//!
//! [`SessionController`] is a cheap, cloneable handle to an actor task that
//! owns the [`StreamSession`] and at most one active turn. The actor
//! `select!`s over handle commands and the turn's current piece of work,
//! which is itself raced against the turn's idle and total deadlines.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures_util::StreamExt;
use parley_tools::{ToolDirective, ToolError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{
    ApiError, ChatRequest, FallbackBody, FallbackOutcome, HttpClient, SseEvent, SseStream,
    ToolCatalog, ToolEndpoint, Transport, TransportResponse, parse_stream_event,
};
use crate::config::{EngineConfig, MalformedPayloadPolicy};
use crate::conversation::repository::{append_logged, upsert_logged};
use crate::conversation::{
    ContentBlock, DeltaKind, LiveChannels, Message, MessageRepository, ReasoningStatus, Role,
    reconstruct,
};
use crate::error::EngineError;
use crate::session::event::SessionEvent;
use crate::session::state::{CancelReason, SessionPhase, SessionSnapshot, StreamSession, TurnOutcome};
use crate::session::timeout::{TimeoutKind, TimeoutSupervisor};
use crate::tools::{PlacedCall, ResolvedTool, ToolCycleOutcome, ToolOrchestrator, ToolResolver};

const INTERRUPTED_MARKER: &str = "\n\n[Response interrupted]";
const CONNECTION_LOST_MARKER: &str = "\n\n[Connection interrupted]";
const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

/// External services the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub tool_endpoint: Arc<dyn ToolEndpoint>,
    pub tool_catalog: Arc<dyn ToolCatalog>,
    pub repository: Arc<dyn MessageRepository>,
}

impl Collaborators {
    /// All three HTTP services backed by one client.
    pub fn http(client: HttpClient, repository: Arc<dyn MessageRepository>) -> Self {
        let client = Arc::new(client);
        Self {
            transport: client.clone(),
            tool_endpoint: client.clone(),
            tool_catalog: client,
            repository,
        }
    }
}

type TurnReply = oneshot::Sender<Result<TurnOutcome, EngineError>>;

enum SessionCmd {
    Send {
        text: String,
        reply: TurnReply,
    },
    Resend {
        reply: TurnReply,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    SelectModel {
        model: Option<String>,
        reply: oneshot::Sender<()>,
    },
    SetToolSources {
        ids: Vec<String>,
        reply: oneshot::Sender<()>,
    },
    SetSessionId {
        session_id: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct SessionController {
    tx: mpsc::Sender<SessionCmd>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Start the controller task on the current tokio runtime.
    pub fn spawn(config: EngineConfig, collaborators: Collaborators) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let orchestrator = ToolOrchestrator::new(
            ToolResolver::new(collaborators.tool_catalog),
            collaborators.tool_endpoint,
            collaborators.repository.clone(),
        );
        let actor = SessionActor {
            config,
            transport: collaborators.transport,
            repository: collaborators.repository,
            orchestrator,
            session: StreamSession::default(),
            phase: SessionPhase::Idle,
            selected_model: None,
            turn: None,
            resending: false,
            last_error: None,
            events: events.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self { tx, events }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCmd,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        reply_rx.await.map_err(|_| EngineError::Shutdown)
    }

    /// Send a user message and wait for the turn to end.
    ///
    /// Any turn already running is cancelled first and resolves as
    /// [`CancelReason::Superseded`].
    #[instrument(skip_all, name = "SessionController::send_message")]
    pub async fn send_message(&self, text: impl Into<String>) -> Result<TurnOutcome, EngineError> {
        let text = text.into();
        self.request(|reply| SessionCmd::Send { text, reply }).await?
    }

    /// Run the last user message again without storing it a second time.
    #[instrument(skip_all, name = "SessionController::resend_last_message")]
    pub async fn resend_last_message(&self) -> Result<TurnOutcome, EngineError> {
        self.request(|reply| SessionCmd::Resend { reply }).await?
    }

    /// Cancel the active turn, if any. Returns once the partial response has
    /// been persisted.
    #[instrument(skip_all, name = "SessionController::cancel")]
    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.request(|reply| SessionCmd::Cancel { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| SessionCmd::Snapshot { reply }).await
    }

    pub async fn select_model(&self, model: Option<String>) -> Result<(), EngineError> {
        self.request(|reply| SessionCmd::SelectModel { model, reply })
            .await
    }

    pub async fn set_tool_sources(&self, ids: Vec<String>) -> Result<(), EngineError> {
        self.request(|reply| SessionCmd::SetToolSources { ids, reply })
            .await
    }

    pub async fn set_session_id(&self, session_id: Option<String>) -> Result<(), EngineError> {
        self.request(|reply| SessionCmd::SetSessionId { session_id, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the controller. An active turn is cancelled and its caller gets
    /// [`EngineError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.tx.send(SessionCmd::Shutdown).await.is_err() {
            debug!(target: "parley::session", "Controller already stopped");
        }
    }
}

/// A connection that carried a tool directive, kept while the tool runs.
struct ParkedStream {
    stream: SseStream,
    packet_complete: bool,
}

enum Work {
    Opening(BoxFuture<'static, Result<TransportResponse, ApiError>>),
    Streaming(SseStream),
    Resolving {
        directive: ToolDirective,
        group_id: Option<String>,
        future: BoxFuture<'static, Option<ResolvedTool>>,
    },
    Executing {
        call: PlacedCall,
        future: BoxFuture<'static, Result<String, ToolError>>,
    },
}

enum TurnStep {
    Opened(Result<TransportResponse, ApiError>),
    Event(Option<Result<SseEvent, ApiError>>),
    Resolved(ToolDirective, Option<String>, Option<ResolvedTool>),
    Executed(PlacedCall, Result<String, ToolError>),
    TimedOut(TimeoutKind),
}

impl Work {
    // Each completed future is replaced by the step handler before the next
    // poll.
    async fn advance(&mut self) -> TurnStep {
        match self {
            Work::Opening(open) => TurnStep::Opened(open.await),
            Work::Streaming(stream) => TurnStep::Event(stream.next().await),
            Work::Resolving {
                directive,
                group_id,
                future,
            } => {
                let resolved = future.await;
                TurnStep::Resolved(directive.clone(), group_id.clone(), resolved)
            }
            Work::Executing { call, future } => {
                let result = future.await;
                TurnStep::Executed(call.clone(), result)
            }
        }
    }
}

struct ActiveTurn {
    token: CancellationToken,
    timers: TimeoutSupervisor,
    work: Work,
    parked: Option<ParkedStream>,
    reply: Option<TurnReply>,
}

impl ActiveTurn {
    async fn next_step(&mut self) -> TurnStep {
        let ActiveTurn { timers, work, .. } = self;
        tokio::select! {
            biased;
            kind = timers.expired() => TurnStep::TimedOut(kind),
            step = work.advance() => step,
        }
    }
}

async fn next_turn_step(turn: Option<&mut ActiveTurn>) -> TurnStep {
    match turn {
        Some(turn) => turn.next_step().await,
        None => std::future::pending().await,
    }
}

fn open_stream(
    transport: Arc<dyn Transport>,
    request: ChatRequest,
    token: CancellationToken,
) -> BoxFuture<'static, Result<TransportResponse, ApiError>> {
    Box::pin(async move { transport.open(request, token).await })
}

struct SessionActor {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    repository: Arc<dyn MessageRepository>,
    orchestrator: ToolOrchestrator,
    session: StreamSession,
    phase: SessionPhase,
    selected_model: Option<String>,
    turn: Option<ActiveTurn>,
    resending: bool,
    last_error: Option<String>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => {
                    let flow = match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => ControlFlow::Break(()),
                    };
                    if flow.is_break() {
                        self.shutdown().await;
                        break;
                    }
                }
                step = next_turn_step(self.turn.as_mut()) => self.handle_step(step).await,
            }
        }

        info!(target: "parley::session", "Session controller stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCmd) -> ControlFlow<()> {
        match cmd {
            SessionCmd::Send { text, reply } => self.start_turn(text, reply, false).await,
            SessionCmd::Resend { reply } => {
                if self.resending {
                    let _ = reply.send(Err(EngineError::ResendInProgress));
                } else if let Some(text) = self.session.last_user_input.clone() {
                    self.start_turn(text, reply, true).await;
                } else {
                    let _ = reply.send(Err(EngineError::NothingToResend));
                }
            }
            SessionCmd::Cancel { reply } => {
                self.cancel_turn(CancelReason::User).await;
                let _ = reply.send(());
            }
            SessionCmd::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCmd::SelectModel { model, reply } => {
                debug!(target: "parley::session", ?model, "Model selected");
                self.selected_model = model;
                let _ = reply.send(());
            }
            SessionCmd::SetToolSources { ids, reply } => {
                self.session.set_tool_sources(ids);
                let _ = reply.send(());
            }
            SessionCmd::SetSessionId { session_id, reply } => {
                self.session.session_id = session_id;
                let _ = reply.send(());
            }
            SessionCmd::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    async fn handle_step(&mut self, step: TurnStep) {
        match step {
            TurnStep::TimedOut(kind) => self.on_timeout(kind).await,
            TurnStep::Opened(result) => self.on_opened(result).await,
            TurnStep::Event(Some(Ok(event))) => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.timers.touch();
                }
                self.on_event(&event).await;
            }
            TurnStep::Event(Some(Err(e))) => {
                self.fail_turn(EngineError::Transport(e.to_string())).await;
            }
            TurnStep::Event(None) => self.on_stream_closed().await,
            TurnStep::Resolved(directive, group_id, resolved) => {
                self.on_resolved(&directive, group_id.as_deref(), resolved)
                    .await;
            }
            TurnStep::Executed(call, result) => self.on_executed(call, result).await,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(target: "parley::session", from = %self.phase, to = %phase, "Phase change");
            self.phase = phase;
            self.emit(SessionEvent::PhaseChanged { phase });
        }
    }

    fn record_error(&mut self, error: &EngineError) {
        self.last_error = Some(error.to_string());
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
    }

    fn chat_request(&self, content: String, tool_group_id: Option<String>) -> ChatRequest {
        ChatRequest {
            content,
            session_id: self.session.session_id.clone(),
            tool_source_ids: self.session.selected_tool_source_ids.clone(),
            tool_group_id,
        }
    }

    async fn start_turn(&mut self, text: String, reply: TurnReply, resend: bool) {
        if text.trim().is_empty() {
            let _ = reply.send(Err(EngineError::InvalidInput(
                "message is empty".to_string(),
            )));
            return;
        }

        if self.turn.is_some() {
            self.cancel_turn(CancelReason::Superseded).await;
        }
        self.session.reset_turn();
        self.orchestrator.reset().await;
        self.last_error = None;

        if self.selected_model.is_none() {
            let error = EngineError::NoModelSelected;
            warn!(target: "parley::session", "{error}");
            self.record_error(&error);
            let _ = reply.send(Err(error));
            return;
        }

        self.session.last_user_input = Some(text.clone());
        if !resend {
            let message_id = append_logged(self.repository.as_ref(), Message::user(text.clone())).await;
            self.emit(SessionEvent::MessagePersisted {
                message_id,
                role: Role::User,
            });
        }
        self.resending = resend;

        info!(
            target: "parley::session",
            resend,
            session_id = ?self.session.session_id,
            tool_sources = self.session.selected_tool_source_ids.len(),
            "Starting turn"
        );

        let token = CancellationToken::new();
        let mut timers = TimeoutSupervisor::new(self.config.idle_timeout(), self.config.total_timeout());
        timers.start();
        let request = self.chat_request(text, None);
        self.turn = Some(ActiveTurn {
            work: Work::Opening(open_stream(self.transport.clone(), request, token.clone())),
            token,
            timers,
            parked: None,
            reply: Some(reply),
        });
        self.set_phase(SessionPhase::Sending);
    }

    async fn on_timeout(&mut self, kind: TimeoutKind) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        let error = turn.timers.error_for(kind);
        warn!(target: "parley::session", phase = %self.phase, "{error}");
        self.record_error(&error);
        self.cancel_turn(kind.into()).await;
    }

    async fn on_opened(&mut self, result: Result<TransportResponse, ApiError>) {
        match result {
            Ok(TransportResponse::Stream(stream)) => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.work = Work::Streaming(stream);
                }
                self.set_phase(SessionPhase::Streaming);
            }
            Ok(TransportResponse::Buffered { content_type, body }) => {
                let content_type = content_type.unwrap_or_else(|| "none".to_string());
                warn!(
                    target: "parley::session",
                    "{}",
                    EngineError::UnexpectedContentType {
                        content_type: content_type.clone()
                    }
                );
                match FallbackBody::parse(&body) {
                    Some(FallbackOutcome::Content(content)) => {
                        self.session
                            .buffers
                            .apply(&content, None, DeltaKind::Snapshot);
                        self.publish_channels();
                        self.complete_turn().await;
                    }
                    Some(FallbackOutcome::ServerError(message)) => {
                        self.fail_turn(EngineError::ServerReported(message)).await;
                    }
                    None => {
                        self.fail_turn(EngineError::CannotParseFallback { content_type })
                            .await;
                    }
                }
            }
            Err(e) => self.fail_turn(EngineError::from_open(e)).await,
        }
    }

    async fn on_event(&mut self, sse: &SseEvent) {
        let mut event = match parse_stream_event(&sse.data) {
            Ok(event) => event,
            Err(e) => {
                let error = EngineError::MalformedEventPayload(e.to_string());
                match self.config.malformed_payload {
                    MalformedPayloadPolicy::Skip => {
                        warn!(target: "parley::session", data = %sse.data, "Skipping packet: {error}");
                        self.record_error(&error);
                    }
                    MalformedPayloadPolicy::Abort => self.fail_turn(error).await,
                }
                return;
            }
        };

        if let Some(session_id) = event.session_id()
            && self.session.session_id.as_deref() != Some(session_id)
        {
            debug!(target: "parley::session", session_id, "Session id assigned");
            self.session.session_id = Some(session_id.to_string());
            self.emit(SessionEvent::SessionIdAssigned {
                session_id: session_id.to_string(),
            });
        }
        if let Some(response_id) = event.response_id() {
            self.session.pending_response_id = Some(response_id.to_string());
        }

        let directives = event.take_tool_calls();
        if !directives.is_empty() {
            let group_id = event.tool_group_id().map(str::to_string);
            self.on_tool_directives(directives, group_id, event.is_complete());
            return;
        }

        let changed = self.session.buffers.apply(
            event.content(),
            event.thoughts.as_deref(),
            event.delta_kind(),
        );
        if changed {
            self.publish_channels();
        }

        if event.is_complete() && !self.session.tool_call_active {
            self.complete_turn().await;
        }
    }

    fn on_tool_directives(
        &mut self,
        directives: Vec<ToolDirective>,
        group_id: Option<String>,
        packet_complete: bool,
    ) {
        let Some(directive) = self.orchestrator.accept(&mut self.session, directives) else {
            return;
        };
        let future = self
            .orchestrator
            .resolve(&directive, self.session.selected_tool_source_ids.clone());
        let Some(turn) = self.turn.as_mut() else {
            return;
        };

        debug!(target: "parley::session", tool = directive.name(), ?group_id, "Tool directive received");
        let previous = std::mem::replace(
            &mut turn.work,
            Work::Resolving {
                directive,
                group_id,
                future,
            },
        );
        if let Work::Streaming(stream) = previous {
            turn.parked = Some(ParkedStream {
                stream,
                packet_complete,
            });
        }
        turn.timers.pause_idle();
        self.set_phase(SessionPhase::ToolPending);
    }

    async fn on_resolved(
        &mut self,
        directive: &ToolDirective,
        group_id: Option<&str>,
        resolved: Option<ResolvedTool>,
    ) {
        let call = self.orchestrator.place(directive, group_id, resolved).await;
        if let Some(message) = self.orchestrator.current_message() {
            self.emit(SessionEvent::ToolMessageUpdated {
                message: message.clone(),
            });
        }

        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        let future = self.orchestrator.execute(&call, turn.token.child_token());
        turn.work = Work::Executing { call, future };
    }

    async fn on_executed(&mut self, call: PlacedCall, result: Result<String, ToolError>) {
        let cycle = self
            .orchestrator
            .finish(&mut self.session, &call, result)
            .await;
        self.emit(SessionEvent::ToolMessageUpdated {
            message: cycle.message,
        });

        match cycle.outcome {
            ToolCycleOutcome::Succeeded { output } if self.config.continue_after_tool => {
                self.continue_with_tool_output(output, call.group_id);
            }
            ToolCycleOutcome::Succeeded { .. } => self.resume_parked().await,
            ToolCycleOutcome::Failed { error } => {
                self.record_error(&EngineError::ToolExecution(error.output_text()));
                self.publish_channels();
                self.resume_parked().await;
            }
        }
    }

    fn continue_with_tool_output(&mut self, output: String, group_id: String) {
        let request = self.chat_request(output, Some(group_id));
        let transport = self.transport.clone();
        let Some(turn) = self.turn.as_mut() else {
            return;
        };

        info!(target: "parley::session", tool_group_id = ?request.tool_group_id, "Opening continuation turn");
        turn.parked = None;
        turn.work = Work::Opening(open_stream(transport, request, turn.token.clone()));
        turn.timers.resume_idle();
        self.set_phase(SessionPhase::Sending);
    }

    // Go back to the connection that carried the directive.
    async fn resume_parked(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        match turn.parked.take() {
            Some(parked) if !parked.packet_complete => {
                turn.work = Work::Streaming(parked.stream);
                turn.timers.resume_idle();
                self.set_phase(SessionPhase::Streaming);
            }
            _ => self.complete_turn().await,
        }
    }

    async fn on_stream_closed(&mut self) {
        warn!(target: "parley::session", "Stream closed before the response completed");
        if let Some(turn) = self.turn.as_ref() {
            turn.token.cancel();
        }
        self.set_phase(SessionPhase::Erroring);
        self.persist_partial(CONNECTION_LOST_MARKER).await;

        let error = EngineError::StreamClosed;
        self.record_error(&error);
        self.finish_turn(Err(error)).await;
    }

    fn live_channels(&self) -> LiveChannels {
        let segments = reconstruct(
            &self.session.buffers.response,
            &self.config.reasoning_markers,
        );
        LiveChannels::project(
            &segments,
            &self.session.buffers.reasoning,
            self.session.buffers.reasoning_active,
        )
    }

    fn publish_channels(&self) {
        let channels = self.live_channels();
        self.emit(SessionEvent::ChannelsUpdated {
            plain: channels.plain,
            reasoning: channels.reasoning,
            reasoning_in_progress: channels.reasoning_in_progress,
        });
    }

    /// Build the assistant message from the turn's buffers, with `suffix`
    /// appended to the response text. `None` when nothing was produced.
    fn materialize(&self, suffix: &str) -> Option<Message> {
        let buffers = &self.session.buffers;
        let mut content = Vec::new();

        let reasoning = buffers.reasoning.trim();
        if !reasoning.is_empty() {
            let status = if buffers.reasoning_active {
                ReasoningStatus::InProgress
            } else {
                ReasoningStatus::Done
            };
            content.push(ContentBlock::Reasoning {
                text: reasoning.to_string(),
                status,
            });
        }

        let text = format!("{}{}", buffers.response, suffix);
        content.extend(
            reconstruct(&text, &self.config.reasoning_markers)
                .into_iter()
                .map(ContentBlock::from),
        );

        (!content.is_empty()).then(|| Message::assistant(content))
    }

    async fn persist_response(&mut self, message: Message) -> String {
        let message_id = match &self.session.pending_response_id {
            Some(id) => {
                upsert_logged(self.repository.as_ref(), id, message).await;
                id.clone()
            }
            None => append_logged(self.repository.as_ref(), message).await,
        };
        self.emit(SessionEvent::MessagePersisted {
            message_id: message_id.clone(),
            role: Role::Assistant,
        });
        message_id
    }

    /// Persist whatever the turn produced, followed by `marker`.
    async fn persist_partial(&mut self, marker: &str) -> Option<String> {
        if let Some(message) = self.orchestrator.fail_in_flight(marker.trim()).await {
            self.emit(SessionEvent::ToolMessageUpdated { message });
        }
        if self.session.buffers.is_empty() {
            return None;
        }
        let message = self.materialize(marker)?;
        Some(self.persist_response(message).await)
    }

    async fn complete_turn(&mut self) {
        self.set_phase(SessionPhase::Completing);
        let message_id = match self.materialize("") {
            Some(message) => Some(self.persist_response(message).await),
            None => None,
        };
        info!(target: "parley::session", ?message_id, "Turn completed");
        self.finish_turn(Ok(TurnOutcome::Completed { message_id }))
            .await;
    }

    async fn cancel_turn(&mut self, reason: CancelReason) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        info!(target: "parley::session", %reason, "Cancelling turn");
        turn.token.cancel();
        self.set_phase(SessionPhase::Cancelling);

        let message_id = self.persist_partial(INTERRUPTED_MARKER).await;
        self.finish_turn(Ok(TurnOutcome::Cancelled { reason, message_id }))
            .await;
    }

    async fn fail_turn(&mut self, error: EngineError) {
        let Some(turn) = self.turn.as_ref() else {
            return;
        };
        turn.token.cancel();
        error!(target: "parley::session", "Turn failed: {error}");
        self.set_phase(SessionPhase::Erroring);

        if let Some(message) = self.orchestrator.fail_in_flight(&error.to_string()).await {
            self.emit(SessionEvent::ToolMessageUpdated { message });
        }
        self.record_error(&error);
        self.finish_turn(Err(error)).await;
    }

    /// Tear down the active turn and answer its caller. A failed turn keeps
    /// its response text visible until the next send.
    async fn finish_turn(&mut self, outcome: Result<TurnOutcome, EngineError>) {
        let Some(mut turn) = self.turn.take() else {
            return;
        };
        turn.token.cancel();
        turn.timers.clear();

        if outcome.is_ok() {
            self.session.reset_turn();
        } else {
            self.session.tool_call_active = false;
            self.session.pending_response_id = None;
        }
        self.orchestrator.reset().await;
        self.resending = false;
        self.set_phase(SessionPhase::Idle);

        self.emit(SessionEvent::TurnFinished {
            outcome: outcome.clone().map_err(|e| e.to_string()),
        });
        if let Some(reply) = turn.reply.take() {
            let _ = reply.send(outcome);
        }
    }

    async fn shutdown(&mut self) {
        if let Some(turn) = self.turn.as_ref() {
            turn.token.cancel();
            self.set_phase(SessionPhase::Cancelling);
            self.persist_partial(INTERRUPTED_MARKER).await;
            self.finish_turn(Err(EngineError::Shutdown)).await;
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let channels = self.live_channels();
        SessionSnapshot {
            phase: self.phase,
            session_id: self.session.session_id.clone(),
            selected_model: self.selected_model.clone(),
            selected_tool_source_ids: self.session.selected_tool_source_ids.clone(),
            plain_channel: channels.plain,
            reasoning_channel: channels.reasoning,
            reasoning_in_progress: channels.reasoning_in_progress,
            tool_call_active: self.session.tool_call_active,
            busy: self.turn.is_some(),
            resending: self.resending,
            last_error: self.last_error.clone(),
        }
    }
}
