//! Runs tool directives found in the stream and records them as tool groups.
//!
//! The orchestrator owns the assistant message that holds the current
//! turn's tool groups. Its resolve and execute steps are returned as
//! `'static` futures so the controller can race them against timeouts and
//! cancellation; everything that mutates state happens in [`place`] and
//! [`finish`], on the controller's task.
//!
//! [`place`]: ToolOrchestrator::place
//! [`finish`]: ToolOrchestrator::finish

use std::sync::Arc;

use futures::future::BoxFuture;
use parley_tools::{ToolDirective, ToolError, ToolInvocation};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ToolEndpoint;
use crate::conversation::repository::{append_logged, upsert_logged};
use crate::conversation::{ContentBlock, Message, MessageRepository, ToolCallRecord, ToolCallStatus, ToolGroup};
use crate::error::EngineError;
use crate::session::StreamSession;
use crate::tools::resolver::{ResolvedTool, ToolResolver};

const DEFAULT_DESCRIPTION: &str = "Tool call";

/// A call that has been recorded and is ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedCall {
    pub message_id: String,
    pub group_id: String,
    pub record: ToolCallRecord,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCycleOutcome {
    Succeeded { output: String },
    Failed { error: ToolError },
}

/// Result of finishing one call.
#[derive(Debug, Clone)]
pub struct ToolCycle {
    pub message: Message,
    pub group_status: ToolCallStatus,
    pub outcome: ToolCycleOutcome,
}

pub struct ToolOrchestrator {
    resolver: ToolResolver,
    endpoint: Arc<dyn ToolEndpoint>,
    repository: Arc<dyn MessageRepository>,
    current: Option<Message>,
}

impl ToolOrchestrator {
    pub fn new(
        resolver: ToolResolver,
        endpoint: Arc<dyn ToolEndpoint>,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            resolver,
            endpoint,
            repository,
            current: None,
        }
    }

    /// The message holding this turn's tool groups.
    pub fn current_message(&self) -> Option<&Message> {
        self.current.as_ref()
    }

    /// Pick the directive to run from one packet's batch, claiming the
    /// session's tool slot. Returns `None` when a call is already running.
    pub fn accept(
        &self,
        session: &mut StreamSession,
        directives: Vec<ToolDirective>,
    ) -> Option<ToolDirective> {
        if session.tool_call_active {
            warn!(
                target: "parley::tools",
                count = directives.len(),
                "Tool call already in progress, dropping directives"
            );
            return None;
        }

        let mut directives = directives.into_iter();
        let first = directives.next()?;
        let ignored: Vec<String> = directives.map(|d| d.function.name).collect();
        if !ignored.is_empty() {
            debug!(
                target: "parley::tools",
                running = first.name(),
                ?ignored,
                "Only the first directive of a batch is executed"
            );
        }

        session.tool_call_active = true;
        Some(first)
    }

    pub fn resolve(
        &self,
        directive: &ToolDirective,
        source_ids: Vec<String>,
    ) -> BoxFuture<'static, Option<ResolvedTool>> {
        let resolver = self.resolver.clone();
        let name = directive.name().to_string();
        Box::pin(async move { resolver.resolve(&name, &source_ids).await })
    }

    /// Record the call in its tool group, creating the group (and its
    /// message) when none matches. With a server-issued `group_id` the call
    /// joins the group of that id; without one it joins whichever group is
    /// still collecting calls.
    pub async fn place(
        &mut self,
        directive: &ToolDirective,
        group_id: Option<&str>,
        resolved: Option<ResolvedTool>,
    ) -> PlacedCall {
        let resolved = resolved.unwrap_or_else(|| {
            warn!(
                target: "parley::tools",
                "{}",
                EngineError::ToolResolutionFailure(directive.name().to_string())
            );
            ResolvedTool {
                tool_source_id: String::new(),
                description: String::new(),
            }
        });
        let description = if resolved.description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            resolved.description
        };

        let arguments = directive.arguments();
        let record = ToolCallRecord::in_progress(
            resolved.tool_source_id,
            directive.name(),
            description,
            arguments.to_string(),
        );

        if let Some(message) = self.current.as_mut()
            && let Some(group) = match group_id {
                Some(id) => message.tool_group_mut(id),
                None => message.progress_group_mut(),
            }
        {
            group.push(record.clone());
            let group_id = group.group_id.clone();
            let snapshot = message.clone();
            upsert_logged(self.repository.as_ref(), &snapshot.id, snapshot.clone()).await;
            return PlacedCall {
                message_id: snapshot.id,
                group_id,
                record,
                arguments,
            };
        }

        let group = match group_id {
            Some(id) => ToolGroup::with_id(id, vec![record.clone()]),
            None => ToolGroup::new(vec![record.clone()]),
        };
        let group_id = group.group_id.clone();
        let mut message = Message::assistant(vec![ContentBlock::ToolGroup(group)]);
        message.id = append_logged(self.repository.as_ref(), message.clone()).await;
        let message_id = message.id.clone();
        self.current = Some(message);

        PlacedCall {
            message_id,
            group_id,
            record,
            arguments,
        }
    }

    /// Run the call against the tool endpoint. A call whose source could not
    /// be resolved fails without reaching the endpoint.
    pub fn execute(
        &self,
        call: &PlacedCall,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<String, ToolError>> {
        let endpoint = self.endpoint.clone();
        let invocation = ToolInvocation {
            tool_source_id: call.record.tool_source_id.clone(),
            tool_name: call.record.name.clone(),
            tool_args: call.arguments.clone(),
        };
        Box::pin(async move {
            let tool_name = invocation.tool_name.clone();
            if invocation.tool_source_id.is_empty() {
                return Err(ToolError::UnknownTool(tool_name));
            }
            info!(target: "parley::tools", tool = %tool_name, "Executing tool");
            match endpoint.run_tool(invocation, token).await {
                Ok(output) => output.into_result(&tool_name),
                Err(e) if e.is_cancelled() => Err(ToolError::Cancelled(tool_name)),
                Err(e) => Err(ToolError::transport(tool_name, e.to_string())),
            }
        })
    }

    /// Record the outcome of an executed call. Failures are also inlined
    /// into the session's response text; the session's tool slot is released
    /// once the group is terminal.
    pub async fn finish(
        &mut self,
        session: &mut StreamSession,
        call: &PlacedCall,
        result: Result<String, ToolError>,
    ) -> ToolCycle {
        let outcome = match result {
            Ok(output) => ToolCycleOutcome::Succeeded { output },
            Err(error) => {
                warn!(target: "parley::tools", tool = %call.record.name, "Tool failed: {error}");
                session
                    .buffers
                    .response
                    .push_str(&format!("\n\n[Tool execution failed: {}]", error.output_text()));
                ToolCycleOutcome::Failed { error }
            }
        };

        let message = self.current.get_or_insert_with(|| {
            Message::assistant(vec![ContentBlock::ToolGroup(ToolGroup {
                group_id: call.group_id.clone(),
                status: ToolCallStatus::Progress,
                calls: vec![call.record.clone()],
            })])
        });

        let group_status = match message.tool_group_mut(&call.group_id) {
            Some(group) => {
                if let Some(record) = group.call_mut(&call.record.id) {
                    match &outcome {
                        ToolCycleOutcome::Succeeded { output } => record.succeed(output.clone()),
                        ToolCycleOutcome::Failed { error } => record.fail(error.output_text()),
                    }
                }
                group.recompute()
            }
            None => ToolCallStatus::Error,
        };

        let snapshot = message.clone();
        upsert_logged(self.repository.as_ref(), &snapshot.id, snapshot.clone()).await;

        if group_status.is_terminal() {
            session.tool_call_active = false;
        }

        ToolCycle {
            message: snapshot,
            group_status,
            outcome,
        }
    }

    /// Mark every unfinished call as failed. Returns the updated message when
    /// anything changed.
    pub async fn fail_in_flight(&mut self, reason: &str) -> Option<Message> {
        let message = self.current.as_mut()?;
        let mut changed = false;
        for group in message.tool_groups_mut() {
            for call in &mut group.calls {
                if call.status == ToolCallStatus::Progress {
                    call.fail(reason);
                    changed = true;
                }
            }
            group.recompute();
        }
        if !changed {
            return None;
        }

        let snapshot = message.clone();
        upsert_logged(self.repository.as_ref(), &snapshot.id, snapshot.clone()).await;
        Some(snapshot)
    }

    /// Forget the turn's tool message and cached catalogs.
    pub async fn reset(&mut self) {
        self.current = None;
        self.resolver.clear().await;
    }
}
