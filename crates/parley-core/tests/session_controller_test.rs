use std::sync::Arc;
use std::time::Duration;

use parley_core::api::ChatRequest;
use parley_core::config::{EngineConfig, MalformedPayloadPolicy};
use parley_core::conversation::{
    ContentBlock, InMemoryMessageRepository, Message, MessageRepository, ReasoningStatus, Role,
    ToolCallStatus,
};
use parley_core::error::EngineError;
use parley_core::session::{
    CancelReason, Collaborators, SessionController, SessionEvent, SessionPhase, TurnOutcome,
};
use parley_core::test_utils::packets::{
    answer, complete, delta, grouped_tool_call, packet, thoughts, tool_call,
};
use parley_core::test_utils::{
    ScriptedEvent, ScriptedResponse, ScriptedToolEndpoint, ScriptedTransport, StaticToolCatalog,
    StreamEnd,
};
use parley_tools::{ToolDescriptor, ToolOutput, ToolSourceCatalog};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Harness {
    controller: SessionController,
    transport: Arc<ScriptedTransport>,
    tools: Arc<ScriptedToolEndpoint>,
    repository: Arc<InMemoryMessageRepository>,
}

fn weather_catalog() -> StaticToolCatalog {
    StaticToolCatalog::new(vec![ToolSourceCatalog::new(
        "weather",
        vec![ToolDescriptor {
            name: "forecast".to_string(),
            description: "Daily forecast".to_string(),
            parameters: Value::Null,
        }],
    )])
}

fn harness(config: EngineConfig) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let tools = Arc::new(ScriptedToolEndpoint::new());
    let repository = Arc::new(InMemoryMessageRepository::new());
    let controller = SessionController::spawn(
        config,
        Collaborators {
            transport: transport.clone(),
            tool_endpoint: tools.clone(),
            tool_catalog: Arc::new(weather_catalog()),
            repository: repository.clone(),
        },
    );
    Harness {
        controller,
        transport,
        tools,
        repository,
    }
}

async fn ready(config: EngineConfig) -> Harness {
    let harness = harness(config);
    harness
        .controller
        .select_model(Some("test-model".to_string()))
        .await
        .unwrap();
    harness
}

async fn messages(harness: &Harness) -> Vec<Message> {
    harness.repository.list().await.unwrap()
}

fn send_in_background(harness: &Harness, text: &str) -> JoinHandle<Result<TurnOutcome, EngineError>> {
    let controller = harness.controller.clone();
    let text = text.to_string();
    tokio::spawn(async move { controller.send_message(text).await })
}

/// Wait until the live channels show `plain`.
async fn wait_for_plain(events: &mut broadcast::Receiver<SessionEvent>, plain: &str) {
    loop {
        if let SessionEvent::ChannelsUpdated { plain: current, .. } = events.recv().await.unwrap()
            && current == plain
        {
            return;
        }
    }
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn test_streamed_answer_is_persisted() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport
        .push_stream([delta("Hel"), delta("lo"), complete("Hello")]);

    let outcome = h.controller.send_message("hi").await.unwrap();

    let stored = messages(&h).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].rendered_text(), "hi");
    assert_eq!(stored[1].role, Role::Assistant);
    assert_eq!(stored[1].rendered_text(), "Hello");
    assert_eq!(outcome.message_id(), Some(stored[1].id.as_str()));

    let phases: Vec<SessionPhase> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::PhaseChanged { phase } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SessionPhase::Sending,
            SessionPhase::Streaming,
            SessionPhase::Completing,
            SessionPhase::Idle
        ]
    );

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert!(!snapshot.busy);
    assert_eq!(snapshot.plain_channel, "");
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_request_carries_session_and_tool_sources() {
    let h = ready(EngineConfig::default()).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string(), "web".to_string(), "weather".to_string()])
        .await
        .unwrap();
    h.transport.push_stream([packet(
        json!({"sessionId": "s-42", "content": "first", "isComplete": true}),
    )]);
    h.transport.push_stream([complete("second")]);

    let mut events = h.controller.subscribe();
    h.controller.send_message("one").await.unwrap();
    assert!(
        drain(&mut events).contains(&SessionEvent::SessionIdAssigned {
            session_id: "s-42".to_string()
        })
    );

    h.controller.send_message("two").await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(
        requests[0],
        ChatRequest {
            content: "one".to_string(),
            session_id: None,
            tool_source_ids: vec!["weather".to_string(), "web".to_string()],
            tool_group_id: None,
        }
    );
    assert_eq!(requests[1].session_id.as_deref(), Some("s-42"));
    assert_eq!(
        h.controller.snapshot().await.unwrap().session_id.as_deref(),
        Some("s-42")
    );
}

#[tokio::test]
async fn test_server_response_id_names_the_message() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push_stream([
        packet(json!({"id": "resp-1", "content": "Hi"})),
        packet(json!({"id": "resp-1", "content": "Hi there", "isComplete": true})),
    ]);

    let outcome = h.controller.send_message("hello").await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            message_id: Some("resp-1".to_string())
        }
    );
    let stored = messages(&h).await;
    assert_eq!(stored[1].id, "resp-1");
    assert_eq!(stored[1].rendered_text(), "Hi there");
}

#[tokio::test]
async fn test_inline_reasoning_is_split_into_blocks() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport.push_stream([
        answer("<think>check the"),
        answer(" units</think>"),
        answer("It is 21C."),
        packet(json!({"isComplete": true})),
    ]);

    h.controller.send_message("weather?").await.unwrap();

    let updates: Vec<(String, String, bool)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::ChannelsUpdated {
                plain,
                reasoning,
                reasoning_in_progress,
            } => Some((plain, reasoning, reasoning_in_progress)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            (String::new(), "check the".to_string(), true),
            (String::new(), "check the units".to_string(), false),
            ("It is 21C.".to_string(), "check the units".to_string(), false),
        ]
    );

    let stored = messages(&h).await;
    assert_eq!(
        stored[1].content,
        vec![
            ContentBlock::Reasoning {
                text: "check the units".to_string(),
                status: ReasoningStatus::Done
            },
            ContentBlock::Plain {
                text: "It is 21C.".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_thoughts_field_reasoning() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport.push_stream([
        thoughts("Looking up ", ""),
        thoughts("the forecast.", ""),
        thoughts("", "Sunny"),
        complete("Sunny all day"),
    ]);

    h.controller.send_message("forecast?").await.unwrap();

    let in_progress = drain(&mut events).into_iter().any(|event| {
        event
            == SessionEvent::ChannelsUpdated {
                plain: String::new(),
                reasoning: "Looking up the forecast.".to_string(),
                reasoning_in_progress: true,
            }
    });
    assert!(in_progress);

    let stored = messages(&h).await;
    assert_eq!(stored[1].reasoning_text(), "Looking up the forecast.");
    assert_eq!(stored[1].rendered_text(), "Sunny all day");
}

#[tokio::test]
async fn test_tool_call_continues_with_output() {
    let h = ready(EngineConfig::default()).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools
        .respond("forecast", ToolOutput::success("Sunny, 21C"));
    h.transport.push_hanging_stream([
        delta("Let me check."),
        grouped_tool_call("srv-group-1", "forecast", json!({"city": "Oslo"})),
    ]);
    h.transport.push_stream([complete("It is sunny in Oslo.")]);

    let outcome = h.controller.send_message("Weather in Oslo?").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Completed { message_id: Some(_) }));

    let invocations = h.tools.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].tool_source_id, "weather");
    assert_eq!(invocations[0].tool_args, json!({"city": "Oslo"}));

    let stored = messages(&h).await;
    assert_eq!(stored.len(), 3);
    let group = stored[1].tool_groups().next().unwrap();
    assert_eq!(group.group_id, "srv-group-1");
    assert_eq!(group.status, ToolCallStatus::Success);
    assert_eq!(group.calls[0].description, "Daily forecast");
    assert_eq!(group.calls[0].output_params_json.as_deref(), Some("Sunny, 21C"));
    assert_eq!(stored[2].rendered_text(), "It is sunny in Oslo.");

    let requests = h.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].content, "Sunny, 21C");
    assert_eq!(requests[1].tool_group_id.as_deref(), Some("srv-group-1"));
    assert_eq!(requests[1].tool_source_ids, vec!["weather"]);

    let snapshot = h.controller.snapshot().await.unwrap();
    assert!(!snapshot.tool_call_active);
}

#[tokio::test]
async fn test_tool_output_without_continuation_resumes_stream() {
    let config = EngineConfig {
        continue_after_tool: false,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools.respond("forecast", ToolOutput::success("Sunny"));
    h.transport.push_stream([
        tool_call("forecast", json!({})),
        complete("Sunny today."),
    ]);

    h.controller.send_message("forecast").await.unwrap();

    assert_eq!(h.transport.requests().len(), 1);
    let stored = messages(&h).await;
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].rendered_text(), "Sunny today.");
}

#[tokio::test]
async fn test_tool_failure_is_inlined_and_stream_resumes() {
    let h = ready(EngineConfig::default()).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools
        .respond("forecast", ToolOutput::failure("city not found"));
    h.transport.push_stream([
        delta("Checking"),
        tool_call("forecast", json!({"city": "Atlantis"})),
        packet(json!({"isComplete": true})),
    ]);

    h.controller.send_message("Weather in Atlantis?").await.unwrap();

    assert_eq!(h.transport.requests().len(), 1);
    let stored = messages(&h).await;
    assert_eq!(stored.len(), 3);
    let group = stored[1].tool_groups().next().unwrap();
    assert_eq!(group.status, ToolCallStatus::Error);
    assert_eq!(group.calls[0].output_params_json.as_deref(), Some("city not found"));
    assert_eq!(
        stored[2].rendered_text(),
        "Checking\n\n[Tool execution failed: city not found]"
    );
    assert_eq!(
        h.controller.snapshot().await.unwrap().last_error.as_deref(),
        Some("Tool execution failed: city not found")
    );
}

#[tokio::test]
async fn test_unresolved_tool_never_reaches_endpoint() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push_stream([
        tool_call("teleport", json!({"to": "Mars"})),
        packet(json!({"isComplete": true})),
    ]);

    h.controller.send_message("beam me up").await.unwrap();

    assert!(h.tools.invocations().is_empty());
    let stored = messages(&h).await;
    let group = stored[1].tool_groups().next().unwrap();
    assert_eq!(group.calls[0].tool_source_id, "");
    assert_eq!(group.calls[0].description, "Tool call");
    assert_eq!(
        stored[2].rendered_text(),
        "[Tool execution failed: Unknown tool: teleport]"
    );
}

#[tokio::test]
async fn test_second_directive_in_batch_is_ignored() {
    let h = ready(EngineConfig::default()).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools.respond("forecast", ToolOutput::success("ok"));
    h.transport.push_stream([packet(json!({
        "tool_calls": [
            {"function": {"name": "forecast", "arguments": "{\"city\":\"Oslo\"}"}},
            {"function": {"name": "forecast", "arguments": {"city": "Bergen"}}}
        ]
    }))]);
    h.transport.push_stream([complete("done")]);

    h.controller.send_message("both cities").await.unwrap();

    let invocations = h.tools.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].tool_args, json!({"city": "Oslo"}));
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_cancels_and_keeps_partial() {
    let config = EngineConfig {
        idle_timeout_secs: 5,
        total_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    h.transport.push_hanging_stream([delta("partial")]);

    let outcome = h.controller.send_message("hi").await.unwrap();

    let stored = messages(&h).await;
    assert_eq!(
        outcome,
        TurnOutcome::Cancelled {
            reason: CancelReason::IdleTimeout,
            message_id: Some(stored[1].id.clone()),
        }
    );
    assert_eq!(stored[1].rendered_text(), "partial\n\n[Response interrupted]");

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("No data received for 5 seconds")
    );
    assert!(h.transport.opened()[0].token.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_without_output_persists_nothing() {
    let config = EngineConfig {
        idle_timeout_secs: 5,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    h.transport.push_hanging_stream(Vec::<String>::new());

    let outcome = h.controller.send_message("hi").await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::Cancelled {
            reason: CancelReason::IdleTimeout,
            message_id: None,
        }
    );
    assert_eq!(messages(&h).await.len(), 1);

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("No data received for 5 seconds")
    );
}

#[tokio::test(start_paused = true)]
async fn test_total_timeout_despite_steady_events() {
    let config = EngineConfig {
        idle_timeout_secs: 5,
        total_timeout_secs: 8,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    let mut events = Vec::new();
    for word in ["a", "b", "c", "d", "e"] {
        events.push(ScriptedEvent::Data(answer(word)));
        events.push(ScriptedEvent::Delay(Duration::from_secs(3)));
    }
    h.transport.push(ScriptedResponse::Stream {
        events,
        then: StreamEnd::Hang,
    });

    let outcome = h.controller.send_message("spell").await.unwrap();

    assert!(matches!(
        outcome,
        TurnOutcome::Cancelled {
            reason: CancelReason::TotalTimeout,
            ..
        }
    ));
    assert_eq!(
        messages(&h).await[1].rendered_text(),
        "abc\n\n[Response interrupted]"
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_timer_is_paused_while_tool_runs() {
    let config = EngineConfig {
        idle_timeout_secs: 5,
        total_timeout_secs: 60,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools
        .respond("forecast", ToolOutput::success("Rain"))
        .delay(Duration::from_secs(20));
    h.transport
        .push_hanging_stream([tool_call("forecast", json!({}))]);
    h.transport.push_stream([complete("Rain expected.")]);

    let outcome = h.controller.send_message("forecast").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    assert_eq!(messages(&h).await[2].rendered_text(), "Rain expected.");
}

#[tokio::test]
async fn test_cancel_persists_partial_with_marker() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport.push_hanging_stream([delta("partial answer")]);

    let turn = send_in_background(&h, "hi");
    wait_for_plain(&mut events, "partial answer").await;
    h.controller.cancel().await.unwrap();

    let outcome = turn.await.unwrap().unwrap();
    let stored = messages(&h).await;
    assert_eq!(
        outcome,
        TurnOutcome::Cancelled {
            reason: CancelReason::User,
            message_id: Some(stored[1].id.clone()),
        }
    );
    assert_eq!(
        stored[1].rendered_text(),
        "partial answer\n\n[Response interrupted]"
    );
    assert!(h.transport.opened()[0].token.is_cancelled());

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn test_cancel_during_reasoning_keeps_it_in_progress() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport
        .push_hanging_stream([thoughts("Checking the sky", "")]);

    let turn = send_in_background(&h, "Will it rain?");
    loop {
        if let SessionEvent::ChannelsUpdated { reasoning, .. } = events.recv().await.unwrap()
            && reasoning == "Checking the sky"
        {
            break;
        }
    }
    h.controller.cancel().await.unwrap();
    turn.await.unwrap().unwrap();

    let stored = messages(&h).await;
    assert_eq!(
        stored[1].content[0],
        ContentBlock::Reasoning {
            text: "Checking the sky".to_string(),
            status: ReasoningStatus::InProgress
        }
    );
    assert!(stored[1].rendered_text().ends_with("[Response interrupted]"));
}

#[tokio::test]
async fn test_cancel_marks_running_tool_failed() {
    let h = ready(EngineConfig::default()).await;
    h.controller
        .set_tool_sources(vec!["weather".to_string()])
        .await
        .unwrap();
    h.tools.delay(Duration::from_secs(3600));
    h.transport
        .push_hanging_stream([tool_call("forecast", json!({}))]);

    let mut events = h.controller.subscribe();
    let turn = send_in_background(&h, "forecast");
    loop {
        if let SessionEvent::ToolMessageUpdated { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    h.controller.cancel().await.unwrap();

    assert!(matches!(
        turn.await.unwrap().unwrap(),
        TurnOutcome::Cancelled {
            reason: CancelReason::User,
            message_id: None
        }
    ));
    let stored = messages(&h).await;
    let group = stored[1].tool_groups().next().unwrap();
    assert_eq!(group.status, ToolCallStatus::Error);
}

#[tokio::test]
async fn test_new_message_supersedes_active_turn() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport.push_hanging_stream([delta("first")]);
    h.transport.push_stream([complete("second")]);

    let first = send_in_background(&h, "one");
    wait_for_plain(&mut events, "first").await;
    let second = h.controller.send_message("two").await.unwrap();

    assert!(matches!(
        first.await.unwrap().unwrap(),
        TurnOutcome::Cancelled {
            reason: CancelReason::Superseded,
            message_id: Some(_)
        }
    ));
    assert!(matches!(second, TurnOutcome::Completed { message_id: Some(_) }));
    assert!(h.transport.opened()[1].prior_turns_cancelled);

    let texts: Vec<String> = messages(&h)
        .await
        .iter()
        .map(Message::rendered_text)
        .collect();
    assert_eq!(
        texts,
        vec!["one", "first\n\n[Response interrupted]", "two", "second"]
    );
}

#[tokio::test]
async fn test_send_without_model_fails() {
    let h = harness(EngineConfig::default());

    let result = h.controller.send_message("hi").await;

    assert_eq!(result, Err(EngineError::NoModelSelected));
    assert!(messages(&h).await.is_empty());
    assert!(h.transport.requests().is_empty());
    assert_eq!(
        h.controller.snapshot().await.unwrap().last_error.as_deref(),
        Some("No model selected")
    );
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let h = ready(EngineConfig::default()).await;
    assert!(matches!(
        h.controller.send_message(" \n ").await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(h.transport.requests().is_empty());
}

#[tokio::test]
async fn test_resend_reuses_last_input() {
    let h = ready(EngineConfig::default()).await;
    assert_eq!(
        h.controller.resend_last_message().await,
        Err(EngineError::NothingToResend)
    );

    h.transport.push_stream([complete("one")]);
    h.transport.push_stream([complete("two")]);
    h.controller.send_message("hi").await.unwrap();
    h.controller.resend_last_message().await.unwrap();

    let requests = h.transport.requests();
    assert_eq!(requests[1].content, "hi");
    let stored = messages(&h).await;
    let roles: Vec<Role> = stored.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Assistant]);
    assert_eq!(stored[2].rendered_text(), "two");
    assert!(!h.controller.snapshot().await.unwrap().resending);
}

#[tokio::test]
async fn test_malformed_packet_is_skipped_by_default() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push_stream([
        "not json".to_string(),
        delta("still"),
        complete("still here"),
    ]);

    let outcome = h.controller.send_message("hi").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    assert_eq!(messages(&h).await[1].rendered_text(), "still here");
    let last_error = h.controller.snapshot().await.unwrap().last_error.unwrap();
    assert!(last_error.starts_with("Malformed event payload"));
}

#[tokio::test]
async fn test_malformed_packet_aborts_when_configured() {
    let config = EngineConfig {
        malformed_payload: MalformedPayloadPolicy::Abort,
        ..EngineConfig::default()
    };
    let h = ready(config).await;
    h.transport
        .push_stream(["{\"content\": ".to_string(), complete("never")]);

    let result = h.controller.send_message("hi").await;

    assert!(matches!(result, Err(EngineError::MalformedEventPayload(_))));
    assert_eq!(messages(&h).await.len(), 1);
}

#[tokio::test]
async fn test_enveloped_packets_are_unwrapped() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push_stream([parley_core::test_utils::packets::enveloped(
        json!({"content": "wrapped", "is_complete": true}),
    )]);

    h.controller.send_message("hi").await.unwrap();

    assert_eq!(messages(&h).await[1].rendered_text(), "wrapped");
}

#[tokio::test]
async fn test_buffered_reply_with_content_completes() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push(ScriptedResponse::Buffered {
        content_type: Some("application/json".to_string()),
        body: json!({"data": {"content": "Buffered answer"}}).to_string(),
    });

    let outcome = h.controller.send_message("hi").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { message_id: Some(_) }));
    assert_eq!(messages(&h).await[1].rendered_text(), "Buffered answer");
}

#[tokio::test]
async fn test_buffered_reply_errors() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push(ScriptedResponse::Buffered {
        content_type: Some("application/json".to_string()),
        body: json!({"error": {"message": "quota exceeded"}}).to_string(),
    });
    h.transport.push(ScriptedResponse::Buffered {
        content_type: Some("text/html".to_string()),
        body: "<html>gateway</html>".to_string(),
    });

    assert_eq!(
        h.controller.send_message("one").await,
        Err(EngineError::ServerReported("quota exceeded".to_string()))
    );
    assert_eq!(
        h.controller.send_message("two").await,
        Err(EngineError::CannotParseFallback {
            content_type: "text/html".to_string()
        })
    );
}

#[tokio::test]
async fn test_open_failure_reports_status() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push(ScriptedResponse::Fail {
        status: 502,
        body: "bad gateway".to_string(),
    });

    assert_eq!(
        h.controller.send_message("hi").await,
        Err(EngineError::OpenFailed {
            status: 502,
            details: "bad gateway".to_string()
        })
    );
    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, SessionPhase::Idle);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_stream_closed_early_keeps_partial() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push_stream([delta("half")]);

    let result = h.controller.send_message("hi").await;

    assert_eq!(result, Err(EngineError::StreamClosed));
    assert_eq!(
        messages(&h).await[1].rendered_text(),
        "half\n\n[Connection interrupted]"
    );
    // The failed turn stays visible until the next send.
    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.plain_channel, "half");
}

#[tokio::test]
async fn test_stream_transport_error_fails_turn() {
    let h = ready(EngineConfig::default()).await;
    h.transport.push(ScriptedResponse::Stream {
        events: vec![
            ScriptedEvent::Data(delta("so far")),
            ScriptedEvent::Error("connection reset".to_string()),
        ],
        then: StreamEnd::Close,
    });

    let result = h.controller.send_message("hi").await;

    assert!(matches!(result, Err(EngineError::Transport(details)) if details.contains("connection reset")));
}

#[tokio::test]
async fn test_shutdown_answers_active_turn() {
    let h = ready(EngineConfig::default()).await;
    let mut events = h.controller.subscribe();
    h.transport.push_hanging_stream([delta("working")]);

    let turn = send_in_background(&h, "hi");
    wait_for_plain(&mut events, "working").await;
    h.controller.shutdown().await;

    assert_eq!(turn.await.unwrap(), Err(EngineError::Shutdown));
    assert_eq!(
        messages(&h).await[1].rendered_text(),
        "working\n\n[Response interrupted]"
    );
    assert_eq!(h.controller.snapshot().await, Err(EngineError::Shutdown));
}
