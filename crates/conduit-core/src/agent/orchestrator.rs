//! The Agentic Orchestrator: the per-turn loop (SPEC_FULL.md §4.6).
//!
//! Grounded in the teacher's `agent::orchestrator::AgenticLoop` (the stream-then-dispatch-tools
//! cycle) and `agent::executor`'s approval-wait polling, generalized from a single fixed agent
//! into a turn that may hand off between the five agents in [`super::definitions`]. The
//! `ApprovalApproved`/`ApprovalRejected` wait is event-driven rather than polling (SPEC_FULL.md
//! §4.3 already publishes those events via `PublishMode::AwaitHandlers`; subscribing for the
//! matching `correlation_id` is simpler than reintroducing the teacher's timeout-poll loop).

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::ai::{AiClient, AiTool, AiToolCall, ModelMessage, Role, StreamChunk, Usage};
use crate::bus::{Event, EventBus, EventCategory, EventType, Handler, PublishMode, Selector};
use crate::error::{LlmError, OrchestratorError};
use crate::storage::{Message, MessageRole, NewMessage, PlanStatus, SessionStore, ToolCallRef};
use crate::tools::{DispatchOutcome, ToolContext, ToolDispatcher};

use super::classify;
use super::definitions::{self, AgentDefinition};
use super::loop_events::{LoopEvent, LoopInput};
use super::plan::PlanExecutionEngine;

/// The components one turn composes. Cheaply `Clone`-able; share one instance across the
/// composition root. `bus` MUST be the same instance handed to the [`crate::approval::ApprovalManager`]
/// inside `dispatcher`, or the approval-wait subscription below never sees a resolution.
#[derive(Clone)]
pub struct AgentServices {
    pub store: SessionStore,
    pub bus: EventBus,
    pub dispatcher: Arc<ToolDispatcher>,
    pub ai_client: Arc<AiClient>,
}

/// A running turn, as seen by the transport edge: an event stream out, an input sink in.
/// Dropping `events` does not cancel the turn (the spawned task still owns it); send
/// [`LoopInput::Cancel`] for a clean stop.
pub struct TurnHandle {
    pub events: UnboundedReceiverStream<LoopEvent>,
    pub input: mpsc::UnboundedSender<LoopInput>,
}

pub struct AgenticOrchestrator {
    services: AgentServices,
    model: String,
    max_iterations: usize,
}

impl AgenticOrchestrator {
    pub fn new(services: AgentServices, model: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            services,
            model: model.into(),
            max_iterations,
        }
    }

    /// Starts one turn and returns immediately with a handle to its event stream. Classifies
    /// the turn and may hand off to a specialist agent (SPEC_FULL.md §4.6 step 3).
    pub fn run(&self, session_id: impl Into<String>, working_dir: PathBuf, user_content: Value) -> TurnHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let services = self.services.clone();
        let model = self.model.clone();
        let max_iterations = self.max_iterations;
        let session_id = session_id.into();

        tokio::spawn(async move {
            let result = execute_turn(
                &services,
                &model,
                max_iterations,
                &session_id,
                working_dir,
                user_content,
                None,
                &event_tx,
                input_rx,
            )
            .await;
            if let Err(e) = result {
                let _ = event_tx.send(LoopEvent::Error { error: e.to_string() });
            }
        });

        TurnHandle {
            events: UnboundedReceiverStream::new(event_rx),
            input: input_tx,
        }
    }

    /// Drives every subtask of the session's plan to a terminal state (SPEC_FULL.md §4.6.2),
    /// one readiness wave at a time. Each subtask runs the same per-turn algorithm as [`Self::run`]
    /// with its assigned agent forced (no turn classification) and no live transport edge attached.
    pub async fn drive_plan(&self, session_id: &str, working_dir: PathBuf) -> Result<(), OrchestratorError> {
        let engine = PlanExecutionEngine::new(self.services.store.clone());
        let Some(plan) = engine.plan_for_session(session_id).await? else {
            return Ok(());
        };

        loop {
            let ready = engine.ready_subtasks(&plan.id).await?;
            if ready.is_empty() {
                break;
            }
            for subtask in ready {
                engine.mark_running(&subtask.id).await?;
                let (event_tx, _event_rx) = mpsc::unbounded_channel();
                let (_input_tx, input_rx) = mpsc::unbounded_channel();
                let result = execute_turn(
                    &self.services,
                    &self.model,
                    self.max_iterations,
                    session_id,
                    working_dir.clone(),
                    json!(subtask.description),
                    Some(subtask.agent.clone()),
                    &event_tx,
                    input_rx,
                )
                .await;

                match result {
                    Ok(()) => engine.mark_completed(&subtask.id).await?,
                    Err(OrchestratorError::Llm(LlmError::Cancelled)) => {
                        engine.observe_cancelled_subtask_settled(&plan.id, &subtask.id).await?;
                    }
                    Err(_) => engine.mark_failed(&subtask.id).await?,
                }
            }
        }

        self.services.store.set_plan_status(&plan.id, PlanStatus::Completed).await?;
        Ok(())
    }
}

/// The shared per-turn algorithm. `forced_agent` skips turn classification (used by
/// [`AgenticOrchestrator::drive_plan`], where the subtask already names its agent).
#[allow(clippy::too_many_arguments)]
async fn execute_turn(
    services: &AgentServices,
    model: &str,
    max_iterations: usize,
    session_id: &str,
    working_dir: PathBuf,
    user_content: Value,
    forced_agent: Option<String>,
    events: &mpsc::UnboundedSender<LoopEvent>,
    mut input: mpsc::UnboundedReceiver<LoopInput>,
) -> Result<(), OrchestratorError> {
    let _lock = services.store.lock_session(session_id).await;
    let started_at = std::time::Instant::now();

    services
        .store
        .append_message_immediate(session_id, NewMessage::user(user_content.clone()))
        .await?;

    let current_agent = match forced_agent {
        Some(agent) => agent,
        None => classify_and_switch(services, model, session_id, &user_content, events).await?,
    };

    let definition = definitions::get(&current_agent)
        .or_else(|| definitions::get(definitions::ORCHESTRATOR))
        .expect("the orchestrator agent definition always exists");

    let mut conversation = build_conversation(&services.store, session_id, definition).await?;
    let mut usage = Usage::default();

    let mut iteration = 0usize;
    loop {
        iteration += 1;
        if iteration > max_iterations {
            return Err(OrchestratorError::IterationLimitExceeded(max_iterations));
        }
        if matches!(input.try_recv(), Ok(LoopInput::Cancel)) {
            return Err(OrchestratorError::Llm(LlmError::Cancelled));
        }

        let ai_tools = allowed_tools(services, &current_agent).await;
        let mut stream = services.ai_client.stream_completion(model, &conversation, &ai_tools).await?;

        let mut text = String::new();
        let mut tool_calls: Vec<AiToolCall> = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Delta(token) => {
                    text.push_str(&token);
                    let _ = events.send(LoopEvent::AssistantMessage { token, is_final: false });
                }
                StreamChunk::ToolCallDelta(call) => tool_calls.push(call),
                StreamChunk::Usage(u) => usage = u,
                StreamChunk::Done => break,
            }
        }
        let _ = events.send(LoopEvent::AssistantMessage {
            token: String::new(),
            is_final: true,
        });

        if tool_calls.is_empty() {
            if !text.is_empty() {
                conversation.push(ModelMessage {
                    role: Role::Assistant,
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                });
                services
                    .store
                    .append_message(session_id, NewMessage::assistant(json!(text), None))
                    .await?;
            }
            let _ = events.send(LoopEvent::TurnComplete { has_more: false });
            break;
        }

        let tool_call_refs: Vec<ToolCallRef> = tool_calls
            .iter()
            .map(|c| ToolCallRef {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.arguments.clone(),
            })
            .collect();
        conversation.push(ModelMessage {
            role: Role::Assistant,
            content: if text.is_empty() { None } else { Some(text.clone()) },
            tool_calls: Some(tool_calls.clone()),
            tool_call_id: None,
            name: None,
        });
        services
            .store
            .append_message_immediate(
                session_id,
                NewMessage::assistant(json!(text), Some(tool_call_refs.clone())),
            )
            .await?;

        let ctx = ToolContext::new(working_dir.clone(), current_agent.clone(), session_id.to_string());
        for call_ref in &tool_call_refs {
            let reply = run_one_tool_call(services, &ctx, call_ref, definition, events, &mut input).await?;
            conversation.push(ModelMessage {
                role: Role::Tool,
                content: Some(reply.to_string()),
                tool_calls: None,
                tool_call_id: Some(call_ref.id.clone()),
                name: Some(call_ref.name.clone()),
            });
            services
                .store
                .append_message(session_id, NewMessage::tool(call_ref.id.clone(), reply))
                .await?;
        }
        let _ = events.send(LoopEvent::TurnComplete { has_more: true });
    }

    services
        .bus
        .publish(
            Event::new(
                EventType::AgentProcessingCompleted,
                "orchestrator",
                json!({
                    "duration_ms": started_at.elapsed().as_millis() as u64,
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
            )
            .with_session(session_id),
            PublishMode::FireAndForget,
        )
        .await;
    let _ = events.send(LoopEvent::Finished {
        session_id: session_id.to_string(),
    });
    Ok(())
}

/// Classifies the turn when the current agent is the orchestrator (SPEC_FULL.md §4.6 step 3) and
/// publishes `agent_switched` (awaiting the context subscriber) when the target agent differs.
/// Leaves the current agent untouched otherwise.
async fn classify_and_switch(
    services: &AgentServices,
    model: &str,
    session_id: &str,
    user_content: &Value,
    events: &mpsc::UnboundedSender<LoopEvent>,
) -> Result<String, OrchestratorError> {
    let context = services
        .store
        .get_context(session_id)
        .await?
        .ok_or_else(|| crate::error::StorageError::NotFound(format!("no agent context for session {session_id}")))?;
    let mut current_agent = context.current_agent;

    if current_agent != definitions::ORCHESTRATOR {
        return Ok(current_agent);
    }

    let user_text = user_content
        .as_str()
        .map(ToString::to_string)
        .unwrap_or_else(|| user_content.to_string());
    let classification = classify::classify_turn(&services.ai_client, model, &user_text).await;

    if classification.agent != current_agent && definitions::get(&classification.agent).is_some() {
        services
            .bus
            .publish(
                Event::new(
                    EventType::AgentSwitched,
                    "orchestrator",
                    json!({
                        "from_agent": current_agent,
                        "to_agent": classification.agent,
                        "reason": classification.reason,
                        "confidence": classification.confidence,
                    }),
                )
                .with_session(session_id),
                PublishMode::AwaitHandlers,
            )
            .await;
        let _ = events.send(LoopEvent::AgentSwitched {
            from_agent: Some(current_agent.clone()),
            to_agent: classification.agent.clone(),
            reason: classification.reason,
            confidence: Some(classification.confidence),
        });
        current_agent = classification.agent;
    }

    Ok(current_agent)
}

async fn allowed_tools(services: &AgentServices, agent: &str) -> Vec<AiTool> {
    services
        .dispatcher
        .registry()
        .specs()
        .await
        .into_iter()
        .filter(|spec| spec.allowed_agents.iter().any(|a| a == agent))
        .map(|spec| AiTool {
            name: spec.name,
            description: spec.description,
            input_schema: spec.parameters_schema,
        })
        .collect()
}

/// Dispatches one tool_call and resolves it to a `{ok, data|error}` value, suspending the turn on
/// `AwaitingApproval`/`AwaitingRemote` (SPEC_FULL.md §4.4) until it settles.
async fn run_one_tool_call(
    services: &AgentServices,
    ctx: &ToolContext,
    call_ref: &ToolCallRef,
    definition: &AgentDefinition,
    events: &mpsc::UnboundedSender<LoopEvent>,
    input: &mut mpsc::UnboundedReceiver<LoopInput>,
) -> Result<Value, OrchestratorError> {
    let outcome = services
        .dispatcher
        .dispatch(ctx, call_ref, definition.file_restriction.as_ref())
        .await?;

    let requires_approval = matches!(outcome, DispatchOutcome::AwaitingApproval { .. });
    let _ = events.send(LoopEvent::ToolCall {
        call_id: call_ref.id.clone(),
        tool_name: call_ref.name.clone(),
        arguments: call_ref.arguments.clone(),
        requires_approval,
    });

    match outcome {
        DispatchOutcome::Completed(value) => Ok(value),
        DispatchOutcome::AwaitingRemote => wait_for_remote(input, &call_ref.id).await,
        DispatchOutcome::AwaitingApproval { request_id } => {
            if let Some(pending) = services.store.get_pending_approval(&request_id).await? {
                let _ = events.send(LoopEvent::ApprovalRequired {
                    request_id: request_id.clone(),
                    subject: pending.subject,
                    arguments: pending.arguments,
                    reason: pending.reason,
                });
            }
            match wait_for_approval(&services.bus, &services.store, &request_id, input).await? {
                ApprovalOutcome::Approved(modified_arguments) => {
                    let mut effective_call = call_ref.clone();
                    if let Some(args) = modified_arguments {
                        effective_call.arguments = args;
                    }
                    match services.dispatcher.run_local(ctx, &effective_call).await? {
                        DispatchOutcome::Completed(value) => Ok(value),
                        other => unreachable!("run_local never suspends: {other:?}"),
                    }
                }
                ApprovalOutcome::Rejected(reason) => Ok(json!({
                    "ok": false,
                    "error": {
                        "code": "rejected",
                        "message": reason.unwrap_or_else(|| "rejected by reviewer".to_string()),
                    },
                })),
            }
        }
    }
}

/// Blocks until a `tool_result` frame matching `call_id` arrives over the transport edge, or the
/// turn is cancelled.
async fn wait_for_remote(input: &mut mpsc::UnboundedReceiver<LoopInput>, call_id: &str) -> Result<Value, OrchestratorError> {
    loop {
        match input.recv().await {
            Some(LoopInput::RemoteToolResult { call_id: id, result, error }) if id == call_id => {
                return Ok(match (result, error) {
                    (Some(v), _) => json!({"ok": true, "data": v}),
                    (None, Some(e)) => json!({"ok": false, "error": {"code": "remote_error", "message": e}}),
                    (None, None) => json!({"ok": false, "error": {"code": "remote_error", "message": "no result provided"}}),
                });
            }
            Some(LoopInput::RemoteToolResult { .. }) => continue,
            Some(LoopInput::Cancel) => return Err(OrchestratorError::Llm(LlmError::Cancelled)),
            None => {
                return Ok(json!({
                    "ok": false,
                    "error": {"code": "remote_error", "message": "input channel closed before a reply arrived"},
                }))
            }
        }
    }
}

enum ApprovalOutcome {
    Approved(Option<Value>),
    Rejected(Option<String>),
}

/// Subscribes an ephemeral handler for `approval_approved`/`approval_rejected` events carrying
/// this `request_id` as their correlation id, rather than polling the store (contrast with the
/// teacher's `executor::wait_for_approval`, which predates an event-driven approval manager).
async fn wait_for_approval(
    bus: &EventBus,
    store: &SessionStore,
    request_id: &str,
    input: &mut mpsc::UnboundedReceiver<LoopInput>,
) -> Result<ApprovalOutcome, OrchestratorError> {
    let (tx, mut rx) = oneshot::channel();
    let waiter = Arc::new(ApprovalWaiter {
        request_id: request_id.to_string(),
        store: store.clone(),
        sender: AsyncMutex::new(Some(tx)),
    });
    let subscription = bus.subscribe(Selector::Category(EventCategory::Approval), 50, waiter);

    let outcome = loop {
        tokio::select! {
            resolved = &mut rx => {
                break Ok(resolved.unwrap_or(ApprovalOutcome::Rejected(Some("approval channel closed".to_string()))));
            }
            next_input = input.recv() => {
                match next_input {
                    Some(LoopInput::Cancel) => break Err(OrchestratorError::Llm(LlmError::Cancelled)),
                    Some(LoopInput::RemoteToolResult { .. }) | None => continue,
                }
            }
        }
    };
    subscription.cancel();
    outcome
}

struct ApprovalWaiter {
    request_id: String,
    store: SessionStore,
    sender: AsyncMutex<Option<oneshot::Sender<ApprovalOutcome>>>,
}

#[async_trait::async_trait]
impl Handler for ApprovalWaiter {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if event.correlation_id.as_deref() != Some(self.request_id.as_str()) {
            return Ok(());
        }
        let outcome = match event.event_type {
            EventType::ApprovalApproved => {
                let modified_arguments = self
                    .store
                    .get_pending_approval(&self.request_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|pending| pending.arguments);
                ApprovalOutcome::Approved(modified_arguments)
            }
            EventType::ApprovalRejected => {
                let reason = event.payload.get("reason").and_then(Value::as_str).map(str::to_string);
                ApprovalOutcome::Rejected(reason)
            }
            _ => return Ok(()),
        };
        if let Some(sender) = self.sender.lock().await.take() {
            let _ = sender.send(outcome);
        }
        Ok(())
    }
}

async fn build_conversation(
    store: &SessionStore,
    session_id: &str,
    definition: &AgentDefinition,
) -> Result<Vec<ModelMessage>, crate::error::StorageError> {
    let mut conversation = vec![ModelMessage::system(definition.system_prompt)];
    for message in store.list_messages(session_id).await? {
        conversation.push(message_to_model_message(&message));
    }
    Ok(conversation)
}

fn message_to_model_message(message: &Message) -> ModelMessage {
    let role = match message.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
        MessageRole::Tool => Role::Tool,
        MessageRole::System => Role::System,
    };
    let content = match &message.content {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    };
    let tool_calls = message.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|c| AiToolCall {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.arguments.clone(),
            })
            .collect()
    });
    ModelMessage {
        role,
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
        name: message.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalManager, ApprovalPolicy};
    use crate::bus::EventBus;
    use crate::storage::{PersistenceMode, RequestType};
    use serde_json::json;

    #[tokio::test]
    async fn build_conversation_prepends_system_prompt_and_converts_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("t.db"), EventBus::new(), PersistenceMode::Immediate).unwrap();
        store.create("s1", None, None, None).await.unwrap();
        store.append_message("s1", NewMessage::user(json!("hello"))).await.unwrap();

        let definition = definitions::get(definitions::CODER).unwrap();
        let conversation = build_conversation(&store, "s1", definition).await.unwrap();

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].role, Role::System);
        assert_eq!(conversation[1].role, Role::User);
        assert_eq!(conversation[1].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn wait_for_approval_resolves_on_matching_approved_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let store = SessionStore::new(dir.path().join("t.db"), bus.clone(), PersistenceMode::Immediate).unwrap();
        store.create("s1", None, None, None).await.unwrap();
        let approvals = ApprovalManager::new(store.clone(), bus.clone(), ApprovalPolicy::default_policy(), std::time::Duration::from_secs(300));
        approvals
            .add_pending("r1", "s1", RequestType::Tool, "bash", &json!({"cmd": "ls"}), None)
            .await
            .unwrap();

        let (_input_tx, mut input_rx) = mpsc::unbounded_channel();
        let wait = tokio::spawn({
            let bus = bus.clone();
            let store = store.clone();
            async move { wait_for_approval(&bus, &store, "r1", &mut input_rx).await }
        });

        // Give the waiter a moment to subscribe before the decision lands.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        approvals.approve("r1", Some(&json!({"cmd": "ls -la"}))).await.unwrap();

        let outcome = wait.await.unwrap().unwrap();
        match outcome {
            ApprovalOutcome::Approved(Some(args)) => assert_eq!(args["cmd"], "ls -la"),
            ApprovalOutcome::Approved(None) => panic!("expected the modified arguments to be carried through"),
            ApprovalOutcome::Rejected(_) => panic!("expected Approved, got Rejected"),
        }
    }

    #[tokio::test]
    async fn wait_for_approval_resolves_on_matching_rejected_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let store = SessionStore::new(dir.path().join("t.db"), bus.clone(), PersistenceMode::Immediate).unwrap();
        store.create("s1", None, None, None).await.unwrap();
        let approvals = ApprovalManager::new(store.clone(), bus.clone(), ApprovalPolicy::default_policy(), std::time::Duration::from_secs(300));
        approvals
            .add_pending("r1", "s1", RequestType::Tool, "bash", &json!({}), None)
            .await
            .unwrap();

        let (_input_tx, mut input_rx) = mpsc::unbounded_channel();
        let wait = tokio::spawn({
            let bus = bus.clone();
            let store = store.clone();
            async move { wait_for_approval(&bus, &store, "r1", &mut input_rx).await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        approvals.reject("r1", Some("too risky")).await.unwrap();

        let outcome = wait.await.unwrap().unwrap();
        match outcome {
            ApprovalOutcome::Rejected(Some(reason)) => assert_eq!(reason, "too risky"),
            _ => panic!("expected Rejected with feedback"),
        }
    }

    #[tokio::test]
    async fn wait_for_approval_is_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let store = SessionStore::new(dir.path().join("t.db"), bus.clone(), PersistenceMode::Immediate).unwrap();
        store.create("s1", None, None, None).await.unwrap();

        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        input_tx.send(LoopInput::Cancel).unwrap();

        let result = wait_for_approval(&bus, &store, "never-resolves", &mut input_rx).await;
        assert!(matches!(result, Err(OrchestratorError::Llm(LlmError::Cancelled))));
    }

    #[tokio::test]
    async fn wait_for_remote_matches_call_id_and_ignores_others() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(LoopInput::RemoteToolResult {
            call_id: "other".to_string(),
            result: Some(json!("noise")),
            error: None,
        })
        .unwrap();
        tx.send(LoopInput::RemoteToolResult {
            call_id: "call_1".to_string(),
            result: Some(json!({"status": "done"})),
            error: None,
        })
        .unwrap();

        let value = wait_for_remote(&mut rx, "call_1").await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["data"]["status"], "done");
    }
}
