//! `GET /ws/:session_id` — the one long-lived bidirectional stream per IDE connection
//! (SPEC_FULL.md §4.7, §4.7.1).
//!
//! Grounded in the teacher's `ws::terminal::handle_socket`: `socket.split()` into a sink half
//! owned by a dedicated writer task (fed here by an `mpsc` channel carrying both turn events and
//! heartbeat pings, in place of the teacher's PTY-output channel) and a stream half read by the
//! main task, which here parses [`InboundFrame`]s instead of the teacher's 2-variant terminal
//! `ClientMessage`. The edge does no business logic beyond frame validation and bridging: agent
//! switches are published on the bus for the Context subscriber to apply, and approval decisions
//! call the Approval Manager directly — the same suspend/resume primitives the Orchestrator
//! itself waits on.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use conduit_core::agent::LoopInput;
use conduit_core::bus::{Event, EventType, PublishMode};

use crate::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    UserMessage {
        content: Value,
        #[serde(default)]
        role: Option<String>,
    },
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    ApprovalDecision {
        request_id: String,
        decision: String,
        #[serde(default)]
        modified_arguments: Option<Value>,
        #[serde(default)]
        feedback: Option<String>,
    },
    SwitchAgent {
        agent_type: String,
        #[serde(default)]
        content: Option<String>,
    },
    PlanDecision {
        decision: String,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SessionInfoFrame<'a> {
    SessionInfo { session_id: &'a str },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ErrorFrame<'a> {
    Error { error: &'a str },
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, requested_session_id: String) {
    let session_id = match resolve_session(&state, &requested_session_id).await {
        Ok(id) => id,
        Err(err) => {
            let _ = send_error_and_close(socket, &err.to_string()).await;
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();

    let session_info = serde_json::to_value(SessionInfoFrame::SessionInfo {
        session_id: &session_id,
    })
    .expect("session_info frame is always representable as JSON");
    let _ = outbound_tx.send(session_info);

    let heartbeat_tx = outbound_tx.clone();
    let heartbeat_interval = state.config.ws_heartbeat_interval;
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            if heartbeat_tx.send(Value::Null).is_err() {
                break;
            }
        }
    });

    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = if frame.is_null() {
                Message::Ping(Vec::new())
            } else {
                Message::Text(strip_nulls(frame).to_string())
            };
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let current_turn_input: Arc<AsyncMutex<Option<mpsc::UnboundedSender<LoopInput>>>> =
        Arc::new(AsyncMutex::new(None));
    let working_dir = (*state.working_dir).clone();

    while let Some(Ok(message)) = ws_stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = outbound_tx.send(
                    serde_json::to_value(ErrorFrame::Error {
                        error: &format!("malformed frame: {err}"),
                    })
                    .unwrap(),
                );
                continue;
            }
        };

        handle_inbound_frame(
            frame,
            &state,
            &session_id,
            &working_dir,
            &outbound_tx,
            &current_turn_input,
        )
        .await;
    }

    if let Some(sender) = current_turn_input.lock().await.take() {
        let _ = sender.send(LoopInput::Cancel);
    }
    heartbeat_handle.abort();
    drop(outbound_tx);
    let _ = writer_handle.await;
}

async fn handle_inbound_frame(
    frame: InboundFrame,
    state: &AppState,
    session_id: &str,
    working_dir: &PathBuf,
    outbound_tx: &mpsc::UnboundedSender<Value>,
    current_turn_input: &Arc<AsyncMutex<Option<mpsc::UnboundedSender<LoopInput>>>>,
) {
    match frame {
        InboundFrame::UserMessage { content, .. } => {
            let handle = state.orchestrator.run(session_id.to_string(), working_dir.clone(), content);
            *current_turn_input.lock().await = Some(handle.input.clone());
            spawn_event_forwarder(handle.events, outbound_tx.clone(), current_turn_input.clone());
        }
        InboundFrame::ToolResult { call_id, result, error } => {
            if let Some(sender) = current_turn_input.lock().await.as_ref() {
                let _ = sender.send(LoopInput::RemoteToolResult { call_id, result, error });
            }
        }
        InboundFrame::ApprovalDecision {
            request_id,
            decision,
            modified_arguments,
            feedback,
        } => {
            let outcome = match decision.as_str() {
                "approve" => state.approvals.approve(&request_id, None).await,
                "edit" => state.approvals.approve(&request_id, modified_arguments.as_ref()).await,
                "reject" => state.approvals.reject(&request_id, feedback.as_deref()).await,
                other => {
                    let _ = outbound_tx.send(
                        serde_json::to_value(ErrorFrame::Error {
                            error: &format!("unknown approval decision '{other}'"),
                        })
                        .unwrap(),
                    );
                    return;
                }
            };
            if let Err(err) = outcome {
                let _ = outbound_tx.send(serde_json::to_value(ErrorFrame::Error { error: &err.to_string() }).unwrap());
            }
        }
        InboundFrame::SwitchAgent { agent_type, content: _ } => {
            let event = Event::new(
                EventType::AgentSwitched,
                "transport_edge",
                serde_json::json!({
                    "to_agent": agent_type,
                    "reason": "manual switch requested by IDE",
                }),
            )
            .with_session(session_id);
            state.bus.publish(event, PublishMode::AwaitHandlers).await;
        }
        InboundFrame::PlanDecision { decision } => {
            if decision == "approve" || decision == "continue" {
                let orchestrator = state.orchestrator.clone();
                let session_id = session_id.to_string();
                let working_dir = working_dir.clone();
                tokio::spawn(async move {
                    if let Err(err) = orchestrator.drive_plan(&session_id, working_dir).await {
                        tracing::warn!(%err, "drive_plan failed");
                    }
                });
            }
        }
    }
}

fn spawn_event_forwarder(
    mut events: tokio_stream::wrappers::UnboundedReceiverStream<conduit_core::agent::LoopEvent>,
    outbound_tx: mpsc::UnboundedSender<Value>,
    current_turn_input: Arc<AsyncMutex<Option<mpsc::UnboundedSender<LoopInput>>>>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let is_finished = matches!(event, conduit_core::agent::LoopEvent::Finished { .. });
            let value = serde_json::to_value(&event).expect("LoopEvent always serializes");
            if outbound_tx.send(value).is_err() {
                break;
            }
            if is_finished {
                current_turn_input.lock().await.take();
            }
        }
    });
}

async fn resolve_session(state: &AppState, requested_session_id: &str) -> anyhow::Result<String> {
    if let Some(stripped) = requested_session_id.strip_prefix("new_") {
        let _ = stripped;
        let session_id = uuid::Uuid::new_v4().to_string();
        state.store.create(&session_id, None, None, None).await?;
        Ok(session_id)
    } else {
        state
            .store
            .get(requested_session_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown session '{requested_session_id}'"))?;
        Ok(requested_session_id.to_string())
    }
}

async fn send_error_and_close(socket: WebSocket, error: &str) -> anyhow::Result<()> {
    let (mut sink, _stream) = socket.split();
    let frame = serde_json::to_value(ErrorFrame::Error { error }).expect("ErrorFrame always serializes");
    sink.send(Message::Text(frame.to_string())).await?;
    sink.close().await?;
    Ok(())
}

fn strip_nulls(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    value
}
