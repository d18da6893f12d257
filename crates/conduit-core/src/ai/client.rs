//! The LLM Client: one streaming-completion operation (SPEC_FULL.md §4.5, §4.5.1).
//!
//! Grounded in the teacher's `ai::client::streaming::spawn_sse_stream_task` channel-forwarding
//! architecture, collapsed from multi-provider format dispatch to the single normalized
//! OpenAI-style wire format SPEC_FULL.md §4.5.1 specifies, and in `ai::retry::backoff` (present
//! only as a `pub use` in the retrieved pack; its exponential-backoff-with-jitter shape is
//! reconstructed here from that module's doc comment and SPEC_FULL.md's stated defaults).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::LlmError;

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::sse::{SseLine, SseLineBuffer};
use super::types::{AiTool, AiToolCall, ModelMessage, StreamChunk, Usage};

const RETRY_BACKOFFS_MS: [u64; 3] = [500, 1_000, 2_000];
const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    circuit: Arc<CircuitBreaker>,
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl AiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, request_timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            circuit: Arc::new(CircuitBreaker::new(CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_COOLDOWN)),
        })
    }

    /// Streams one completion. The returned stream yields `delta`, `tool_call_delta` (already
    /// coalesced per index), `usage`, and a terminal `done` chunk.
    pub async fn stream_completion(
        &self,
        model: &str,
        messages: &[ModelMessage],
        tools: &[AiTool],
    ) -> Result<UnboundedReceiverStream<Result<StreamChunk, LlmError>>, LlmError> {
        if self.circuit.state() == CircuitState::Open {
            return Err(LlmError::CircuitOpen(self.base_url.clone()));
        }

        let body = build_request_body(model, messages, tools);
        let response = self.send_with_retry(&body).await?;
        self.circuit.record_success();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut buf = SseLineBuffer::default();
            let mut pending_tool_calls: HashMap<u64, PartialToolCall> = HashMap::new();
            let mut finished_with_tool_calls = false;

            while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Request(e)));
                        return;
                    }
                };
                for line in buf.push(&bytes) {
                    match line {
                        SseLine::Done => {
                            if finished_with_tool_calls {
                                for (_, partial) in pending_tool_calls.drain() {
                                    if let (Some(id), Some(name)) = (partial.id, partial.name) {
                                        let arguments: Value =
                                            serde_json::from_str(&partial.arguments).unwrap_or(Value::Null);
                                        let _ = tx.send(Ok(StreamChunk::ToolCallDelta(AiToolCall {
                                            id,
                                            name,
                                            arguments,
                                        })));
                                    }
                                }
                            }
                            let _ = tx.send(Ok(StreamChunk::Done));
                            return;
                        }
                        SseLine::Data(data) => {
                            let Ok(event) = serde_json::from_str::<Value>(&data) else {
                                continue;
                            };
                            if let Some(usage) = event.get("usage") {
                                if let Ok(usage) = serde_json::from_value::<Usage>(usage.clone()) {
                                    let _ = tx.send(Ok(StreamChunk::Usage(usage)));
                                }
                            }
                            let Some(choice) = event.get("choices").and_then(|c| c.get(0)) else {
                                continue;
                            };
                            if let Some(content) = choice
                                .get("delta")
                                .and_then(|d| d.get("content"))
                                .and_then(Value::as_str)
                            {
                                if !content.is_empty() {
                                    let _ = tx.send(Ok(StreamChunk::Delta(content.to_string())));
                                }
                            }
                            if let Some(deltas) = choice
                                .get("delta")
                                .and_then(|d| d.get("tool_calls"))
                                .and_then(Value::as_array)
                            {
                                for delta in deltas {
                                    let index = delta.get("index").and_then(Value::as_u64).unwrap_or(0);
                                    let entry = pending_tool_calls.entry(index).or_default();
                                    if let Some(id) = delta.get("id").and_then(Value::as_str) {
                                        entry.id = Some(id.to_string());
                                    }
                                    if let Some(func) = delta.get("function") {
                                        if let Some(name) = func.get("name").and_then(Value::as_str) {
                                            entry.name = Some(name.to_string());
                                        }
                                        if let Some(fragment) =
                                            func.get("arguments_fragment").and_then(Value::as_str)
                                        {
                                            entry.arguments.push_str(fragment);
                                        }
                                    }
                                }
                            }
                            if choice.get("finish_reason").and_then(Value::as_str) == Some("tool_calls") {
                                finished_with_tool_calls = true;
                            }
                        }
                    }
                }
            }
            // Stream ended without an explicit [DONE] sentinel.
            let _ = tx.send(Err(LlmError::TruncatedStream));
        });

        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn send_with_retry(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut last_err = None;
        for (attempt, backoff_ms) in std::iter::once(0).chain(RETRY_BACKOFFS_MS).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            match self.try_send(body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    self.circuit.record_failure();
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(LlmError::TruncatedStream))
    }

    async fn try_send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let mut request = self.http.post(&self.base_url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream { status, body });
        }
        Ok(response)
    }
}

fn build_request_body(model: &str, messages: &[ModelMessage], tools: &[AiTool]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if !tools.is_empty() {
        let functions: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(functions);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::Role;

    #[test]
    fn request_body_omits_tools_when_empty() {
        let body = build_request_body("gpt-x", &[ModelMessage::user("hi")], &[]);
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn request_body_includes_function_wrapped_tools() {
        let tools = vec![AiTool {
            name: "read_file".to_string(),
            description: "read".to_string(),
            input_schema: json!({"type": "object"}),
        }];
        let body = build_request_body("gpt-x", &[], &tools);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
    }

    #[test]
    fn model_message_role_serializes_lowercase() {
        let m = ModelMessage::system("be helpful");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["role"], "system");
        let _ = Role::System;
    }
}
