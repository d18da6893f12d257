//! The LLM Client: a single normalized streaming-completion operation over one OpenAI-style
//! chat-completions wire format (SPEC_FULL.md §4.5).

mod circuit_breaker;
mod client;
mod sse;
pub mod types;

pub use client::AiClient;
pub use types::{AiTool, AiToolCall, ModelMessage, Role, StreamChunk, Usage};
