//! Turn classification (SPEC_FULL.md §4.6 step 3).
//!
//! A short JSON-only prompt asks the model to route the turn; a keyword heuristic is the fallback
//! when the model's reply doesn't parse. Grounded in the teacher's plan/mode detection in
//! `agent::orchestrator::handle_plan_detection`, which applies the same "ask the model, fall back
//! to a deterministic heuristic on parse failure" shape to a different decision.

use futures::StreamExt;
use serde::Deserialize;

use super::definitions::{ARCHITECT, ASK, CODER, DEBUG, ORCHESTRATOR};
use crate::ai::{AiClient, ModelMessage, StreamChunk};

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResult {
    pub is_atomic: bool,
    pub agent: String,
    pub confidence: f64,
    pub reason: String,
}

const CLASSIFIER_PROMPT: &str = "You route a coding assistant's incoming request to one of five \
    agents: orchestrator, coder, architect, debug, ask. Reply with ONLY a JSON object of the form \
    {\"is_atomic\": bool, \"agent\": \"...\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}. \
    is_atomic is true when the request is a single self-contained task. Use coder for writing or \
    changing code, architect for design/documentation work, debug for fixing a reported failure, \
    ask for questions that need no file changes, orchestrator only if the request is ambiguous.";

pub async fn classify_turn(ai_client: &AiClient, model: &str, user_text: &str) -> ClassificationResult {
    match classify_via_llm(ai_client, model, user_text).await {
        Some(result) => result,
        None => keyword_fallback(user_text),
    }
}

async fn classify_via_llm(ai_client: &AiClient, model: &str, user_text: &str) -> Option<ClassificationResult> {
    let messages = vec![ModelMessage::system(CLASSIFIER_PROMPT), ModelMessage::user(user_text)];
    let mut stream = ai_client.stream_completion(model, &messages, &[]).await.ok()?;

    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk.ok()? {
            StreamChunk::Delta(delta) => text.push_str(&delta),
            StreamChunk::Done => break,
            _ => {}
        }
    }

    let json_slice = extract_json_object(&text)?;
    serde_json::from_str::<ClassificationResult>(json_slice).ok()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn keyword_fallback(user_text: &str) -> ClassificationResult {
    let lower = user_text.to_lowercase();
    let (agent, reason) = if ["bug", "error", "crash", "fails", "failing", "stack trace"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        (DEBUG, "keyword fallback matched a failure-report term")
    } else if ["design", "architecture", "document", "readme", "spec"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        (ARCHITECT, "keyword fallback matched a design/documentation term")
    } else if ["why", "what", "how", "explain", "?"].iter().any(|kw| lower.contains(kw)) {
        (ASK, "keyword fallback matched a question pattern")
    } else if ["write", "implement", "add", "build", "create", "refactor"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        (CODER, "keyword fallback matched an implementation verb")
    } else {
        (ORCHESTRATOR, "keyword fallback found no confident signal")
    };

    ClassificationResult {
        is_atomic: true,
        agent: agent.to_string(),
        confidence: 0.4,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_routes_failure_language_to_debug() {
        let result = keyword_fallback("the login endpoint crashes with a stack trace");
        assert_eq!(result.agent, DEBUG);
    }

    #[test]
    fn fallback_routes_questions_to_ask() {
        let result = keyword_fallback("why does this function return None?");
        assert_eq!(result.agent, ASK);
    }

    #[test]
    fn extract_json_object_trims_surrounding_prose() {
        let text = "here you go: {\"a\": 1} thanks";
        assert_eq!(extract_json_object(text), Some("{\"a\": 1}"));
    }
}
