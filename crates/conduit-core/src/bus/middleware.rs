//! Middleware chain run before delivery: may enrich, drop, or reject an event.

use async_trait::async_trait;

use super::event::Event;

pub enum MiddlewareOutcome {
    /// Continue delivery, optionally with a mutated event.
    Continue(Event),
    /// Short-circuit delivery silently. The publish attempt is still counted.
    Drop,
    /// Short-circuit delivery and report why.
    Reject(String),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process(&self, event: Event) -> MiddlewareOutcome;
}

/// Attaches a `source`-derived correlation id when the publisher didn't set one, so every event
/// in a turn can be traced even if the orchestrator forgot to thread one through.
pub struct CorrelationBackfill;

#[async_trait]
impl Middleware for CorrelationBackfill {
    async fn process(&self, mut event: Event) -> MiddlewareOutcome {
        if event.correlation_id.is_none() {
            if let Some(session_id) = event.session_id.clone() {
                event.correlation_id = Some(session_id);
            }
        }
        MiddlewareOutcome::Continue(event)
    }
}
