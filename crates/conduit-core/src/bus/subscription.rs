//! Subscriber selectors and the handler trait subscribers implement.

use std::sync::Arc;

use async_trait::async_trait;

use super::event::{Event, EventCategory, EventType};

/// What a subscription matches against an incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    ExactType(EventType),
    Category(EventCategory),
    Wildcard,
}

impl Selector {
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Selector::ExactType(t) => *t == event.event_type,
            Selector::Category(c) => *c == event.event_category,
            Selector::Wildcard => true,
        }
    }
}

/// A handler invoked for events matching its subscription's selector.
///
/// A handler error is isolated by the bus: logged, counted, never propagated to sibling
/// handlers or (in fire-and-forget mode) to the publisher.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

pub(super) struct Subscription {
    pub id: u64,
    pub selector: Selector,
    pub priority: i32,
    pub registration_order: u64,
    pub handler: Arc<dyn Handler>,
}

/// A capability to remove a subscription. Dropping it does not unsubscribe; call
/// [`Unsubscribe::cancel`] explicitly.
pub struct Unsubscribe {
    pub(super) bus: super::EventBus,
    pub(super) id: u64,
}

impl Unsubscribe {
    pub fn cancel(self) {
        self.bus.remove_subscription(self.id);
    }
}
