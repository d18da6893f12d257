//! Typed in-process publish/subscribe hub.
//!
//! Grounded in the teacher's documented-but-not-retrieved `agent::event_bus::AgentEventBus`
//! component (named in `agent/mod.rs`'s module doc comment) and its `hooks::{PreToolHook,
//! PostToolHook}` async-trait handler shape, which this module generalizes from "two fixed hook
//! kinds" into arbitrary typed subscriptions with priority ordering and a middleware chain.

mod event;
mod middleware;
mod subscription;

pub use event::{Event, EventCategory, EventType};
pub use middleware::{CorrelationBackfill, Middleware, MiddlewareOutcome};
pub use subscription::{Handler, Selector, Unsubscribe};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use subscription::Subscription;

/// Publish mode: whether `publish` waits for every matched handler to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    FireAndForget,
    AwaitHandlers,
}

/// Per-run counters. Cheap to clone; intended for `GET /events/metrics`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub total_published: u64,
    pub handlers_succeeded: u64,
    pub handlers_failed: u64,
    pub last_event_at: Option<chrono::DateTime<chrono::Utc>>,
}

struct Inner {
    subscriptions: RwLock<Vec<Subscription>>,
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    next_sub_id: AtomicU64,
    next_registration_order: AtomicU64,
    stats: RwLock<BusStats>,
}

/// The event bus. Cheaply `Clone`-able (an `Arc` handle); share one instance across the
/// composition root.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: RwLock::new(Vec::new()),
                middlewares: RwLock::new(Vec::new()),
                next_sub_id: AtomicU64::new(1),
                next_registration_order: AtomicU64::new(1),
                stats: RwLock::new(BusStats::default()),
            }),
        }
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middlewares.write().push(middleware);
    }

    /// Subscribe a handler at the given selector and priority (higher runs first). Subscribing
    /// with an identical `(selector, priority, handler)` twice is a no-op that returns a fresh
    /// `Unsubscribe` capability aliasing the existing subscription.
    pub fn subscribe(
        &self,
        selector: Selector,
        priority: i32,
        handler: Arc<dyn Handler>,
    ) -> Unsubscribe {
        let mut subs = self.inner.subscriptions.write();
        if let Some(existing) = subs.iter().find(|s| {
            s.selector == selector && s.priority == priority && Arc::ptr_eq(&s.handler, &handler)
        }) {
            return Unsubscribe {
                bus: self.clone(),
                id: existing.id,
            };
        }

        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let registration_order = self
            .inner
            .next_registration_order
            .fetch_add(1, Ordering::SeqCst);
        subs.push(Subscription {
            id,
            selector,
            priority,
            registration_order,
            handler,
        });
        Unsubscribe {
            bus: self.clone(),
            id,
        }
    }

    pub(crate) fn remove_subscription(&self, id: u64) {
        self.inner.subscriptions.write().retain(|s| s.id != id);
    }

    pub fn stats(&self) -> BusStats {
        self.inner.stats.read().clone()
    }

    /// Publish an event. See [`PublishMode`] for the await/fire-and-forget distinction.
    ///
    /// Middleware runs first: a `Drop` or `Reject` outcome short-circuits delivery but the
    /// publish attempt is still counted in stats.
    pub async fn publish(&self, event: Event, mode: PublishMode) {
        self.inner.stats.write().total_published += 1;
        self.inner.stats.write().last_event_at = Some(event.timestamp);

        let middlewares: Vec<_> = self.inner.middlewares.read().clone();
        let mut event = event;
        for mw in &middlewares {
            match mw.process(event).await {
                MiddlewareOutcome::Continue(e) => event = e,
                MiddlewareOutcome::Drop => return,
                MiddlewareOutcome::Reject(reason) => {
                    tracing::warn!(reason, "event rejected by middleware");
                    return;
                }
            }
        }

        let mut matched: Vec<Arc<dyn Handler>> = {
            let subs = self.inner.subscriptions.read();
            let mut matched: Vec<&Subscription> =
                subs.iter().filter(|s| s.selector.matches(&event)).collect();
            matched.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.registration_order.cmp(&b.registration_order))
            });
            matched.into_iter().map(|s| s.handler.clone()).collect()
        };

        if matched.is_empty() {
            return;
        }

        let event = Arc::new(event);
        match mode {
            PublishMode::AwaitHandlers => {
                for handler in matched.drain(..) {
                    Self::run_handler(&self.inner, handler, event.clone()).await;
                }
            }
            PublishMode::FireAndForget => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    for handler in matched.drain(..) {
                        Self::run_handler(&inner, handler, event.clone()).await;
                    }
                });
            }
        }
    }

    async fn run_handler(inner: &Arc<Inner>, handler: Arc<dyn Handler>, event: Arc<Event>) {
        match handler.handle(&event).await {
            Ok(()) => inner.stats.write().handlers_succeeded += 1,
            Err(e) => {
                inner.stats.write().handlers_failed += 1;
                tracing::warn!(error = %e, event_type = ?event.event_type, "event handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OrderRecorder(Arc<RwLock<Vec<&'static str>>>, &'static str);

    #[async_trait::async_trait]
    impl Handler for OrderRecorder {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.0.write().push(self.1);
            Ok(())
        }
    }

    #[tokio::test]
    async fn await_handlers_runs_every_matched_handler_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            bus.subscribe(
                Selector::Wildcard,
                0,
                Arc::new(CountingHandler(count.clone())),
            );
        }

        for _ in 0..2 {
            bus.publish(
                Event::new(EventType::SessionCreated, "test", json!({})),
                PublishMode::AwaitHandlers,
            )
            .await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 6);
        let stats = bus.stats();
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.handlers_succeeded, 6);
    }

    #[tokio::test]
    async fn priority_desc_then_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        bus.subscribe(Selector::Wildcard, 0, Arc::new(OrderRecorder(order.clone(), "low")));
        bus.subscribe(Selector::Wildcard, 10, Arc::new(OrderRecorder(order.clone(), "high")));
        bus.subscribe(Selector::Wildcard, 10, Arc::new(OrderRecorder(order.clone(), "high2")));

        bus.publish(
            Event::new(EventType::SessionCreated, "test", json!({})),
            PublishMode::AwaitHandlers,
        )
        .await;

        assert_eq!(*order.read(), vec!["high", "high2", "low"]);
    }

    #[tokio::test]
    async fn duplicate_subscription_is_idempotent() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn Handler> = Arc::new(CountingHandler(count.clone()));
        bus.subscribe(Selector::Wildcard, 0, handler.clone());
        bus.subscribe(Selector::Wildcard, 0, handler.clone());

        bus.publish(
            Event::new(EventType::SessionCreated, "test", json!({})),
            PublishMode::AwaitHandlers,
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe(
            Selector::Wildcard,
            0,
            Arc::new(CountingHandler(count.clone())),
        );
        sub.cancel();

        bus.publish(
            Event::new(EventType::SessionCreated, "test", json!({})),
            PublishMode::AwaitHandlers,
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_middleware_short_circuits_but_still_counts() {
        struct DropAll;
        #[async_trait::async_trait]
        impl Middleware for DropAll {
            async fn process(&self, _event: Event) -> MiddlewareOutcome {
                MiddlewareOutcome::Drop
            }
        }

        let bus = EventBus::new();
        bus.add_middleware(Arc::new(DropAll));
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            Selector::Wildcard,
            0,
            Arc::new(CountingHandler(count.clone())),
        );

        bus.publish(
            Event::new(EventType::SessionCreated, "test", json!({})),
            PublishMode::AwaitHandlers,
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.stats().total_published, 1);
    }
}
