//! Event Bus (§4.5): typed pub/sub fan-out with isolated handler failure.
//! Grounded on `logic/events.rs`'s topic/emit shape, reworked from a single
//! global `AppHandle` emitter into an owned, cloneable bus so handlers never
//! need a back-reference to it (§9 Design Notes, cyclic references).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::model::AnomalyEvent;

#[async_trait]
pub trait Handler: Send + Sync {
    /// A stable name, used only for logging which handler failed.
    fn name(&self) -> &str;

    async fn on_event(&self, topic: &str, event: &AnomalyEvent);
}

type Subscribers = RwLock<HashMap<String, Vec<Arc<dyn Handler>>>>;

/// Owns the subscriber table. Cloning an `EventBus` handle is cheap (it's an
/// `Arc` internally); handlers are handed a clone at construction time when
/// they need to re-publish downstream events, never the other way around.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Subscribers>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn Handler>) {
        self.subscribers
            .write()
            .entry(topic.into())
            .or_default()
            .push(handler);
    }

    pub fn unsubscribe(&self, topic: &str, handler_name: &str) {
        if let Some(handlers) = self.subscribers.write().get_mut(topic) {
            handlers.retain(|h| h.name() != handler_name);
        }
    }

    /// Delivers `event` to every subscriber of `topic`. Handlers run
    /// concurrently (each on its own task); a panicking/failing handler is
    /// caught and logged but never prevents siblings from observing the
    /// event. Returns only after every handler has resolved.
    pub async fn publish(&self, topic: &str, event: AnomalyEvent) {
        let handlers = {
            let guard = self.subscribers.read();
            guard.get(topic).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let event = event.clone();
            let topic = topic.to_string();
            tasks.push((
                handler.name().to_string(),
                tokio::spawn(async move { handler.on_event(&topic, &event).await }),
            ));
        }
        for (name, task) in tasks {
            if let Err(e) = task.await {
                log::error!("handler '{}' on topic '{}' panicked: {}", name, topic, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap as StdHashMap;

    struct RecordingHandler {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Handler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_event(&self, _topic: &str, event: &AnomalyEvent) {
            if self.fail {
                panic!("boom");
            }
            self.seen.lock().push(event.message.clone());
        }
    }

    fn sample_event() -> AnomalyEvent {
        AnomalyEvent::new(
            crate::model::AnomalyType::CpuSpike,
            crate::model::Severity::Warning,
            "test event",
            StdHashMap::new(),
        )
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_of_a_topic() {
        let bus = EventBus::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "t",
            Arc::new(RecordingHandler {
                name: "a".into(),
                seen: seen_a.clone(),
                fail: false,
            }),
        );
        bus.subscribe(
            "t",
            Arc::new(RecordingHandler {
                name: "b".into(),
                seen: seen_b.clone(),
                fail: false,
            }),
        );
        bus.publish("t", sample_event()).await;
        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "t",
            Arc::new(RecordingHandler {
                name: "failing".into(),
                seen: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }),
        );
        bus.subscribe(
            "t",
            Arc::new(RecordingHandler {
                name: "ok".into(),
                seen: seen.clone(),
                fail: false,
            }),
        );
        bus.publish("t", sample_event()).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn topic_with_no_subscribers_succeeds_silently() {
        let bus = EventBus::new();
        bus.publish("nobody.listening", sample_event()).await;
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_handler() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            "t",
            Arc::new(RecordingHandler {
                name: "a".into(),
                seen: seen.clone(),
                fail: false,
            }),
        );
        bus.unsubscribe("t", "a");
        bus.publish("t", sample_event()).await;
        assert!(seen.lock().is_empty());
    }
}
