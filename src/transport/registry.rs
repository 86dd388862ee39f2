//! Event handler registry shared by transport implementations

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Callback invoked with the arguments of an inbound event
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Map from event name to the handlers registered for it
///
/// Handlers for one event keep their registration order.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`
    pub fn subscribe(&self, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        debug!(event = %event, subscription = id.0, "Handler subscribed");
        id
    }

    /// Remove a handler; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        for list in handlers.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
        handlers.retain(|_, list| !list.is_empty());
    }

    /// Invoke every handler registered for `event`, returning how many ran
    ///
    /// The lock is released before handlers run, so a handler may subscribe
    /// or unsubscribe without deadlocking.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match handlers.get(event) {
                Some(list) => list.iter().map(|(_, handler)| handler.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &targets {
            handler(args);
        }
        targets.len()
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(event).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_runs_handlers_in_registration_order() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            registry.subscribe(
                "receiveMessage",
                Arc::new(move |args: &[Value]| {
                    seen.lock().unwrap().push((tag, args[0].clone()));
                }),
            );
        }

        let ran = registry.dispatch("receiveMessage", &[json!(1)]);
        assert_eq!(ran, 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("first", json!(1)));
        assert_eq!(seen[1], ("second", json!(1)));
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let registry = EventRegistry::new();
        let first = registry.subscribe("connect", Arc::new(|_: &[Value]| {}));
        registry.subscribe("connect", Arc::new(|_: &[Value]| {}));

        registry.unsubscribe(first);
        assert_eq!(registry.handler_count("connect"), 1);
        assert_eq!(registry.dispatch("unknown", &[]), 0);
    }
}
