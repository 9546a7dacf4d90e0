//! Callback registry for named events.
//!
//! One entry per distinct event name the consumer has subscribed to; the
//! name doubles as the channel filter entry sent to the server. Dispatch
//! fires a cloned snapshot of the callback list, so a callback that
//! registers or unregisters during dispatch cannot invalidate the
//! iteration.

use dashmap::DashMap;
use std::sync::Arc;

/// A payload callback.
pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// Concurrent event-name → callbacks registry.
#[derive(Default)]
pub struct EventRegistry {
    events: DashMap<String, Vec<EventCallback>>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event name.
    ///
    /// Returns `true` if this is the first registration for the name, i.e.
    /// the channel filter just grew.
    pub fn register(&self, name: &str, callback: EventCallback) -> bool {
        let mut entry = self.events.entry(name.to_string()).or_default();
        let first = entry.is_empty();
        entry.push(callback);
        first
    }

    /// Fire all callbacks registered for an event name, in registration
    /// order. Returns how many were invoked.
    pub fn dispatch(&self, name: &str, payload: &str) -> usize {
        // Snapshot first so the shard lock is released before user code runs.
        let callbacks = match self.events.get(name) {
            Some(entry) => entry.clone(),
            None => return 0,
        };
        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }

    /// The registered event names; this is the channel filter.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.events.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of distinct event names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_reports_new_names() {
        let registry = EventRegistry::new();
        assert!(registry.register("a", Arc::new(|_| {})));
        assert!(!registry.register("a", Arc::new(|_| {})));
        assert!(registry.register("b", Arc::new(|_| {})));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dispatch_fires_all_callbacks() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            registry.register(
                "a",
                Arc::new(move |payload| {
                    assert_eq!(payload, "hello");
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert_eq!(registry.dispatch("a", "hello"), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.dispatch("unknown", "hello"), 0);
    }

    #[test]
    fn test_callback_may_register_during_dispatch() {
        let registry = Arc::new(EventRegistry::new());

        let inner = Arc::clone(&registry);
        registry.register(
            "a",
            Arc::new(move |_| {
                inner.register("a", Arc::new(|_| {}));
            }),
        );

        // Fires the snapshot of one callback; the new registration lands
        // for the next dispatch.
        assert_eq!(registry.dispatch("a", "x"), 1);
        assert_eq!(registry.dispatch("a", "x"), 2);
    }
}
