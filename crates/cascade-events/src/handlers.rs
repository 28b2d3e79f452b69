//! Built-in event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use cascade_core::{Event, EventPriority};

use crate::bus::{EventHandler, Subscription};
use crate::errors::HandlerError;

/// Wildcard handler that mirrors every event into the log stream.
///
/// Critical events log at error level, high-priority and error-typed
/// events at warn, everything else at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &Event) -> Result<bool, HandlerError> {
        let id = &event.event_id;
        let event_type = &event.event_type;
        let source = &event.source;
        if event.priority == EventPriority::Critical {
            error!(event_id = %id, %event_type, %source, "event");
        } else if event.priority == EventPriority::High || event_type.contains("error") {
            warn!(event_id = %id, %event_type, %source, "event");
        } else {
            debug!(event_id = %id, %event_type, %source, "event");
        }
        Ok(true)
    }
}

/// Handler that captures matching events into a shared buffer.
///
/// Mostly a test and diagnostics tool: register one, drive the system,
/// then inspect what flowed past.
pub struct CollectingHandler {
    name: String,
    subscription: Subscription,
    collected: Arc<Mutex<Vec<Event>>>,
}

impl CollectingHandler {
    /// Collect everything under the given handler name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_subscription(name, Subscription::all())
    }

    /// Collect only events matching `subscription`.
    #[must_use]
    pub fn with_subscription(name: impl Into<String>, subscription: Subscription) -> Self {
        Self {
            name: name.into(),
            subscription,
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of the captured events, in arrival order.
    #[must_use]
    pub fn collected(&self) -> Vec<Event> {
        self.collected.lock().clone()
    }

    /// Shared handle to the capture buffer, usable after the handler
    /// has been moved onto the bus.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.collected)
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscriptions(&self) -> Subscription {
        self.subscription.clone()
    }

    async fn handle(&self, event: &Event) -> Result<bool, HandlerError> {
        self.collected.lock().push(event.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_handler_always_succeeds() {
        let handler = LoggingHandler;
        let event = Event::new("a.b", "test").with_priority(EventPriority::Critical);
        assert!(handler.handle(&event).await.unwrap());
    }

    #[tokio::test]
    async fn collecting_handler_captures_in_order() {
        let handler = CollectingHandler::new("tap");
        let buffer = handler.buffer();
        assert!(handler.handle(&Event::new("a.b", "test")).await.unwrap());
        assert!(handler.handle(&Event::new("c.d", "test")).await.unwrap());
        let seen = buffer.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].event_type, "a.b");
        assert_eq!(seen[1].event_type, "c.d");
    }

    #[test]
    fn collecting_handler_subscription_is_honoured_by_matching() {
        let handler =
            CollectingHandler::with_subscription("picky", Subscription::to_types(["x.y"]));
        assert!(handler.subscriptions().matches(&Event::new("x.y", "s")));
        assert!(!handler.subscriptions().matches(&Event::new("a.b", "s")));
    }
}
