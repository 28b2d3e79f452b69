//! In-process pub/sub event bus.
//!
//! Handlers register with a [`Subscription`] describing which events
//! they want; [`EventBus::publish`] admits an event and dispatches it
//! to every matching handler on its own task. An event completes when
//! at least one handler succeeds, fails when every matching handler
//! fails, and completes trivially when nothing matches.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use cascade_core::Event;

use crate::config::BusConfig;
use crate::errors::HandlerError;

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// Which events a handler receives.
///
/// An event matches when its type appears in `event_types`, or its
/// source or target appears in `sources`. A subscription with both
/// lists empty is a wildcard and matches everything.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    /// Exact event types to receive.
    pub event_types: Vec<String>,
    /// Sources (or targets) to receive events from.
    pub sources: Vec<String>,
}

impl Subscription {
    /// Wildcard subscription matching every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to a set of exact event types.
    #[must_use]
    pub fn to_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: types.into_iter().map(Into::into).collect(),
            sources: Vec::new(),
        }
    }

    /// Subscribe to events from (or targeted at) a set of sources.
    #[must_use]
    pub fn to_sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event_types: Vec::new(),
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `event` falls under this subscription.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if self.event_types.is_empty() && self.sources.is_empty() {
            return true;
        }
        if self.event_types.iter().any(|t| t == &event.event_type) {
            return true;
        }
        self.sources.iter().any(|s| {
            s == &event.source || event.target.as_deref() == Some(s.as_str())
        })
    }
}

// ─── Handler trait ───────────────────────────────────────────────────────────

/// An event consumer registered on the bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique handler name. Registering a second handler under the
    /// same name replaces the first.
    fn name(&self) -> &str;

    /// Events this handler wants. Defaults to everything.
    fn subscriptions(&self) -> Subscription {
        Subscription::all()
    }

    /// Dispatch order among matching handlers, highest first.
    fn priority(&self) -> i32 {
        0
    }

    /// Disabled handlers stay registered but are skipped.
    fn enabled(&self) -> bool {
        true
    }

    /// Process one event. `Ok(true)` counts as a success for the
    /// event's outcome; `Ok(false)` means the handler declined.
    async fn handle(&self, event: &Event) -> Result<bool, HandlerError>;
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Bus statistics snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusStats {
    /// Events admitted since startup.
    pub published: u64,
    /// Events dispatched to completion (any outcome).
    pub processed: u64,
    /// Events whose matching handlers all failed.
    pub failed: u64,
    /// Events currently in flight.
    pub active: usize,
    /// Registered handlers.
    pub handlers: usize,
}

struct BusInner {
    config: BusConfig,
    handlers: Mutex<HashMap<String, Arc<dyn EventHandler>>>,
    active: Mutex<HashMap<String, Event>>,
    history: Mutex<VecDeque<Event>>,
    semaphore: Arc<Semaphore>,
    draining: AtomicBool,
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with the given configuration.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let permits = config.max_concurrent_events.max(1);
        Self {
            inner: Arc::new(BusInner {
                config,
                handlers: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                semaphore: Arc::new(Semaphore::new(permits)),
                draining: AtomicBool::new(false),
                published: AtomicU64::new(0),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler. An existing handler with the same name is
    /// replaced with a warning. Returns `false` on replacement.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> bool {
        let name = handler.name().to_owned();
        let previous = self.inner.handlers.lock().insert(name.clone(), handler);
        if previous.is_some() {
            warn!(handler = %name, "replacing existing handler registration");
            false
        } else {
            debug!(handler = %name, "handler registered");
            true
        }
    }

    /// Remove a handler by name. Returns whether it was registered.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.inner.handlers.lock().remove(name).is_some()
    }

    /// Admit an event for dispatch. Returns `false` when the bus is
    /// draining; the caller still owns the (unmodified) event then.
    pub fn publish(&self, event: Event) -> bool {
        if self.inner.draining.load(Ordering::SeqCst) {
            warn!(event_id = %event.event_id, "publish rejected: bus is draining");
            return false;
        }
        let _ = self.inner.published.fetch_add(1, Ordering::Relaxed);
        counter!("bus_events_published").increment(1);

        let event_id = event.event_id.clone();
        {
            let mut active = self.inner.active.lock();
            let _ = active.insert(event_id.clone(), event.clone());
            gauge!("bus_events_active").set(active.len() as f64);
        }
        debug!(event_id = %event_id, event_type = %event.event_type, "event admitted");

        let bus = self.clone();
        let _ = tokio::spawn(async move { bus.dispatch(event).await });
        true
    }

    async fn dispatch(self, mut event: Event) {
        // Concurrency cap. The semaphore is never closed while the
        // inner bus is alive, so acquisition only fails at teardown.
        let Ok(_permit) = self.inner.semaphore.clone().acquire_owned().await else {
            return;
        };

        if let Err(err) = event.mark_processing() {
            error!(event_id = %event.event_id, %err, "event not dispatchable");
            self.retire(event);
            return;
        }
        self.update_active(&event);

        let mut matching: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.inner.handlers.lock();
            handlers
                .values()
                .filter(|h| h.enabled() && h.subscriptions().matches(&event))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });

        if matching.is_empty() {
            // No consumers is not a failure.
            if let Err(err) = event.mark_completed() {
                error!(event_id = %event.event_id, %err, "status update failed");
            }
            self.retire(event);
            return;
        }

        // One task per handler so a panic in one cannot take down the
        // others or the dispatch loop.
        let mut tasks = Vec::with_capacity(matching.len());
        for handler in matching {
            let ev = event.clone();
            let name = handler.name().to_owned();
            tasks.push((
                name,
                tokio::spawn(async move { handler.handle(&ev).await }),
            ));
        }

        let mut succeeded = Vec::new();
        let mut failures = 0_usize;
        for (name, task) in tasks {
            match task.await {
                Ok(Ok(true)) => succeeded.push(name),
                Ok(Ok(false)) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    counter!("bus_handler_failures", "handler" => name.clone()).increment(1);
                    warn!(event_id = %event.event_id, handler = %name, %err, "handler failed");
                    event.append_error(format!("{name}: {err}"));
                }
                Err(join_err) => {
                    failures += 1;
                    counter!("bus_handler_failures", "handler" => name.clone()).increment(1);
                    error!(event_id = %event.event_id, handler = %name, %join_err, "handler panicked");
                    event.append_error(format!("{name}: panicked"));
                }
            }
        }

        // Handlers were matched, so zero successes is a failure even
        // when every handler merely declined.
        event.processed_by = succeeded;
        let outcome = if event.processed_by.is_empty() {
            let _ = self.inner.failed.fetch_add(1, Ordering::Relaxed);
            event.mark_failed(format!(
                "no handler processed the event successfully ({failures} failed)"
            ))
        } else {
            event.mark_completed()
        };
        if let Err(err) = outcome {
            error!(event_id = %event.event_id, %err, "status update failed");
        }
        self.retire(event);
    }

    fn update_active(&self, event: &Event) {
        let mut active = self.inner.active.lock();
        if let Some(slot) = active.get_mut(&event.event_id) {
            *slot = event.clone();
        }
    }

    /// Move an event out of the active set into the history ring.
    fn retire(&self, event: Event) {
        let _ = self.inner.processed.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.inner.active.lock();
            let _ = active.remove(&event.event_id);
            gauge!("bus_events_active").set(active.len() as f64);
        }
        let mut history = self.inner.history.lock();
        history.push_back(event);
        while history.len() > self.inner.config.history_limit {
            let _ = history.pop_front();
        }
    }

    /// Latest known copy of an event, in flight or already retired.
    #[must_use]
    pub fn get_event(&self, event_id: &str) -> Option<Event> {
        if let Some(event) = self.inner.active.lock().get(event_id) {
            return Some(event.clone());
        }
        self.inner
            .history
            .lock()
            .iter()
            .rev()
            .find(|e| e.event_id == event_id)
            .cloned()
    }

    /// Poll until `event_id` reaches a terminal status or `timeout`
    /// expires. Returns the terminal event, or `None` on timeout.
    pub async fn wait_for_event(&self, event_id: &str, timeout: Duration) -> Option<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(event) = self.get_event(event_id) {
                if event.status.is_terminal() {
                    return Some(event);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    /// Stop admitting events and wait for in-flight dispatches, bounded
    /// by the configured drain timeout.
    pub async fn shutdown(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        info!("event bus draining");

        let deadline = self
            .inner
            .config
            .drain_timeout()
            .map(|t| tokio::time::Instant::now() + t);
        loop {
            let remaining = self.inner.active.lock().len();
            if remaining == 0 {
                break;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    warn!(remaining, "drain timeout expired, abandoning in-flight events");
                    break;
                }
            }
            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
        info!("event bus stopped");
    }

    /// Whether the bus has begun draining.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Counters and gauges for diagnostics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            processed: self.inner.processed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            active: self.inner.active.lock().len(),
            handlers: self.inner.handlers.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::EventStatus;
    use std::sync::atomic::AtomicUsize;

    struct TestHandler {
        name: String,
        subscription: Subscription,
        fail: bool,
        decline: bool,
        calls: AtomicUsize,
    }

    impl TestHandler {
        fn ok(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                subscription: Subscription::all(),
                fail: false,
                decline: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                subscription: Subscription::all(),
                fail: true,
                decline: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn declining(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                subscription: Subscription::all(),
                fail: false,
                decline: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EventHandler for TestHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscriptions(&self) -> Subscription {
            self.subscription.clone()
        }

        async fn handle(&self, _event: &Event) -> Result<bool, HandlerError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HandlerError::new("boom"))
            } else {
                Ok(!self.decline)
            }
        }
    }

    fn bus() -> EventBus {
        EventBus::new(BusConfig {
            poll_interval_ms: 5,
            ..BusConfig::default()
        })
    }

    async fn publish_and_wait(bus: &EventBus, event: Event) -> Event {
        let id = event.event_id.clone();
        assert!(bus.publish(event));
        bus.wait_for_event(&id, Duration::from_secs(2))
            .await
            .expect("event should reach a terminal status")
    }

    #[test]
    fn wildcard_subscription_matches_everything() {
        let event = Event::new("a.b", "src");
        assert!(Subscription::all().matches(&event));
    }

    #[test]
    fn typed_subscription_filters() {
        let event = Event::new("a.b", "src");
        assert!(Subscription::to_types(["a.b"]).matches(&event));
        assert!(!Subscription::to_types(["x.y"]).matches(&event));
    }

    #[test]
    fn source_subscription_matches_source_or_target() {
        let event = Event::new("a.b", "src").with_target("dst");
        assert!(Subscription::to_sources(["src"]).matches(&event));
        assert!(Subscription::to_sources(["dst"]).matches(&event));
        assert!(!Subscription::to_sources(["other"]).matches(&event));
    }

    #[tokio::test]
    async fn one_success_completes_the_event() {
        let bus = bus();
        assert!(bus.subscribe(TestHandler::ok("good")));
        assert!(bus.subscribe(TestHandler::failing("bad")));

        let done = publish_and_wait(&bus, Event::new("a.b", "test")).await;
        assert_eq!(done.status, EventStatus::Completed);
        assert_eq!(done.processed_by, vec!["good".to_string()]);
        assert!(done.error_message.as_deref().unwrap_or("").contains("bad"));
    }

    #[tokio::test]
    async fn all_failures_fail_the_event() {
        let bus = bus();
        assert!(bus.subscribe(TestHandler::failing("bad1")));
        assert!(bus.subscribe(TestHandler::failing("bad2")));

        let done = publish_and_wait(&bus, Event::new("a.b", "test")).await;
        assert_eq!(done.status, EventStatus::Failed);
        assert!(done.processed_by.is_empty());
        assert_eq!(bus.stats().failed, 1);
    }

    #[tokio::test]
    async fn all_declines_fail_the_event() {
        let bus = bus();
        assert!(bus.subscribe(TestHandler::declining("shrug")));

        let done = publish_and_wait(&bus, Event::new("a.b", "test")).await;
        assert_eq!(done.status, EventStatus::Failed);
        assert!(done.processed_by.is_empty());
        assert_eq!(bus.stats().failed, 1);
    }

    #[tokio::test]
    async fn no_matching_handlers_completes_trivially() {
        let bus = bus();
        let done = publish_and_wait(&bus, Event::new("a.b", "test")).await;
        assert_eq!(done.status, EventStatus::Completed);
        assert!(done.processed_by.is_empty());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn subscription_routing_skips_non_matching_handlers() {
        let bus = bus();
        let picky = Arc::new(TestHandler {
            name: "picky".into(),
            subscription: Subscription::to_types(["x.y"]),
            fail: false,
            decline: false,
            calls: AtomicUsize::new(0),
        });
        assert!(bus.subscribe(picky.clone()));

        let _ = publish_and_wait(&bus, Event::new("a.b", "test")).await;
        assert_eq!(picky.calls.load(Ordering::SeqCst), 0);

        let _ = publish_and_wait(&bus, Event::new("x.y", "test")).await;
        assert_eq!(picky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replacing_a_handler_keeps_one_registration() {
        let bus = bus();
        assert!(bus.subscribe(TestHandler::ok("dup")));
        assert!(!bus.subscribe(TestHandler::failing("dup")));
        assert_eq!(bus.stats().handlers, 1);
        assert!(bus.unsubscribe("dup"));
        assert!(!bus.unsubscribe("dup"));
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_rejected() {
        let bus = bus();
        bus.shutdown().await;
        assert!(!bus.publish(Event::new("a.b", "test")));
        assert_eq!(bus.stats().published, 0);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_events() {
        let bus = bus();
        assert!(bus.subscribe(TestHandler::ok("slow")));
        let event = Event::new("a.b", "test");
        let id = event.event_id.clone();
        assert!(bus.publish(event));
        bus.shutdown().await;
        let done = bus.get_event(&id).expect("event retired to history");
        assert!(done.status.is_terminal());
    }

    struct StalledHandler;

    #[async_trait]
    impl EventHandler for StalledHandler {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn handle(&self, _event: &Event) -> Result<bool, HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_the_drain_timeout() {
        let bus = EventBus::new(BusConfig {
            poll_interval_ms: 5,
            drain_timeout_ms: Some(50),
            ..BusConfig::default()
        });
        assert!(bus.subscribe(Arc::new(StalledHandler)));
        let event = Event::new("a.b", "test");
        let id = event.event_id.clone();
        assert!(bus.publish(event));

        bus.shutdown().await;
        assert_eq!(bus.stats().active, 1);
        let stuck = bus.get_event(&id).expect("event still tracked as active");
        assert!(!stuck.status.is_terminal());
    }

    #[tokio::test]
    async fn wait_for_event_times_out_on_unknown_id() {
        let bus = bus();
        let got = bus
            .wait_for_event("evt_missing", Duration::from_millis(30))
            .await;
        assert!(got.is_none());
    }
}
