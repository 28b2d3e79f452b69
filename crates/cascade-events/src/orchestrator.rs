//! Orchestration facade over bus, persistence and lineage.
//!
//! [`EventOrchestrator`] is the one entry point the rest of the system
//! talks to: publishing stamps lineage, dispatches on the bus, then
//! persists; queries answer from the persistence layer. All of it is
//! gated behind explicit initialization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cascade_core::{event, Event};

use crate::bus::{BusStats, EventBus, EventHandler};
use crate::config::CascadeConfig;
use crate::lineage::{DisabledLineage, Lineage, LineageTracker};
use crate::store::{DisabledPersistence, HybridGateway, MemoryStore, Persistence, SqliteStore};

const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Orchestrator statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorStats {
    /// Whether `initialize` has run and `shutdown` has not.
    pub initialized: bool,
    /// Underlying bus counters.
    pub bus: BusStats,
}

/// Facade wiring the event bus, persistence and lineage together.
pub struct EventOrchestrator {
    bus: EventBus,
    persistence: Arc<dyn Persistence>,
    lineage: Arc<dyn Lineage>,
    initialized: AtomicBool,
}

impl EventOrchestrator {
    /// Assemble an orchestrator from explicit components.
    #[must_use]
    pub fn new(
        bus: EventBus,
        persistence: Arc<dyn Persistence>,
        lineage: Arc<dyn Lineage>,
    ) -> Self {
        Self {
            bus,
            persistence,
            lineage,
            initialized: AtomicBool::new(false),
        }
    }

    /// Assemble the standard stack from configuration: hybrid
    /// memory-plus-SQLite persistence and store-backed lineage, with
    /// either replaced by a no-op when disabled.
    pub fn from_config(config: &CascadeConfig) -> crate::errors::Result<Self> {
        let bus = EventBus::new(config.bus.clone());

        let persistence: Arc<dyn Persistence> = if config.orchestrator.persistence_enabled {
            let fallback = match &config.store.sqlite_path {
                Some(path) => SqliteStore::open(path)?,
                None => SqliteStore::in_memory()?,
            };
            Arc::new(HybridGateway::new(
                Box::new(MemoryStore::new(config.store.recent_index_limit())),
                Box::new(fallback),
            ))
        } else {
            Arc::new(DisabledPersistence)
        };

        let lineage: Arc<dyn Lineage> = if config.orchestrator.tracking_enabled {
            Arc::new(LineageTracker::new(Arc::clone(&persistence)))
        } else {
            Arc::new(DisabledLineage)
        };

        Ok(Self::new(bus, persistence, lineage))
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn guard(&self, op: &'static str) -> bool {
        if self.is_initialized() {
            return true;
        }
        warn!(op, "orchestrator not initialized, operation ignored");
        false
    }

    /// Mark the orchestrator live and announce startup on the bus.
    /// Idempotent.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator initialized");
        let _ = self.publish(
            Event::new(event::taxonomy::SYSTEM_STARTUP, ORCHESTRATOR_SOURCE),
        );
    }

    /// Announce shutdown, drain the bus, and go inert.
    pub async fn shutdown(&self) {
        if !self.initialized.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.publish(
            Event::new(event::taxonomy::SYSTEM_SHUTDOWN, ORCHESTRATOR_SOURCE),
        );
        self.bus.shutdown().await;
        self.initialized.store(false, Ordering::SeqCst);
        info!("orchestrator stopped");
    }

    /// Publish an event: stamp lineage, dispatch on the bus, persist.
    ///
    /// The persisted copy carries the stamped root but reflects the
    /// event as admitted, not its final dispatch outcome. Returns
    /// `false` when uninitialized or the bus refuses admission.
    pub fn publish(&self, mut event: Event) -> bool {
        if !self.guard("publish") {
            return false;
        }
        self.lineage.track_event_relations(&mut event);
        let snapshot = event.clone();
        if !self.bus.publish(event) {
            return false;
        }
        let _ = self.persistence.store_event(&snapshot);
        true
    }

    /// Register a handler on the bus. Returns `false` when ignored or
    /// when an existing registration was replaced.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> bool {
        self.guard("subscribe") && self.bus.subscribe(handler)
    }

    /// Remove a handler by name.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.guard("unsubscribe") && self.bus.unsubscribe(name)
    }

    /// Fetch one event, preferring the live bus copy over storage.
    #[must_use]
    pub fn get_event(&self, event_id: &str) -> Option<Event> {
        if !self.is_initialized() {
            return None;
        }
        self.bus
            .get_event(event_id)
            .or_else(|| self.persistence.get_event(event_id))
    }

    /// Events of a conversation, oldest first.
    #[must_use]
    pub fn get_conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Event> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.persistence
            .conversation_events(conversation_id, limit, offset)
    }

    /// Newest events first with optional filters.
    #[must_use]
    pub fn get_recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Vec<Event> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.persistence
            .recent_events(limit, conversation_id, event_type)
    }

    /// Full causal chain containing `event_id`, oldest first.
    #[must_use]
    pub fn get_event_chain(&self, event_id: &str) -> Vec<Event> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.lineage.get_event_chain(event_id)
    }

    /// Parents, children and siblings of `event_id`.
    #[must_use]
    pub fn get_related_events(&self, event_id: &str) -> Vec<Event> {
        if !self.is_initialized() {
            return Vec::new();
        }
        self.lineage.get_related_events(event_id)
    }

    /// Wait for an event to reach a terminal status.
    pub async fn wait_for_event(&self, event_id: &str, timeout: Duration) -> Option<Event> {
        if !self.is_initialized() {
            return None;
        }
        self.bus.wait_for_event(event_id, timeout).await
    }

    /// Counters for diagnostics.
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            initialized: self.is_initialized(),
            bus: self.bus.stats(),
        }
    }
}
