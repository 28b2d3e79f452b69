//! Event persistence.
//!
//! Two [`EventStore`] backends sit behind a [`HybridGateway`]: a fast
//! in-memory primary and a SQLite fallback. Writes go primary-first
//! with automatic failover; reads prefer the primary and fall back on
//! error. The rest of the system talks to the gateway through the
//! event-level [`Persistence`] trait, which never surfaces storage
//! errors to callers.

mod memory;
mod record;
mod sqlite;

pub use memory::MemoryStore;
pub use record::EventRecord;
pub use sqlite::SqliteStore;

use metrics::counter;
use tracing::{debug, error, warn};

use cascade_core::Event;

use crate::errors::{EventsError, Result};

// ─── Store trait ─────────────────────────────────────────────────────────────

/// A single persistence backend for flat event records.
///
/// Implementations are synchronous; callers on async paths wrap the
/// calls in `spawn_blocking` when the backend can block.
pub trait EventStore: Send + Sync {
    /// Short backend name used in logs and failure metrics.
    fn name(&self) -> &'static str;

    /// Cheap health probe used for diagnostics, never for routing:
    /// writes always try a backend and let the error path decide.
    fn is_available(&self) -> bool {
        true
    }

    /// Insert a record. Duplicate ids are success (`Ok(true)`), not
    /// conflicts.
    fn store(&self, record: &EventRecord) -> Result<bool>;

    /// Fetch one record by id.
    fn get(&self, event_id: &str) -> Result<Option<EventRecord>>;

    /// Events of a conversation, oldest first, with optional paging.
    fn conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EventRecord>>;

    /// Newest events first, optionally filtered by conversation and
    /// event type.
    fn recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>>;

    /// Events listing `parent_id` among their parents, oldest first.
    fn children_of(&self, parent_id: &str) -> Result<Vec<EventRecord>>;

    /// Every event whose lineage root is `root_id` (including the root
    /// itself), oldest first.
    fn events_with_root(&self, root_id: &str) -> Result<Vec<EventRecord>>;
}

// ─── Event-level persistence ─────────────────────────────────────────────────

/// Event-level persistence facade.
///
/// Works in [`Event`]s rather than records, and absorbs storage
/// failures: writes report success as a plain `bool`, failed reads
/// come back empty. Publishing must never stall on a broken store.
pub trait Persistence: Send + Sync {
    /// Persist an event. `false` means every backend refused it.
    fn store_event(&self, event: &Event) -> bool;

    /// Fetch one event by id.
    fn get_event(&self, event_id: &str) -> Option<Event>;

    /// Events of a conversation, oldest first.
    fn conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Event>;

    /// Newest events first with optional filters.
    fn recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Vec<Event>;

    /// Direct children of an event.
    fn children_of(&self, parent_id: &str) -> Vec<Event>;

    /// Full causal chain under a root, oldest first.
    fn events_with_root(&self, root_id: &str) -> Vec<Event>;
}

// ─── Hybrid gateway ──────────────────────────────────────────────────────────

/// Primary-plus-fallback routing over two [`EventStore`] backends.
pub struct HybridGateway {
    primary: Box<dyn EventStore>,
    fallback: Box<dyn EventStore>,
}

impl HybridGateway {
    /// Build a gateway over an explicit primary and fallback.
    #[must_use]
    pub fn new(primary: Box<dyn EventStore>, fallback: Box<dyn EventStore>) -> Self {
        Self { primary, fallback }
    }

    /// Whether at least one backend answers its health probe.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.primary.is_available() || self.fallback.is_available()
    }

    fn note_failure(store: &'static str, op: &'static str, err: &EventsError) {
        counter!("store_failures", "store" => store, "op" => op).increment(1);
        warn!(store, op, error = %err, "event store operation failed");
    }

    /// Read through primary, falling back on error. A failed read is
    /// logged and degrades to the default (empty) value.
    fn read<T: Default>(
        &self,
        op: &'static str,
        query: impl Fn(&dyn EventStore) -> Result<T>,
    ) -> T {
        match query(self.primary.as_ref()) {
            Ok(value) => value,
            Err(err) => {
                Self::note_failure(self.primary.name(), op, &err);
                match query(self.fallback.as_ref()) {
                    Ok(value) => value,
                    Err(err) => {
                        Self::note_failure(self.fallback.name(), op, &err);
                        T::default()
                    }
                }
            }
        }
    }
}

impl Persistence for HybridGateway {
    fn store_event(&self, event: &Event) -> bool {
        let record = EventRecord::from(event);
        match self.primary.store(&record) {
            Ok(stored) => stored,
            Err(err) => {
                Self::note_failure(self.primary.name(), "store", &err);
                match self.fallback.store(&record) {
                    Ok(stored) => {
                        debug!(event_id = %record.id, "event persisted via fallback store");
                        stored
                    }
                    Err(err) => {
                        Self::note_failure(self.fallback.name(), "store", &err);
                        error!(event_id = %record.id, "event lost: all stores failed");
                        false
                    }
                }
            }
        }
    }

    fn get_event(&self, event_id: &str) -> Option<Event> {
        self.read("get", |s| s.get(event_id))
            .map(EventRecord::into_event)
    }

    fn conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Event> {
        into_events(self.read("conversation_events", |s| {
            s.conversation_events(conversation_id, limit, offset)
        }))
    }

    fn recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Vec<Event> {
        into_events(self.read("recent_events", |s| {
            s.recent_events(limit, conversation_id, event_type)
        }))
    }

    fn children_of(&self, parent_id: &str) -> Vec<Event> {
        into_events(self.read("children_of", |s| s.children_of(parent_id)))
    }

    fn events_with_root(&self, root_id: &str) -> Vec<Event> {
        into_events(self.read("events_with_root", |s| s.events_with_root(root_id)))
    }
}

fn into_events(records: Vec<EventRecord>) -> Vec<Event> {
    records.into_iter().map(EventRecord::into_event).collect()
}

// ─── Disabled persistence ────────────────────────────────────────────────────

/// No-op persistence for deployments that run without a store.
///
/// Writes report success so publishing proceeds; reads are empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPersistence;

impl Persistence for DisabledPersistence {
    fn store_event(&self, _event: &Event) -> bool {
        true
    }

    fn get_event(&self, _event_id: &str) -> Option<Event> {
        None
    }

    fn conversation_events(
        &self,
        _conversation_id: &str,
        _limit: Option<usize>,
        _offset: usize,
    ) -> Vec<Event> {
        Vec::new()
    }

    fn recent_events(
        &self,
        _limit: usize,
        _conversation_id: Option<&str>,
        _event_type: Option<&str>,
    ) -> Vec<Event> {
        Vec::new()
    }

    fn children_of(&self, _parent_id: &str) -> Vec<Event> {
        Vec::new()
    }

    fn events_with_root(&self, _root_id: &str) -> Vec<Event> {
        Vec::new()
    }
}
