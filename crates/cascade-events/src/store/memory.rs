//! In-memory primary store.
//!
//! The fast half of the hybrid gateway. Records live in a concurrent
//! map; two time-sorted indices serve the hot read paths the way the
//! original deployment used sorted sets:
//!
//! - a per-conversation timeline (unbounded — conversations are short)
//! - a global recent index capped at a configured limit, oldest trimmed
//!
//! Trimming drops index entries only; the record itself stays
//! retrievable by ID.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::errors::Result;
use crate::store::record::EventRecord;
use crate::store::EventStore;

type TimeIndex = Vec<(DateTime<Utc>, String)>;

/// In-memory event store.
pub struct MemoryStore {
    records: DashMap<String, EventRecord>,
    conversation_index: Mutex<HashMap<String, TimeIndex>>,
    recent_index: Mutex<TimeIndex>,
    recent_limit: usize,
}

impl MemoryStore {
    /// Create a store with the given recent-index cap.
    #[must_use]
    pub fn new(recent_limit: usize) -> Self {
        Self {
            records: DashMap::new(),
            conversation_index: Mutex::new(HashMap::new()),
            recent_index: Mutex::new(Vec::new()),
            recent_limit,
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_sorted(index: &mut TimeIndex, entry: (DateTime<Utc>, String)) {
        let at = index.partition_point(|(ts, _)| *ts <= entry.0);
        index.insert(at, entry);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::StoreConfig::DEFAULT_RECENT_INDEX_LIMIT)
    }
}

impl EventStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn store(&self, record: &EventRecord) -> Result<bool> {
        // Idempotent: a duplicate ID is success, and the indices are
        // left untouched so re-delivery cannot double-count.
        if self.records.contains_key(&record.id) {
            return Ok(true);
        }
        let entry = (record.timestamp, record.id.clone());
        if let Some(conversation_id) = &record.conversation_id {
            let mut index = self.conversation_index.lock();
            Self::insert_sorted(index.entry(conversation_id.clone()).or_default(), entry.clone());
        }
        {
            let mut recent = self.recent_index.lock();
            Self::insert_sorted(&mut recent, entry);
            if recent.len() > self.recent_limit {
                let excess = recent.len() - self.recent_limit;
                let _ = recent.drain(..excess);
            }
        }
        let _ = self.records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    fn get(&self, event_id: &str) -> Result<Option<EventRecord>> {
        Ok(self.records.get(event_id).map(|r| r.clone()))
    }

    fn conversation_events(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let index = self.conversation_index.lock();
        let Some(timeline) = index.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let records = timeline
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|(_, id)| self.records.get(id).map(|r| r.clone()))
            .collect();
        Ok(records)
    }

    fn recent_events(
        &self,
        limit: usize,
        conversation_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<EventRecord>> {
        let recent = self.recent_index.lock();
        let records = recent
            .iter()
            .rev()
            .filter_map(|(_, id)| self.records.get(id).map(|r| r.clone()))
            .filter(|r| conversation_id.is_none_or(|c| r.conversation_id.as_deref() == Some(c)))
            .filter(|r| event_type.is_none_or(|t| r.event_type == t))
            .take(limit)
            .collect();
        Ok(records)
    }

    fn children_of(&self, parent_id: &str) -> Result<Vec<EventRecord>> {
        let mut children: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|r| r.parent_events.iter().any(|p| p == parent_id))
            .map(|r| r.clone())
            .collect();
        children.sort_by_key(|r| r.timestamp);
        Ok(children)
    }

    fn events_with_root(&self, root_id: &str) -> Result<Vec<EventRecord>> {
        let mut chain: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|r| r.root_event_id.as_deref() == Some(root_id) || r.id == root_id)
            .map(|r| r.clone())
            .collect();
        chain.sort_by_key(|r| r.timestamp);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::Event;

    fn record(event_type: &str, conversation: Option<&str>) -> EventRecord {
        let mut event = Event::new(event_type, "test");
        if let Some(c) = conversation {
            event = event.with_conversation(c);
        }
        EventRecord::from(&event)
    }

    #[test]
    fn store_and_get() {
        let store = MemoryStore::default();
        let r = record("x.y", None);
        assert!(store.store(&r).unwrap());
        assert_eq!(store.get(&r.id).unwrap().unwrap().id, r.id);
        assert!(store.get("evt_missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_store_is_idempotent() {
        let store = MemoryStore::default();
        let r = record("x.y", Some("c1"));
        assert!(store.store(&r).unwrap());
        assert!(store.store(&r).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.conversation_events("c1", None, 0).unwrap().len(), 1);
    }

    #[test]
    fn conversation_events_ordered_by_time() {
        let store = MemoryStore::default();
        let a = record("a", Some("c1"));
        let b = record("b", Some("c1"));
        let c = record("c", Some("c2"));
        // Insert out of order.
        store.store(&b).unwrap();
        store.store(&a).unwrap();
        store.store(&c).unwrap();

        let events = store.conversation_events("c1", None, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn conversation_events_limit_and_offset() {
        let store = MemoryStore::default();
        for i in 0..5 {
            store.store(&record(&format!("t.{i}"), Some("c1"))).unwrap();
        }
        let page = store.conversation_events("c1", Some(2), 1).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].event_type, "t.1");
    }

    #[test]
    fn recent_events_filters_and_caps() {
        let store = MemoryStore::default();
        store.store(&record("a.b", Some("c1"))).unwrap();
        store.store(&record("a.b", Some("c2"))).unwrap();
        store.store(&record("x.y", Some("c1"))).unwrap();

        let all = store.recent_events(10, None, None).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first.
        assert!(all[0].timestamp >= all[2].timestamp);

        let c1 = store.recent_events(10, Some("c1"), None).unwrap();
        assert_eq!(c1.len(), 2);

        let typed = store.recent_events(10, Some("c1"), Some("x.y")).unwrap();
        assert_eq!(typed.len(), 1);

        let capped = store.recent_events(1, None, None).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn recent_index_trims_oldest() {
        let store = MemoryStore::new(2);
        let a = record("a", None);
        let b = record("b", None);
        let c = record("c", None);
        store.store(&a).unwrap();
        store.store(&b).unwrap();
        store.store(&c).unwrap();

        let recent = store.recent_events(10, None, None).unwrap();
        assert_eq!(recent.len(), 2);
        // Trimmed from the index, still retrievable by ID.
        assert!(store.get(&a.id).unwrap().is_some());
    }

    #[test]
    fn children_and_roots() {
        let store = MemoryStore::default();
        let mut parent = Event::new("p", "test");
        parent.root_event_id = Some(parent.event_id.clone());
        let mut child = Event::new("c", "test").with_parents(vec![parent.event_id.clone()]);
        child.root_event_id = Some(parent.event_id.clone());

        store.store(&EventRecord::from(&parent)).unwrap();
        store.store(&EventRecord::from(&child)).unwrap();

        let children = store.children_of(&parent.event_id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.event_id);

        let chain = store.events_with_root(&parent.event_id).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, parent.event_id);
    }
}
