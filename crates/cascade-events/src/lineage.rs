//! Causal lineage tracking.
//!
//! Every event carries its parents and a resolved root id, so the full
//! causal chain behind any event can be reconstructed from storage
//! without walking the graph at query time. [`LineageTracker`] stamps
//! the root at publish time; [`build_event_tree`] turns a flat chain
//! back into a parent/child forest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use cascade_core::Event;

use crate::errors::{EventsError, Result};
use crate::store::Persistence;

/// Ancestor hops walked before giving up on root resolution. Chains
/// deeper than this are treated as unresolvable.
const MAX_ROOT_HOPS: usize = 64;

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// Lineage operations used by the orchestrator.
pub trait Lineage: Send + Sync {
    /// Resolve and stamp `root_event_id` before an event is published.
    fn track_event_relations(&self, event: &mut Event);

    /// The full causal chain containing `event_id`, oldest first.
    fn get_event_chain(&self, event_id: &str) -> Vec<Event>;

    /// Parents, children and siblings of `event_id`, deduplicated.
    fn get_related_events(&self, event_id: &str) -> Vec<Event>;
}

/// Store-backed lineage tracker.
pub struct LineageTracker {
    persistence: Arc<dyn Persistence>,
}

impl LineageTracker {
    /// Build a tracker over the given persistence layer.
    #[must_use]
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Walk ancestors from `start_id` until an event without parents
    /// (or with a known root) is found.
    fn resolve_root(&self, start_id: &str) -> Option<String> {
        let mut current = start_id.to_owned();
        let mut visited = HashSet::new();
        for _ in 0..MAX_ROOT_HOPS {
            if !visited.insert(current.clone()) {
                warn!(event_id = %start_id, "cycle detected during root resolution");
                return None;
            }
            let event = self.persistence.get_event(&current)?;
            if let Some(root) = event.root_event_id {
                return Some(root);
            }
            match event.parent_events.first() {
                Some(parent) => current = parent.clone(),
                None => return Some(event.event_id),
            }
        }
        warn!(event_id = %start_id, "ancestor chain too deep, root unresolved");
        None
    }
}

impl Lineage for LineageTracker {
    fn track_event_relations(&self, event: &mut Event) {
        if event.root_event_id.is_some() {
            return;
        }
        if event.parent_events.is_empty() {
            // No parents: the event is its own root.
            event.root_event_id = Some(event.event_id.clone());
            return;
        }
        let first_parent = event.parent_events[0].clone();
        match self.resolve_root(&first_parent) {
            Some(root) => event.root_event_id = Some(root),
            None => {
                // Unresolvable ancestry still gets a usable anchor.
                warn!(
                    event_id = %event.event_id,
                    parent = %first_parent,
                    "root unresolved, anchoring to first parent"
                );
                event.root_event_id = Some(first_parent);
            }
        }
        debug!(
            event_id = %event.event_id,
            root = event.root_event_id.as_deref().unwrap_or(""),
            "lineage stamped"
        );
    }

    fn get_event_chain(&self, event_id: &str) -> Vec<Event> {
        let Some(event) = self.persistence.get_event(event_id) else {
            return Vec::new();
        };
        let root = event.root_event_id.unwrap_or(event.event_id);
        let mut chain = self.persistence.events_with_root(&root);
        chain.sort_by_key(|e| e.timestamp);
        chain
    }

    fn get_related_events(&self, event_id: &str) -> Vec<Event> {
        let Some(event) = self.persistence.get_event(event_id) else {
            return Vec::new();
        };

        let mut related: Vec<Event> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let _ = seen.insert(event.event_id.clone());
        let mut push = |related: &mut Vec<Event>, seen: &mut HashSet<String>, e: Event| {
            if seen.insert(e.event_id.clone()) {
                related.push(e);
            }
        };

        for parent_id in &event.parent_events {
            if let Some(parent) = self.persistence.get_event(parent_id) {
                push(&mut related, &mut seen, parent);
            }
            // Siblings share a parent with this event.
            for sibling in self.persistence.children_of(parent_id) {
                push(&mut related, &mut seen, sibling);
            }
        }
        for child in self.persistence.children_of(&event.event_id) {
            push(&mut related, &mut seen, child);
        }
        related
    }
}

/// No-op lineage for deployments that run without tracking. Events
/// stay unstamped and chain queries come back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledLineage;

impl Lineage for DisabledLineage {
    fn track_event_relations(&self, _event: &mut Event) {}

    fn get_event_chain(&self, _event_id: &str) -> Vec<Event> {
        Vec::new()
    }

    fn get_related_events(&self, _event_id: &str) -> Vec<Event> {
        Vec::new()
    }
}

// ─── Tree reconstruction ─────────────────────────────────────────────────────

/// One node of a reconstructed event tree.
#[derive(Debug, Clone, Serialize)]
pub struct EventNode {
    /// Event id.
    pub event_id: String,
    /// Event type.
    pub event_type: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub data: Map<String, Value>,
    /// Children, oldest first.
    pub children: Vec<EventNode>,
}

/// A forest of causally related events.
#[derive(Debug, Clone, Serialize)]
pub struct EventTree {
    /// Events with no parent inside the input set.
    pub roots: Vec<EventNode>,
    /// Distinct events placed in the tree.
    pub total_events: usize,
}

/// Build a parent/child forest from a flat set of events.
///
/// Events whose parents are absent from the input become roots. An
/// event with several parents in the set appears under each of them.
/// A parent cycle yields [`EventsError::LineageCycle`].
pub fn build_event_tree(events: &[Event]) -> Result<EventTree> {
    let by_id: HashMap<&str, &Event> = events
        .iter()
        .map(|e| (e.event_id.as_str(), e))
        .collect();

    let mut children: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        for parent in &event.parent_events {
            if by_id.contains_key(parent.as_str()) {
                children
                    .entry(parent.as_str())
                    .or_default()
                    .push(event);
            }
        }
    }
    for list in children.values_mut() {
        list.sort_by_key(|e| e.timestamp);
    }

    fn build_node<'a>(
        event: &'a Event,
        children: &HashMap<&'a str, Vec<&'a Event>>,
        path: &mut HashSet<&'a str>,
        seen: &mut HashSet<&'a str>,
    ) -> Result<EventNode> {
        if !path.insert(event.event_id.as_str()) {
            return Err(EventsError::LineageCycle(event.event_id.clone()));
        }
        let _ = seen.insert(event.event_id.as_str());
        let mut node = EventNode {
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            data: event.data.clone(),
            children: Vec::new(),
        };
        if let Some(kids) = children.get(event.event_id.as_str()) {
            for kid in kids {
                node.children.push(build_node(kid, children, path, seen)?);
            }
        }
        let _ = path.remove(event.event_id.as_str());
        Ok(node)
    }

    let mut roots = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut root_events: Vec<&Event> = events
        .iter()
        .filter(|e| {
            !e.parent_events
                .iter()
                .any(|p| by_id.contains_key(p.as_str()))
        })
        .collect();
    root_events.sort_by_key(|e| e.timestamp);

    let mut path = HashSet::new();
    for event in root_events {
        roots.push(build_node(event, &children, &mut path, &mut seen)?);
    }

    // A cyclic component has no root and never gets visited above.
    if seen.len() < events.len() {
        let unvisited = events
            .iter()
            .find(|e| !seen.contains(e.event_id.as_str()))
            .map_or_else(String::new, |e| e.event_id.clone());
        return Err(EventsError::LineageCycle(unvisited));
    }

    Ok(EventTree {
        roots,
        total_events: seen.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HybridGateway, MemoryStore, SqliteStore};
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn gateway() -> Arc<dyn Persistence> {
        Arc::new(HybridGateway::new(
            Box::new(MemoryStore::new(100)),
            Box::new(SqliteStore::in_memory().unwrap()),
        ))
    }

    fn stored(persistence: &Arc<dyn Persistence>, event: &Event) {
        assert!(persistence.store_event(event));
    }

    fn child_of(parent: &Event, offset_ms: i64) -> Event {
        let mut event = Event::new("child", "test")
            .with_parents(vec![parent.event_id.clone()]);
        event.timestamp = parent.timestamp + Duration::milliseconds(offset_ms);
        event
    }

    #[test]
    fn parentless_event_is_its_own_root() {
        let tracker = LineageTracker::new(gateway());
        let mut event = Event::new("root", "test");
        tracker.track_event_relations(&mut event);
        assert_eq!(event.root_event_id.as_deref(), Some(event.event_id.as_str()));
    }

    #[test]
    fn root_propagates_down_the_chain() {
        let persistence = gateway();
        let tracker = LineageTracker::new(Arc::clone(&persistence));

        let mut root = Event::new("root", "test");
        tracker.track_event_relations(&mut root);
        stored(&persistence, &root);

        let mut mid = child_of(&root, 1);
        tracker.track_event_relations(&mut mid);
        stored(&persistence, &mid);

        let mut leaf = child_of(&mid, 1);
        tracker.track_event_relations(&mut leaf);

        assert_eq!(leaf.root_event_id.as_deref(), Some(root.event_id.as_str()));
    }

    #[test]
    fn unknown_parent_anchors_to_first_parent() {
        let tracker = LineageTracker::new(gateway());
        let mut event = Event::new("orphan", "test")
            .with_parents(vec!["evt_gone".to_string()]);
        tracker.track_event_relations(&mut event);
        assert_eq!(event.root_event_id.as_deref(), Some("evt_gone"));
    }

    #[test]
    fn existing_root_is_left_alone() {
        let tracker = LineageTracker::new(gateway());
        let mut event = Event::new("x", "test");
        event.root_event_id = Some("evt_preset".into());
        tracker.track_event_relations(&mut event);
        assert_eq!(event.root_event_id.as_deref(), Some("evt_preset"));
    }

    #[test]
    fn chain_comes_back_in_timestamp_order() {
        let persistence = gateway();
        let tracker = LineageTracker::new(Arc::clone(&persistence));

        let mut root = Event::new("root", "test");
        tracker.track_event_relations(&mut root);
        stored(&persistence, &root);
        let mut a = child_of(&root, 2);
        tracker.track_event_relations(&mut a);
        stored(&persistence, &a);
        let mut b = child_of(&root, 1);
        tracker.track_event_relations(&mut b);
        stored(&persistence, &b);

        let chain = tracker.get_event_chain(&a.event_id);
        let ids: Vec<&str> = chain.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec![
            root.event_id.as_str(),
            b.event_id.as_str(),
            a.event_id.as_str(),
        ]);
    }

    #[test]
    fn related_events_cover_parents_children_and_siblings() {
        let persistence = gateway();
        let tracker = LineageTracker::new(Arc::clone(&persistence));

        let mut root = Event::new("root", "test");
        tracker.track_event_relations(&mut root);
        stored(&persistence, &root);
        let mut me = child_of(&root, 1);
        tracker.track_event_relations(&mut me);
        stored(&persistence, &me);
        let mut sibling = child_of(&root, 2);
        tracker.track_event_relations(&mut sibling);
        stored(&persistence, &sibling);
        let mut kid = child_of(&me, 3);
        tracker.track_event_relations(&mut kid);
        stored(&persistence, &kid);

        let related = tracker.get_related_events(&me.event_id);
        let ids: HashSet<&str> = related.iter().map(|e| e.event_id.as_str()).collect();
        assert!(ids.contains(root.event_id.as_str()));
        assert!(ids.contains(sibling.event_id.as_str()));
        assert!(ids.contains(kid.event_id.as_str()));
        assert!(!ids.contains(me.event_id.as_str()));
        assert_eq!(related.len(), 3);
    }

    #[test]
    fn tree_groups_children_under_parents() {
        let root = Event::new("root", "test");
        let a = child_of(&root, 1);
        let b = child_of(&root, 2);
        let grandchild = child_of(&a, 3);

        let tree =
            build_event_tree(&[root.clone(), a.clone(), b.clone(), grandchild.clone()]).unwrap();
        assert_eq!(tree.total_events, 4);
        assert_eq!(tree.roots.len(), 1);
        let top = &tree.roots[0];
        assert_eq!(top.event_id, root.event_id);
        assert_eq!(top.children.len(), 2);
        assert_eq!(top.children[0].event_id, a.event_id);
        assert_eq!(top.children[0].children[0].event_id, grandchild.event_id);
    }

    #[test]
    fn missing_parent_makes_an_event_a_root() {
        let orphan = Event::new("orphan", "test")
            .with_parents(vec!["evt_absent".to_string()]);
        let tree = build_event_tree(&[orphan.clone()]).unwrap();
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.roots[0].event_id, orphan.event_id);
    }

    #[test]
    fn multi_parent_event_appears_under_each_parent() {
        let p1 = Event::new("p1", "test");
        let mut p2 = Event::new("p2", "test");
        p2.timestamp = p1.timestamp + Duration::milliseconds(1);
        let mut join = Event::new("join", "test")
            .with_parents(vec![p1.event_id.clone(), p2.event_id.clone()]);
        join.timestamp = p2.timestamp + Duration::milliseconds(1);

        let tree = build_event_tree(&[p1.clone(), p2.clone(), join.clone()]).unwrap();
        assert_eq!(tree.roots.len(), 2);
        for root in &tree.roots {
            assert_eq!(root.children.len(), 1);
            assert_eq!(root.children[0].event_id, join.event_id);
        }
    }

    #[test]
    fn parent_cycle_is_an_error() {
        let mut a = Event::new("a", "test");
        let mut b = Event::new("b", "test");
        b.timestamp = a.timestamp + Duration::milliseconds(1);
        a.parent_events = vec![b.event_id.clone()];
        b.parent_events = vec![a.event_id.clone()];

        let err = build_event_tree(&[a, b]).unwrap_err();
        assert_matches!(err, EventsError::LineageCycle(_));
    }

    #[test]
    fn disabled_lineage_is_inert() {
        let lineage = DisabledLineage;
        let mut event = Event::new("x", "test");
        lineage.track_event_relations(&mut event);
        assert!(event.root_event_id.is_none());
        assert!(lineage.get_event_chain("evt_x").is_empty());
    }
}
