use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::Event;

/// Events returned by the most recent successful fetch. The scheduler replaces
/// the set every cycle; the API reads it to mark which stored events are live.
pub struct EventBoard {
    /// event_id → Event
    events: DashMap<String, Event>,
    refreshed_at_ms: AtomicI64,
}

impl EventBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: DashMap::new(),
            refreshed_at_ms: AtomicI64::new(0),
        })
    }

    /// Swaps in a fresh event list. Returns (added, removed).
    pub fn replace_all(&self, fresh: Vec<Event>, at_ms: i64) -> (usize, usize) {
        let fresh_ids: HashSet<String> = fresh.iter().map(|e| e.event_id.clone()).collect();
        let stale: Vec<String> = self
            .events
            .iter()
            .filter(|e| !fresh_ids.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();

        for id in &stale {
            self.events.remove(id);
        }

        let mut added = 0;
        for event in fresh {
            if self.events.insert(event.event_id.clone(), event).is_none() {
                added += 1;
            }
        }
        self.refreshed_at_ms.store(at_ms, Ordering::Relaxed);

        (added, stale.len())
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn refreshed_at_ms(&self) -> i64 {
        self.refreshed_at_ms.load(Ordering::Relaxed)
    }
}
