//! Bounded record of recently published events

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::events::{Event, EventTag};

/// Fixed-capacity FIFO of published events.
///
/// Appending at capacity evicts the oldest entry first. A capacity of zero
/// disables recording entirely.
pub struct HistoryBuffer {
    events: RwLock<VecDeque<Arc<Event>>>,

    /// Maximum capacity
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            // Grows on demand; large capacities are usually never reached
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Record an event, evicting the oldest one when full
    pub fn append(&self, event: Arc<Event>) {
        if !self.is_enabled() {
            return;
        }

        let mut events = self.events.write();
        while events.len() >= self.capacity {
            if let Some(evicted) = events.pop_front() {
                trace!("History full, evicting {} event {}", evicted.tag(), evicted.id());
            }
        }
        events.push_back(event);
    }

    /// Order-preserving copy, optionally filtered by tag and truncated to
    /// the most recent `limit` entries
    pub fn snapshot(&self, tag: Option<EventTag>, limit: Option<usize>) -> Vec<Arc<Event>> {
        let events = self.events.read();
        let mut matching: Vec<Arc<Event>> = events
            .iter()
            .filter(|e| tag.map_or(true, |t| e.tag() == t))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            let excess = matching.len().saturating_sub(limit);
            matching.drain(..excess);
        }
        matching
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }
}
