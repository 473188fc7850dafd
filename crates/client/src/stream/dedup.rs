// Bounded record of already-delivered event ids.
//
// Membership is a hash set; eviction order is a FIFO queue of the same ids.
// Eviction is by insertion order, never by recency of lookup.

use std::collections::{HashSet, VecDeque};

use chatfeed_common::protocol::stream::EventId;

pub const DEFAULT_DEDUP_CAPACITY: usize = 4000;

#[derive(Debug, Clone)]
pub struct DedupCache {
    seen: HashSet<EventId>,
    order: VecDeque<EventId>,
    capacity: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl DedupCache {
    /// A zero capacity is bumped to one so the most recent id is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { seen: HashSet::with_capacity(capacity), order: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn seen(&self, id: EventId) -> bool {
        self.seen.contains(&id)
    }

    /// Record `id`, evicting the oldest ids once over capacity. Recording an
    /// id that is already present changes nothing.
    pub fn record(&mut self, id: EventId) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
