// Per-logger ring of formatted events held back for retrospective emission

use crate::backend::TransitEvent;
use std::collections::VecDeque;

/// Bounded ring of formatted transit events for one logger. The backend
/// appends backtrace-path events that fell below the logger threshold;
/// overflow evicts the oldest. Replay drains oldest-first and leaves the
/// ring empty.
pub(crate) struct BacktraceStorage {
    capacity: usize,
    events: VecDeque<TransitEvent>,
}

impl BacktraceStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Reconfigure capacity in stream order; evicts oldest when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    pub fn store(&mut self, event: TransitEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, TransitEvent> {
        self.events.drain(..)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}
