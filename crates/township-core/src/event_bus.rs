//! Double-buffered, tick-scoped event publication.
//!
//! Agents read an immutable snapshot of the events published during the
//! previous tick while the scheduler collects this tick's events into a
//! separate buffer. Nothing published during tick `T` is visible before
//! tick `T + 1`.

use std::sync::Arc;

use township_types::Event;

/// The `current` / `next` buffer pair.
#[derive(Debug)]
pub struct EventBus {
    current: Arc<[Event]>,
    next: Vec<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with both buffers empty.
    pub fn new() -> Self {
        Self {
            current: Arc::from(Vec::new()),
            next: Vec::new(),
        }
    }

    /// Append an event to the `next` buffer.
    pub fn publish(&mut self, event: Event) {
        self.next.push(event);
    }

    /// Append every event in `events` to the `next` buffer, in order.
    pub fn publish_all(&mut self, events: impl IntoIterator<Item = Event>) {
        self.next.extend(events);
    }

    /// The events visible this tick. Cheap to clone and share.
    pub fn snapshot(&self) -> Arc<[Event]> {
        Arc::clone(&self.current)
    }

    /// Number of events waiting in `next`.
    pub fn pending(&self) -> usize {
        self.next.len()
    }

    /// Promote `next` to `current` and start an empty `next`. Returns the
    /// number of events promoted.
    pub fn advance(&mut self) -> usize {
        let promoted = std::mem::take(&mut self.next);
        let count = promoted.len();
        self.current = Arc::from(promoted);
        count
    }
}
