//! Event queue with deterministic ordering.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use gossim_core::{NodeId, Tick, TimerKey};

use crate::churn::Churn;
use crate::message::Message;

/// Key for ordering events in the queue.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Insertion sequence (FIFO within a tick)
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct EventKey {
    /// When this event fires.
    pub time: Tick,
    /// Insertion counter.
    pub sequence: u64,
}

/// What happens when an event fires
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Message arrival at `message.to`
    Deliver(Message),
    /// One-shot timer of `node`
    Timeout {
        node: NodeId,
        key: TimerKey,
        tag: u64,
        set_at: Tick,
    },
    /// Scheduled node arrival or departure
    Churn(Churn),
}

/// A queued event
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub key: EventKey,
    pub kind: EventKind,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of future events, totally ordered by [`EventKey`]
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, time: Tick, kind: EventKind) -> EventKey {
        let key = EventKey {
            time,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.heap.push(Reverse(ScheduledEvent { key, kind }));
        key
    }

    /// Time of the earliest event
    pub fn peek_time(&self) -> Option<Tick> {
        self.heap.peek().map(|Reverse(ev)| ev.key.time)
    }

    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop().map(|Reverse(ev)| ev)
    }

    /// Remove and return every event due at or before `time`, in key order
    pub fn pop_due(&mut self, time: Tick) -> Vec<ScheduledEvent> {
        let mut batch = Vec::new();
        while matches!(self.peek_time(), Some(t) if t <= time) {
            if let Some(ev) = self.pop() {
                batch.push(ev);
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout(node: u64, key: u64) -> EventKind {
        EventKind::Timeout {
            node: NodeId(node),
            key: TimerKey(key),
            tag: 0,
            set_at: Tick::ZERO,
        }
    }

    fn key_of(ev: &ScheduledEvent) -> u64 {
        match ev.kind {
            EventKind::Timeout { key, .. } => key.0,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_time_ordering() {
        let mut queue = EventQueue::new();
        queue.push(Tick(5), timeout(0, 1));
        queue.push(Tick(2), timeout(0, 2));
        queue.push(Tick(9), timeout(0, 3));

        assert_eq!(queue.peek_time(), Some(Tick(2)));
        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|e| key_of(&e)).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_fifo_within_tick() {
        let mut queue = EventQueue::new();
        for key in 0..10 {
            queue.push(Tick(3), timeout(9 - key, key));
        }
        queue.push(Tick(4), timeout(0, 99));

        let batch = queue.pop_due(Tick(3));
        let keys: Vec<u64> = batch.iter().map(key_of).collect();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(Tick(3)).is_empty());
    }
}
