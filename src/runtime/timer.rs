//! Ordered queue of pending wake-up deadlines.
//!
//! Each scheduled entry resolves exactly once, no earlier than its
//! deadline; resolution granularity is bounded by the scheduler's tick
//! interval. Entries fire in deadline order with ties broken by
//! schedule order.

use std::time::{Duration, Instant};

/// Identifier for one scheduled deadline; doubles as its private event
/// key so only the originating wait consumes the firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
}

/// Pending deadlines, kept ordered by `(deadline, schedule order)`.
#[derive(Debug, Default)]
pub struct TimerQueue {
    entries: Vec<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a wake-up `after` the given `now`.
    pub fn schedule(&mut self, now: Instant, after: Duration) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = now + after;
        // Stable position: after every entry with an earlier-or-equal
        // deadline, preserving schedule order among ties.
        let at = self
            .entries
            .partition_point(|e| e.deadline <= deadline);
        self.entries.insert(at, TimerEntry { deadline, seq });
        TimerId(seq)
    }

    /// Pop every entry whose deadline has elapsed, in firing order.
    pub fn due(&mut self, now: Instant) -> Vec<TimerId> {
        let n = self.entries.partition_point(|e| e.deadline <= now);
        self.entries.drain(..n).map(|e| TimerId(e.seq)).collect()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
