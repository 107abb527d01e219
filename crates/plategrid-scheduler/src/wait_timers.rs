//! Deadlines for plates sitting in a wait task.
//!
//! A min-heap keyed on deadline; ties fire in scheduling order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use plategrid_core::ActivePlate;
use tokio::time::Instant;

struct Timer {
    deadline: Instant,
    seq: u64,
    plate: Arc<ActivePlate>,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct WaitTimers {
    heap: BinaryHeap<Timer>,
    seq: u64,
}

impl WaitTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, plate: Arc<ActivePlate>, duration: Duration) -> Instant {
        let deadline = Instant::now() + duration;
        self.seq += 1;
        self.heap.push(Timer {
            deadline,
            seq: self.seq,
            plate,
        });
        deadline
    }

    /// Remove and return every plate whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Arc<ActivePlate>> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timer) = self.heap.pop() {
                due.push(timer.plate);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|t| t.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
