//! Delayed-task queue driven by the audio clock.
//!
//! Tasks are submitted with a due time and popped once the clock reaches it.
//! Tasks due at the same instant come out in submission order, which is what
//! lets a retrigger queue "tear down the old entry" and "start the new one"
//! for the same moment and rely on that order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Pending<T> {
    due: f64,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    // BinaryHeap is a max-heap: reverse so the earliest (due, seq) is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct Scheduler<T> {
    queue: BinaryHeap<Pending<T>>,
    next_seq: u64,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Queue `task` to run once the clock reaches `due`.
    pub fn schedule(&mut self, due: f64, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Pending { due, seq, task });
    }

    /// Pop the earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, T)> {
        if self.queue.peek()?.due > now {
            return None;
        }
        self.queue.pop().map(|pending| (pending.due, pending.task))
    }

    /// Due time of the earliest pending task.
    pub fn next_deadline(&self) -> Option<f64> {
        self.queue.peek().map(|pending| pending.due)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
