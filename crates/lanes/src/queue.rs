//! Per-lane priority queue.
//!
//! Ordered by `(priority asc, arrival asc)`, push order breaking ties. Items
//! pushed to the front are ordered ahead of everything else, newest front
//! push first.

use std::{cmp::Ordering, collections::BinaryHeap, time::Instant};

use crate::types::{INTERRUPT_PRIORITY, Priority};

struct Slot<T> {
    priority: Priority,
    /// 0 for ordinary pushes; front pushes count down from -1.
    front: i64,
    arrival: Instant,
    order: u64,
    value: T,
}

impl<T> Slot<T> {
    fn key(&self) -> (Priority, i64, Instant, u64) {
        (self.priority, self.front, self.arrival, self.order)
    }
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    // BinaryHeap is a max-heap; reverse so the smallest key pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

pub struct PriorityQueue<T> {
    heap: BinaryHeap<Slot<T>>,
    next_order: u64,
    next_front: i64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_order: 0,
            next_front: -1,
        }
    }

    /// Insert among items of the same priority by `arrival`. A composed
    /// batch arrives when its first member did, not when it was flushed.
    pub fn push(&mut self, priority: Priority, arrival: Instant, value: T) {
        let order = self.take_order();
        self.heap.push(Slot {
            priority,
            front: 0,
            arrival,
            order,
            value,
        });
    }

    /// Insert at the very front with [`INTERRUPT_PRIORITY`].
    pub fn push_front(&mut self, value: T) {
        let front = self.next_front;
        self.next_front -= 1;
        let order = self.take_order();
        self.heap.push(Slot {
            priority: INTERRUPT_PRIORITY,
            front,
            arrival: Instant::now(),
            order,
            value,
        });
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|slot| slot.value)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove everything, in dispatch order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(value) = self.pop() {
            out.push(value);
        }
        out
    }
}
