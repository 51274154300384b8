// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timeout scheduling: one pending timeout per machine on a monotonic
//! min-heap.
//!
//! Cancellation is lazy. Each armed timeout carries the machine's arm
//! epoch; `cancel` and re-arming only touch the side table, and heap
//! entries whose epoch no longer matches are dropped when they surface
//! at the top. Insert and pop are O(log n) in the number of armed
//! timeouts, which is what keeps millions of idle machines cheap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};
use xbar_core::MachineId;

/// A due timeout ready for delivery to its machine's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TimeoutFire {
    pub machine: MachineId,
    pub epoch: u64,
}

#[derive(Debug)]
struct Entry {
    fires_at: Instant,
    machine: MachineId,
    epoch: u64,
}

// Ordered by deadline only, inverted so the BinaryHeap pops earliest
// first.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fires_at == other.fires_at && self.epoch == other.epoch
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fires_at
            .cmp(&self.fires_at)
            .then(other.epoch.cmp(&self.epoch))
    }
}

/// Manages the pending timeout of every live machine.
#[derive(Debug, Default)]
pub(crate) struct TimeoutScheduler {
    heap: BinaryHeap<Entry>,
    armed: HashMap<MachineId, u64>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timeout for a machine under its current arm
    /// epoch. Any prior entry for the machine becomes stale.
    pub fn schedule(&mut self, machine: MachineId, epoch: u64, duration: Duration, now: Instant) {
        self.armed.insert(machine.clone(), epoch);
        self.heap.push(Entry {
            fires_at: now + duration,
            machine,
            epoch,
        });
    }

    /// Disarm the machine's pending timeout, if any. The heap entry is
    /// dropped lazily when it surfaces.
    pub fn cancel(&mut self, machine: &str) {
        self.armed.remove(machine);
    }

    /// Pop every timeout due at `now`, skipping stale entries.
    pub fn due(&mut self, now: Instant) -> Vec<TimeoutFire> {
        let mut fired = Vec::new();
        loop {
            match self.heap.peek() {
                Some(head) if head.fires_at <= now => {}
                _ => break,
            }
            let Some(entry) = self.heap.pop() else { break };
            match self.armed.get(entry.machine.as_str()) {
                Some(&epoch) if epoch == entry.epoch => {
                    self.armed.remove(entry.machine.as_str());
                    fired.push(TimeoutFire {
                        machine: entry.machine,
                        epoch: entry.epoch,
                    });
                }
                // Cancelled or re-armed since this entry was pushed
                _ => {}
            }
        }
        fired
    }

    /// Earliest heap deadline (possibly a stale entry; used only to
    /// pace polling).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.fires_at)
    }

    /// Number of machines with an armed timeout.
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.armed.is_empty()
    }

    /// Discard everything (shutdown).
    pub fn clear(&mut self) {
        self.heap.clear();
        self.armed.clear();
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
