// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded, ordered per-machine event queue.
//!
//! A mailbox is owned by at most one drain task at a time (`claim` /
//! `release`); that ownership is the machine's serialization point on
//! the shared worker pool. Empty mailboxes cost nothing — no task, no
//! thread, just the queue allocation.

use crate::config::EnqueuePolicy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use xbar_core::MachineEvent;

/// One queued event with its pre-resolved type name.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub name: &'static str,
    pub event: Box<dyn MachineEvent>,
}

pub(crate) struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    /// True while a drain task owns this mailbox.
    scheduled: AtomicBool,
    /// Signals blocked producers when space frees up.
    space: Notify,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            scheduled: AtomicBool::new(false),
            space: Notify::new(),
        }
    }

    /// Enqueue without waiting. Returns the envelope back when full.
    pub fn try_push(&self, envelope: Envelope) -> Result<(), Envelope> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(envelope);
        }
        queue.push_back(envelope);
        Ok(())
    }

    /// Enqueue under the given policy. The blocking policy waits for
    /// space up to its deadline. Returns false on rejection.
    pub async fn push(&self, envelope: Envelope, policy: EnqueuePolicy) -> bool {
        match policy {
            EnqueuePolicy::FailFast => self.try_push(envelope).is_ok(),
            EnqueuePolicy::Block { timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                let mut envelope = envelope;
                loop {
                    // Register the waiter before probing for space; a
                    // notify from a pop in between is kept.
                    let notified = self.space.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    match self.try_push(envelope) {
                        Ok(()) => return true,
                        Err(back) => envelope = back,
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Pop up to `max` events in enqueue order.
    pub fn pop_batch(&self, max: usize) -> Vec<Envelope> {
        let batch: Vec<Envelope> = {
            let mut queue = self.queue.lock();
            let n = queue.len().min(max);
            queue.drain(..n).collect()
        };
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    /// Drop everything queued (eviction, shutdown). Returns the events
    /// so the caller can report them.
    pub fn drain_all(&self) -> Vec<Envelope> {
        let drained: Vec<Envelope> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Claim drain ownership; true when this caller became the owner.
    pub fn try_claim(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Release drain ownership.
    pub fn release(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "mailbox_tests.rs"]
mod tests;
