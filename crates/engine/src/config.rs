// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry tunables.

use std::time::Duration;

/// Behavior when a machine's mailbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Reject immediately; `send_event` returns `false` (default).
    FailFast,
    /// Wait up to `timeout` for space, then reject.
    ///
    /// Meant for dedicated producer paths; a handler or listener must
    /// never block on its own machine's mailbox.
    Block { timeout: Duration },
}

/// Options recognized by the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cap on machines dispatched simultaneously.
    pub max_concurrent_machines: usize,
    /// Per-machine mailbox capacity.
    pub mailbox_capacity: usize,
    /// Full-mailbox behavior.
    pub enqueue_policy: EnqueuePolicy,
    /// Consult persistence for unknown ids.
    pub rehydration_enabled: bool,
    /// Drain deadline for `shutdown()`.
    pub shutdown_timeout: Duration,
    /// Warn when a single handler runs longer than this.
    pub slow_handler_threshold: Duration,
    /// Poll resolution of the timeout driver task.
    pub timer_resolution: Duration,
    /// Events drained per serial-lock acquisition.
    pub drain_batch: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_machines: 256,
            mailbox_capacity: 64,
            enqueue_policy: EnqueuePolicy::FailFast,
            rehydration_enabled: true,
            shutdown_timeout: Duration::from_secs(5),
            slow_handler_threshold: Duration::from_secs(1),
            timer_resolution: Duration::from_millis(100),
            drain_batch: 16,
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    xbar_core::setters! {
        set {
            max_concurrent_machines: usize,
            mailbox_capacity: usize,
            enqueue_policy: EnqueuePolicy,
            rehydration_enabled: bool,
            shutdown_timeout: Duration,
            slow_handler_threshold: Duration,
            timer_resolution: Duration,
            drain_batch: usize,
        }
    }
}
