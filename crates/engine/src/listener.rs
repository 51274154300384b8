// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener fan-out for registry lifecycle and transition events.

use crate::error::DropReason;
use parking_lot::RwLock;
use std::sync::Arc;
use xbar_core::{ActionError, MachineId};

/// Observer of registry lifecycle and machine transitions.
///
/// All methods default to no-ops; implementors override what they
/// need. Listeners are notified synchronously after persistence, in
/// per-machine transition order, and are side-effect-only: they cannot
/// influence dispatch, and a synchronous `send_event` back to the
/// machine being dispatched is rejected as reentrant.
pub trait RegistryListener<P, V>: Send + Sync {
    /// A machine was registered and started from its initial state.
    fn on_registry_create(&self, id: &MachineId) {
        let _ = id;
    }

    /// A machine was reloaded from persistence into the live set.
    fn on_registry_rehydrate(&self, id: &MachineId) {
        let _ = id;
    }

    /// A machine left the live set (final, offline, or removal).
    fn on_registry_remove(&self, id: &MachineId) {
        let _ = id;
    }

    /// A transition committed. `old_state` is `None` for the initial
    /// transition at start; `old_state == Some(new_state)` for `Stay`.
    fn on_state_machine_event(
        &self,
        id: &MachineId,
        old_state: Option<&str>,
        new_state: &str,
        persistent: &P,
        volatile: Option<&V>,
    ) {
        let _ = (id, old_state, new_state, persistent, volatile);
    }

    /// An event was not delivered.
    fn on_dropped_event(&self, id: &MachineId, event_name: &str, reason: DropReason) {
        let _ = (id, event_name, reason);
    }

    /// A handler or save failed; the machine stayed in `state`.
    fn on_transition_fault(&self, id: &MachineId, state: &str, error: &ActionError) {
        let _ = (id, state, error);
    }
}

/// Registered listeners, notified in insertion order.
pub(crate) struct ListenerSet<P, V> {
    listeners: RwLock<Vec<Arc<dyn RegistryListener<P, V>>>>,
}

impl<P, V> ListenerSet<P, V> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn RegistryListener<P, V>>) {
        self.listeners.write().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn RegistryListener<P, V>>) {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .write()
            .retain(|l| Arc::as_ptr(l) as *const () != target);
    }

    pub fn for_each(&self, mut f: impl FnMut(&dyn RegistryListener<P, V>)) {
        for listener in self.listeners.read().iter() {
            f(listener.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
