// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single machine instance: current state, contexts, and the
//! transition algorithm.
//!
//! Machines hold no reference back to the registry. Applying an event
//! returns an [`Applied`] outcome describing what the dispatch worker
//! must do next — persist, arm a timeout, notify listeners, request
//! eviction — so all side effects stay on the worker, outside this
//! module.
//!
//! Every mutation happens under the machine's serial lock (owned by
//! the dispatch worker); the snapshot/rollback discipline keeps the
//! in-memory state equal to the last persisted state whenever a
//! handler or a save fails.

use crate::error::RegistryError;
use std::sync::Arc;
use std::time::Duration;
use xbar_core::{
    ActionError, ActionScope, ContextRecord, DescriptorTable, EntryAction, MachineEvent,
    MachineId, TimeoutFired, Transition, VolatileInit, TIMEOUT_EVENT,
};

/// Request to arm the timeout of the state just entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArmRequest {
    pub duration: Duration,
    pub epoch: u64,
}

/// Outcome of starting a machine.
#[derive(Debug)]
pub(crate) struct StartOutcome {
    pub arm: Option<ArmRequest>,
    /// Entry action failure; the machine sits in its initial state
    /// without the action's effects.
    pub fault: Option<ActionError>,
}

/// Outcome of applying one event under the serial lock.
pub(crate) enum Applied {
    /// No transition defined for the event in the current state.
    Ignored { event_name: &'static str },
    /// Timeout delivery whose arm epoch no longer matches.
    StaleTimeout,
    /// Stay handler ran; the persistent context may have changed.
    Stayed { state: String },
    /// Go transition committed in memory; persisting it is the
    /// caller's next step.
    Moved {
        from: String,
        to: String,
        is_final: bool,
        is_offline: bool,
        arm: Option<ArmRequest>,
    },
    /// A handler failed; memory rolled back to the pre-event snapshot.
    Faulted { state: String, error: ActionError },
}

/// Pre-transition snapshot for rollback.
///
/// The volatile context is deliberately not part of the snapshot: it
/// is reconstructable scratch data, never authoritative.
pub(crate) struct Snapshot<P> {
    persistent: P,
    state: String,
    arm_epoch: u64,
}

/// One live machine: identity, descriptor, contexts, and the pending
/// timeout's arm epoch.
pub struct Machine<P: ContextRecord, V> {
    id: MachineId,
    descriptor: Arc<DescriptorTable<P, V>>,
    current_state: String,
    persistent: P,
    volatile: Option<V>,
    volatile_init: Option<VolatileInit<P, V>>,
    arm_epoch: u64,
    started: bool,
    faulted: bool,
}

impl<P: ContextRecord, V> Machine<P, V> {
    /// Create an unstarted machine positioned at the table's initial
    /// state. The registry starts it on `register`/`create_or_get`.
    pub fn new(
        id: impl Into<MachineId>,
        descriptor: Arc<DescriptorTable<P, V>>,
        persistent: P,
    ) -> Self {
        let current_state = descriptor.initial().to_string();
        Self {
            id: id.into(),
            descriptor,
            current_state,
            persistent,
            volatile: None,
            volatile_init: None,
            arm_epoch: 0,
            started: false,
            faulted: false,
        }
    }

    /// Attach an initial volatile context.
    pub fn with_volatile(mut self, volatile: V) -> Self {
        self.volatile = Some(volatile);
        self
    }

    /// Attach the factory that rebuilds the volatile context from the
    /// persistent record — at start when no volatile was supplied, and
    /// on every rehydration.
    pub fn with_volatile_init(
        mut self,
        init: impl Fn(&P) -> V + Send + Sync + 'static,
    ) -> Self {
        self.volatile_init = Some(Arc::new(init));
        self
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    pub fn descriptor(&self) -> &Arc<DescriptorTable<P, V>> {
        &self.descriptor
    }

    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    pub fn persistent(&self) -> &P {
        &self.persistent
    }

    pub fn volatile(&self) -> Option<&V> {
        self.volatile.as_ref()
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Sticky flag: some handler failed at least once. Diagnostic only;
    /// the machine keeps dispatching from its rolled-back state.
    pub fn faulted(&self) -> bool {
        self.faulted
    }

    pub(crate) fn arm_epoch(&self) -> u64 {
        self.arm_epoch
    }

    pub(crate) fn snapshot(&self) -> Snapshot<P> {
        Snapshot {
            persistent: self.persistent.clone(),
            state: self.current_state.clone(),
            arm_epoch: self.arm_epoch,
        }
    }

    pub(crate) fn restore_snapshot(&mut self, snapshot: Snapshot<P>) {
        self.persistent = snapshot.persistent;
        self.current_state = snapshot.state;
        self.arm_epoch = snapshot.arm_epoch;
    }

    /// Enter the initial state: run its entry action, stamp the record,
    /// and report the timeout to arm. Fails when called twice.
    pub(crate) fn begin(&mut self, now_ms: u64) -> Result<StartOutcome, RegistryError> {
        if self.started {
            return Err(RegistryError::AlreadyStarted(self.id.clone()));
        }
        self.started = true;

        let descriptor = Arc::clone(&self.descriptor);
        let initial = descriptor.initial().to_string();
        self.current_state = initial.clone();
        self.persistent.set_current_state(&initial);
        self.persistent.set_last_state_change(now_ms);
        if self.volatile.is_none() {
            if let Some(init) = &self.volatile_init {
                self.volatile = Some(init(&self.persistent));
            }
        }

        let snapshot = self.snapshot();
        let mut fault = None;
        if let Some(entry) = descriptor.state(&initial).and_then(|s| s.on_entry()) {
            let entry = Arc::clone(entry);
            if let Err(error) = self.run_action(&initial, &entry) {
                self.restore_snapshot(snapshot);
                self.faulted = true;
                fault = Some(error);
            }
        }

        let arm = if fault.is_none() {
            self.arm_for_state(&initial)
        } else {
            None
        };
        Ok(StartOutcome { arm, fault })
    }

    /// Load a persisted record: adopt its state without running the
    /// entry action, and rebuild the volatile context. The record's
    /// `last_state_change` is preserved as loaded.
    pub(crate) fn rehydrate(&mut self, ctx: P) {
        self.current_state = ctx.current_state().to_string();
        self.volatile = self.volatile_init.as_ref().map(|init| init(&ctx));
        self.persistent = ctx;
        self.started = true;
    }

    /// Timeout request for the current state, if it has one (used on
    /// rehydration, where no transition ran to arm it).
    pub(crate) fn arm_for_current(&mut self) -> Option<ArmRequest> {
        let state = self.current_state.clone();
        self.arm_for_state(&state)
    }

    /// Apply one event. `name` is the event's pre-resolved type name.
    pub(crate) fn apply(
        &mut self,
        name: &'static str,
        event: &dyn MachineEvent,
        now_ms: u64,
    ) -> Applied {
        let descriptor = Arc::clone(&self.descriptor);

        // Timeout deliveries resolve through the state's timeout target.
        if name == TIMEOUT_EVENT {
            let Some(fired) = event.as_any().downcast_ref::<TimeoutFired>() else {
                return Applied::Ignored { event_name: name };
            };
            if fired.epoch != self.arm_epoch {
                return Applied::StaleTimeout;
            }
            let target = match descriptor
                .state(&self.current_state)
                .and_then(|s| s.timeout())
            {
                Some(timeout) => timeout.target.clone(),
                None => return Applied::StaleTimeout,
            };
            return self.go(&descriptor, target, now_ms);
        }

        let Some(config) = descriptor.state(&self.current_state) else {
            return Applied::Ignored { event_name: name };
        };
        match config.transition(name) {
            None => Applied::Ignored { event_name: name },
            Some(Transition::Stay(handler)) => {
                let handler = Arc::clone(handler);
                let snapshot = self.snapshot();
                let state = self.current_state.clone();
                let result = {
                    let mut scope = ActionScope {
                        id: &self.id,
                        state: &state,
                        persistent: &mut self.persistent,
                        volatile: &mut self.volatile,
                    };
                    handler(&mut scope, event)
                };
                match result {
                    Ok(()) => Applied::Stayed { state },
                    Err(error) => {
                        self.restore_snapshot(snapshot);
                        self.faulted = true;
                        Applied::Faulted { state, error }
                    }
                }
            }
            Some(Transition::Go(target)) => {
                let target = target.clone();
                self.go(&descriptor, target, now_ms)
            }
        }
    }

    /// The Go path: exit action, state write, entry action, timeout
    /// request. Any action failure rolls the machine back to where it
    /// was before the event.
    fn go(&mut self, descriptor: &DescriptorTable<P, V>, target: String, now_ms: u64) -> Applied {
        let from = self.current_state.clone();
        let snapshot = self.snapshot();

        if let Some(exit) = descriptor.state(&from).and_then(|s| s.on_exit()) {
            let exit = Arc::clone(exit);
            if let Err(error) = self.run_action(&from, &exit) {
                self.restore_snapshot(snapshot);
                self.faulted = true;
                return Applied::Faulted { state: from, error };
            }
        }

        // Invalidates any timeout armed for the state being left.
        self.arm_epoch += 1;

        let Some(config) = descriptor.state(&target) else {
            // Unreachable with validated tables
            self.restore_snapshot(snapshot);
            self.faulted = true;
            return Applied::Faulted {
                state: from,
                error: ActionError::new(format!("undefined target state '{target}'")),
            };
        };
        let is_final = config.is_final();
        let is_offline = config.is_offline();

        self.current_state = target.clone();
        self.persistent.set_current_state(&target);
        self.persistent.set_last_state_change(now_ms);
        if is_final {
            self.persistent.set_complete(true);
        }

        if let Some(entry) = config.on_entry() {
            let entry = Arc::clone(entry);
            if let Err(error) = self.run_action(&target, &entry) {
                self.restore_snapshot(snapshot);
                self.faulted = true;
                return Applied::Faulted { state: from, error };
            }
        }

        let arm = if is_final || is_offline {
            None
        } else {
            self.arm_for_state(&target)
        };

        Applied::Moved {
            from,
            to: target,
            is_final,
            is_offline,
            arm,
        }
    }

    fn run_action(&mut self, state: &str, action: &EntryAction<P, V>) -> Result<(), ActionError> {
        let mut scope = ActionScope {
            id: &self.id,
            state,
            persistent: &mut self.persistent,
            volatile: &mut self.volatile,
        };
        action(&mut scope)
    }

    fn arm_for_state(&mut self, state: &str) -> Option<ArmRequest> {
        let duration = match self.descriptor.state(state).and_then(|s| s.timeout()) {
            Some(timeout) => timeout.duration,
            None => return None,
        };
        self.arm_epoch += 1;
        Some(ArmRequest {
            duration,
            epoch: self.arm_epoch,
        })
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
