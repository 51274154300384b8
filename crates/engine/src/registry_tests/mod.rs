// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry test fixtures and suite layout.

use crate::{DropReason, Machine, Registry, RegistryConfig, RegistryListener};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use xbar_core::test_support::{
    register_call_events, Answer, Hangup, IncomingCall, SessionProgress, TestRecord, TestScratch,
};
use xbar_core::{ActionScope, DescriptorTable, FakeClock, MachineId, TableBuilder};
use xbar_storage::MemoryStore;

mod concurrency;
mod lifecycle;
mod listeners;
mod rehydrate;
mod shutdown;
mod timeouts;

pub(crate) type CallRegistry = Registry<TestRecord, TestScratch, Arc<MemoryStore>, FakeClock>;
pub(crate) type CallTable = Arc<DescriptorTable<TestRecord, TestScratch>>;

/// The §8 call descriptor: IDLE → RINGING → CONNECTED → HUNGUP(final),
/// with a 30s ring timeout back to IDLE and a stay counter on
/// SESSION_PROGRESS. `connected_offline` switches CONNECTED to an
/// offline state for parking/rehydration scenarios.
pub(crate) fn call_table(connected_offline: bool) -> CallTable {
    register_call_events();
    let connected = TableBuilder::new("call")
        .initial("IDLE")
        .state("IDLE")
        .on::<IncomingCall>()
        .go("RINGING")
        .end()
        .state("RINGING")
        .on::<Answer>()
        .go("CONNECTED")
        .on::<Hangup>()
        .go("HUNGUP")
        .on::<SessionProgress>()
        .stay(|scope: &mut ActionScope<'_, TestRecord, TestScratch>, _event| {
            scope.persistent.ring_count += 1;
            Ok(())
        })
        .timeout(Duration::from_secs(30), "IDLE")
        .end()
        .state("CONNECTED");
    let connected = if connected_offline {
        connected.offline()
    } else {
        connected
    };
    Arc::new(
        connected
            .on::<Hangup>()
            .go("HUNGUP")
            .end()
            .state("HUNGUP")
            .final_state()
            .end()
            .build()
            .unwrap(),
    )
}

pub(crate) fn call_machine(id: &str, table: &CallTable) -> Machine<TestRecord, TestScratch> {
    Machine::new(id, Arc::clone(table), TestRecord::new("IDLE"))
        .with_volatile_init(|p| TestScratch {
            rebuilt_from: p.current_state.clone(),
            touches: 0,
        })
}

pub(crate) struct Fixture {
    pub registry: CallRegistry,
    pub store: Arc<MemoryStore>,
    pub clock: FakeClock,
    pub table: CallTable,
    pub listener: Arc<Recording>,
}

pub(crate) fn fixture(connected_offline: bool) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let registry = Registry::new(Arc::clone(&store), clock.clone(), RegistryConfig::default());
    let listener = Arc::new(Recording::default());
    registry.add_listener(listener.clone());
    Fixture {
        registry,
        store,
        clock,
        table: call_table(connected_offline),
        listener,
    }
}

pub(crate) fn id(s: &str) -> MachineId {
    MachineId::new(s)
}

/// Everything a listener can observe, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    Create(String),
    Rehydrate(String),
    Remove(String),
    Transition {
        id: String,
        old: Option<String>,
        new: String,
    },
    Dropped {
        id: String,
        event: String,
        reason: DropReason,
    },
    Fault {
        id: String,
        state: String,
        error: String,
    },
}

#[derive(Default)]
pub(crate) struct Recording {
    events: Mutex<Vec<Recorded>>,
}

impl Recording {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    /// Transitions observed for one machine, in order.
    pub fn transitions_for(&self, machine: &str) -> Vec<(Option<String>, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Transition { id, old, new } if id == machine => Some((old, new)),
                _ => None,
            })
            .collect()
    }

    pub fn drops_for(&self, machine: &str) -> Vec<(String, DropReason)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Dropped { id, event, reason } if id == machine => {
                    Some((event, reason))
                }
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, wanted: &Recorded) -> bool {
        self.events.lock().iter().any(|e| e == wanted)
    }
}

impl RegistryListener<TestRecord, TestScratch> for Recording {
    fn on_registry_create(&self, id: &MachineId) {
        self.events.lock().push(Recorded::Create(id.to_string()));
    }

    fn on_registry_rehydrate(&self, id: &MachineId) {
        self.events.lock().push(Recorded::Rehydrate(id.to_string()));
    }

    fn on_registry_remove(&self, id: &MachineId) {
        self.events.lock().push(Recorded::Remove(id.to_string()));
    }

    fn on_state_machine_event(
        &self,
        id: &MachineId,
        old_state: Option<&str>,
        new_state: &str,
        _persistent: &TestRecord,
        _volatile: Option<&TestScratch>,
    ) {
        self.events.lock().push(Recorded::Transition {
            id: id.to_string(),
            old: old_state.map(str::to_string),
            new: new_state.to_string(),
        });
    }

    fn on_dropped_event(&self, id: &MachineId, event_name: &str, reason: DropReason) {
        self.events.lock().push(Recorded::Dropped {
            id: id.to_string(),
            event: event_name.to_string(),
            reason,
        });
    }

    fn on_transition_fault(&self, id: &MachineId, state: &str, error: &xbar_core::ActionError) {
        self.events.lock().push(Recorded::Fault {
            id: id.to_string(),
            state: state.to_string(),
            error: error.to_string(),
        });
    }
}
