//! Shared fixtures for the behavioral specs: a call-processing
//! machine kind built entirely through the public API.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use xbar_core::{
    ActionScope, ContextRecord, DescriptorTable, EventTypes, FakeClock, MachineId, TableBuilder,
};
use xbar_engine::{DropReason, Machine, Registry, RegistryConfig, RegistryListener};
use xbar_storage::MemoryStore;

/// Persistent context of one call leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDetail {
    pub current_state: String,
    pub last_state_change: u64,
    pub complete: bool,
    pub caller: String,
    pub callee: String,
    #[serde(default)]
    pub ring_count: u32,
}

impl CallDetail {
    pub fn new(caller: &str, callee: &str) -> Self {
        Self {
            current_state: "IDLE".to_string(),
            last_state_change: 0,
            complete: false,
            caller: caller.to_string(),
            callee: callee.to_string(),
            ring_count: 0,
        }
    }
}

impl ContextRecord for CallDetail {
    fn current_state(&self) -> &str {
        &self.current_state
    }

    fn set_current_state(&mut self, state: &str) {
        self.current_state = state.to_string();
    }

    fn last_state_change(&self) -> u64 {
        self.last_state_change
    }

    fn set_last_state_change(&mut self, epoch_ms: u64) {
        self.last_state_change = epoch_ms;
    }

    fn complete(&self) -> bool {
        self.complete
    }

    fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }
}

/// Volatile media scratchpad, rebuilt from the record on rehydration.
#[derive(Debug, Clone, Default)]
pub struct MediaSession {
    pub negotiated_for: String,
    pub progress_frames: u64,
}

// Call signalling events.

#[derive(Debug, Clone)]
pub struct IncomingCall;

#[derive(Debug, Clone)]
pub struct Answer;

#[derive(Debug, Clone)]
pub struct Hangup;

#[derive(Debug, Clone)]
pub struct SessionProgress;

pub fn register_events() {
    let events = EventTypes::global();
    events.register::<IncomingCall>("INCOMING_CALL").unwrap();
    events.register::<Answer>("ANSWER").unwrap();
    events.register::<Hangup>("HANGUP").unwrap();
    events.register::<SessionProgress>("SESSION_PROGRESS").unwrap();
}

pub type CallTable = Arc<DescriptorTable<CallDetail, MediaSession>>;
pub type CallRegistry = Registry<CallDetail, MediaSession, Arc<MemoryStore>, FakeClock>;

/// The call lifecycle of §8: IDLE → RINGING → CONNECTED → HUNGUP, with
/// a ring timeout back to IDLE and a progress counter while ringing.
pub fn call_table(ring_timeout: Duration, connected_offline: bool) -> CallTable {
    register_events();
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
        .stay(|scope: &mut ActionScope<'_, CallDetail, MediaSession>, _event| {
            scope.persistent.ring_count += 1;
            if let Some(media) = scope.volatile.as_mut() {
                media.progress_frames += 1;
            }
            Ok(())
        })
        .timeout(ring_timeout, "IDLE")
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

pub fn call_machine(id: &str, table: &CallTable) -> Machine<CallDetail, MediaSession> {
    Machine::new(
        id,
        Arc::clone(table),
        CallDetail::new("+15550100", "+15550199"),
    )
    .with_volatile_init(|detail| MediaSession {
        negotiated_for: detail.current_state.clone(),
        progress_frames: 0,
    })
}

/// Everything the specs need to observe through a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
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
    },
}

#[derive(Default)]
pub struct EventLog {
    observed: Mutex<Vec<Observed>>,
}

impl EventLog {
    pub fn all(&self) -> Vec<Observed> {
        self.observed.lock().clone()
    }

    pub fn transitions(&self, machine: &str) -> Vec<(Option<String>, String)> {
        self.all()
            .into_iter()
            .filter_map(|o| match o {
                Observed::Transition { id, old, new } if id == machine => Some((old, new)),
                _ => None,
            })
            .collect()
    }

    pub fn saw(&self, wanted: &Observed) -> bool {
        self.observed.lock().iter().any(|o| o == wanted)
    }
}

impl RegistryListener<CallDetail, MediaSession> for EventLog {
    fn on_registry_create(&self, id: &MachineId) {
        self.observed.lock().push(Observed::Create(id.to_string()));
    }

    fn on_registry_rehydrate(&self, id: &MachineId) {
        self.observed.lock().push(Observed::Rehydrate(id.to_string()));
    }

    fn on_registry_remove(&self, id: &MachineId) {
        self.observed.lock().push(Observed::Remove(id.to_string()));
    }

    fn on_state_machine_event(
        &self,
        id: &MachineId,
        old_state: Option<&str>,
        new_state: &str,
        _persistent: &CallDetail,
        _volatile: Option<&MediaSession>,
    ) {
        self.observed.lock().push(Observed::Transition {
            id: id.to_string(),
            old: old_state.map(str::to_string),
            new: new_state.to_string(),
        });
    }

    fn on_dropped_event(&self, id: &MachineId, event_name: &str, _reason: DropReason) {
        self.observed.lock().push(Observed::Dropped {
            id: id.to_string(),
            event: event_name.to_string(),
        });
    }
}

pub struct Deployment {
    pub registry: CallRegistry,
    pub store: Arc<MemoryStore>,
    pub clock: FakeClock,
    pub table: CallTable,
    pub log: Arc<EventLog>,
}

pub fn deploy(ring_timeout: Duration, connected_offline: bool) -> Deployment {
    deploy_with(ring_timeout, connected_offline, RegistryConfig::default())
}

pub fn deploy_with(
    ring_timeout: Duration,
    connected_offline: bool,
    config: RegistryConfig,
) -> Deployment {
    let store = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let registry = Registry::new(Arc::clone(&store), clock.clone(), config);
    let log = Arc::new(EventLog::default());
    registry.add_listener(log.clone());
    Deployment {
        registry,
        store,
        clock,
        table: call_table(ring_timeout, connected_offline),
        log,
    }
}

pub fn id(s: &str) -> MachineId {
    MachineId::new(s)
}
