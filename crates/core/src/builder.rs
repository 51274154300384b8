// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fluent builder for state descriptor tables.
//!
//! All schema validation happens in [`TableBuilder::build`]; the
//! returned table needs no further checks on the dispatch path.
//!
//! ```ignore
//! let table = TableBuilder::<CallRecord, CallScratch>::new("call")
//!     .initial("IDLE")
//!     .state("IDLE")
//!         .on::<IncomingCall>().go("RINGING")
//!         .end()
//!     .state("RINGING")
//!         .on::<Answer>().go("CONNECTED")
//!         .on::<Hangup>().go("HUNGUP")
//!         .timeout(Duration::from_secs(30), "IDLE")
//!         .end()
//!     .state("HUNGUP").final_state().end()
//!     .build()?;
//! ```

use crate::descriptor::{
    ActionError, ActionScope, DescriptorError, DescriptorTable, EntryAction, StateConfig,
    StateTimeout, StayHandler, Transition,
};
use crate::event::{EventTypes, MachineEvent};
use indexmap::IndexMap;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a pending edge identifies its event type: by concrete type
/// (resolved against the event registry at build time) or by name.
enum EventKey {
    Typed {
        type_id: TypeId,
        type_name: &'static str,
    },
    Named(String),
}

struct PendingEdge<P, V> {
    event: EventKey,
    transition: Transition<P, V>,
}

struct PendingState<P, V> {
    name: String,
    on_entry: Option<EntryAction<P, V>>,
    on_exit: Option<EntryAction<P, V>>,
    edges: Vec<PendingEdge<P, V>>,
    timeout: Option<StateTimeout>,
    is_final: bool,
    is_offline: bool,
}

/// Builder for a [`DescriptorTable`]. Declare states with
/// [`TableBuilder::state`], then validate and freeze with
/// [`TableBuilder::build`].
pub struct TableBuilder<P, V> {
    kind: String,
    initial: Option<String>,
    states: Vec<PendingState<P, V>>,
}

impl<P, V> TableBuilder<P, V> {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            initial: None,
            states: Vec::new(),
        }
    }

    /// Name the initial state. Must be declared via [`TableBuilder::state`].
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Open a state declaration. Close it with [`StateBuilder::end`].
    pub fn state(self, name: impl Into<String>) -> StateBuilder<P, V> {
        StateBuilder {
            table: self,
            state: PendingState {
                name: name.into(),
                on_entry: None,
                on_exit: None,
                edges: Vec::new(),
                timeout: None,
                is_final: false,
                is_offline: false,
            },
        }
    }

    /// Validate against the process-wide event registry and freeze.
    pub fn build(self) -> Result<DescriptorTable<P, V>, DescriptorError> {
        self.build_with(EventTypes::global())
    }

    /// Validate against a specific event registry and freeze.
    pub fn build_with(
        self,
        events: &EventTypes,
    ) -> Result<DescriptorTable<P, V>, DescriptorError> {
        let initial = self
            .initial
            .ok_or_else(|| DescriptorError::MissingInitial(self.kind.clone()))?;

        let mut states: IndexMap<String, StateConfig<P, V>> =
            IndexMap::with_capacity(self.states.len());

        for pending in self.states {
            if pending.name.is_empty() {
                return Err(DescriptorError::EmptyStateName);
            }
            if states.contains_key(&pending.name) {
                return Err(DescriptorError::DuplicateState(pending.name));
            }
            if pending.is_final && pending.is_offline {
                return Err(DescriptorError::FinalAndOffline(pending.name));
            }
            if pending.is_final && !pending.edges.is_empty() {
                return Err(DescriptorError::TransitionOnFinal(pending.name));
            }
            if pending.is_final && pending.timeout.is_some() {
                return Err(DescriptorError::TimeoutOnFinal(pending.name));
            }
            if let Some(timeout) = &pending.timeout {
                if timeout.duration.is_zero() {
                    return Err(DescriptorError::NonPositiveTimeout(pending.name));
                }
            }

            let mut transitions: HashMap<String, Transition<P, V>> =
                HashMap::with_capacity(pending.edges.len());
            for edge in pending.edges {
                let event_name = match edge.event {
                    EventKey::Typed { type_id, type_name } => events
                        .name_of_id(type_id)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            DescriptorError::UnregisteredEvent(type_name.to_string())
                        })?,
                    EventKey::Named(name) => name,
                };
                if transitions.contains_key(&event_name) {
                    return Err(DescriptorError::DuplicateTransition {
                        state: pending.name,
                        event: event_name,
                    });
                }
                transitions.insert(event_name, edge.transition);
            }

            states.insert(
                pending.name.clone(),
                StateConfig::new(
                    pending.name,
                    pending.on_entry,
                    pending.on_exit,
                    transitions,
                    pending.timeout,
                    pending.is_final,
                    pending.is_offline,
                ),
            );
        }

        if !states.contains_key(&initial) {
            return Err(DescriptorError::UnknownInitial(initial));
        }

        for config in states.values() {
            if let Some(timeout) = config.timeout() {
                if !states.contains_key(&timeout.target) {
                    return Err(DescriptorError::UnknownTimeoutTarget {
                        state: config.name().to_string(),
                        target: timeout.target.clone(),
                    });
                }
            }
            for event_name in config.event_names() {
                if let Some(Transition::Go(target)) = config.transition(event_name) {
                    if !states.contains_key(target) {
                        return Err(DescriptorError::UnknownTarget {
                            state: config.name().to_string(),
                            event: event_name.to_string(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(DescriptorTable::new(self.kind, initial, states))
    }
}

impl<P, V> fmt::Debug for TableBuilder<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableBuilder")
            .field("kind", &self.kind)
            .field("initial", &self.initial)
            .field("states", &self.states.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for one state's configuration.
pub struct StateBuilder<P, V> {
    table: TableBuilder<P, V>,
    state: PendingState<P, V>,
}

impl<P, V> StateBuilder<P, V> {
    /// Action run on entering the state (including machine start for
    /// the initial state; skipped on rehydration).
    pub fn on_entry<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ActionScope<'_, P, V>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.state.on_entry = Some(Arc::new(f));
        self
    }

    /// Action run on leaving the state via a `Go` transition.
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ActionScope<'_, P, V>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.state.on_exit = Some(Arc::new(f));
        self
    }

    /// Declare a transition for the registered event type `E`.
    pub fn on<E: MachineEvent + 'static>(self) -> EdgeBuilder<P, V> {
        EdgeBuilder {
            state: self,
            event: EventKey::Typed {
                type_id: TypeId::of::<E>(),
                type_name: std::any::type_name::<E>(),
            },
        }
    }

    /// Declare a transition for an event by its registered name.
    pub fn on_named(self, event_name: impl Into<String>) -> EdgeBuilder<P, V> {
        EdgeBuilder {
            state: self,
            event: EventKey::Named(event_name.into()),
        }
    }

    /// After `duration` in this state, move to `target`.
    pub fn timeout(mut self, duration: Duration, target: impl Into<String>) -> Self {
        self.state.timeout = Some(StateTimeout {
            duration,
            target: target.into(),
        });
        self
    }

    /// Mark the state final: entering it completes and evicts the machine.
    pub fn final_state(mut self) -> Self {
        self.state.is_final = true;
        self
    }

    /// Mark the state offline: entering it evicts the machine from
    /// memory while keeping its record rehydratable.
    pub fn offline(mut self) -> Self {
        self.state.is_offline = true;
        self
    }

    /// Close the state declaration.
    pub fn end(mut self) -> TableBuilder<P, V> {
        self.table.states.push(self.state);
        self.table
    }
}

/// Builder for a single `(state, event)` edge.
pub struct EdgeBuilder<P, V> {
    state: StateBuilder<P, V>,
    event: EventKey,
}

impl<P, V> EdgeBuilder<P, V> {
    /// Transition to `target`, running exit and entry actions.
    pub fn go(mut self, target: impl Into<String>) -> StateBuilder<P, V> {
        self.state.state.edges.push(PendingEdge {
            event: self.event,
            transition: Transition::Go(target.into()),
        });
        self.state
    }

    /// Remain in the state and run `handler` with the event.
    pub fn stay<F>(mut self, handler: F) -> StateBuilder<P, V>
    where
        F: Fn(&mut ActionScope<'_, P, V>, &dyn MachineEvent) -> Result<(), ActionError>
            + Send
            + Sync
            + 'static,
    {
        let handler: StayHandler<P, V> = Arc::new(handler);
        self.state.state.edges.push(PendingEdge {
            event: self.event,
            transition: Transition::Stay(handler),
        });
        self.state
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
