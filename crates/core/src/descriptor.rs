// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State descriptor tables: the declarative schema of a machine kind.
//!
//! A [`DescriptorTable`] maps state names to [`StateConfig`]s — entry
//! and exit actions, event-keyed transitions, an optional timeout, and
//! the terminal/offline markers. Tables are validated when built (see
//! [`crate::builder`]) and immutable afterwards, so the dispatch hot
//! path runs without schema checks. One table is shared by every
//! machine of its kind.

use crate::event::MachineEvent;
use crate::id::MachineId;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned by entry/exit actions and stay handlers.
///
/// A failing handler marks the transition faulted; the machine rolls
/// back to its pre-transition state and stays there.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Mutable view of one machine handed to actions and stay handlers.
///
/// Handlers run under the machine's serial lock; mutations to the
/// persistent record are saved when the transition commits and rolled
/// back when it faults.
pub struct ActionScope<'a, P, V> {
    pub id: &'a MachineId,
    pub state: &'a str,
    pub persistent: &'a mut P,
    pub volatile: &'a mut Option<V>,
}

/// Entry/exit action attached to a state.
pub type EntryAction<P, V> =
    Arc<dyn Fn(&mut ActionScope<'_, P, V>) -> Result<(), ActionError> + Send + Sync>;

/// Exit actions share the entry action shape.
pub type ExitAction<P, V> = EntryAction<P, V>;

/// Handler for an in-state (`Stay`) transition. Receives the triggering
/// event for payload downcasts; must not request a state change.
pub type StayHandler<P, V> = Arc<
    dyn Fn(&mut ActionScope<'_, P, V>, &dyn MachineEvent) -> Result<(), ActionError>
        + Send
        + Sync,
>;

/// How a state reacts to one event type.
pub enum Transition<P, V> {
    /// Move to the named state, running exit/entry actions.
    Go(String),
    /// Remain in the state and run the handler; entry/exit actions do
    /// not run and the state's timeout is not reset.
    Stay(StayHandler<P, V>),
}

impl<P, V> fmt::Debug for Transition<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Go(target) => f.debug_tuple("Go").field(target).finish(),
            Transition::Stay(_) => f.write_str("Stay(..)"),
        }
    }
}

/// Timeout configuration for a state: after `duration` in the state
/// with no `Go` transition, the machine moves to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTimeout {
    pub duration: Duration,
    pub target: String,
}

/// Configuration of a single state.
pub struct StateConfig<P, V> {
    name: String,
    on_entry: Option<EntryAction<P, V>>,
    on_exit: Option<ExitAction<P, V>>,
    transitions: HashMap<String, Transition<P, V>>,
    timeout: Option<StateTimeout>,
    is_final: bool,
    is_offline: bool,
}

impl<P, V> StateConfig<P, V> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        on_entry: Option<EntryAction<P, V>>,
        on_exit: Option<ExitAction<P, V>>,
        transitions: HashMap<String, Transition<P, V>>,
        timeout: Option<StateTimeout>,
        is_final: bool,
        is_offline: bool,
    ) -> Self {
        Self {
            name,
            on_entry,
            on_exit,
            transitions,
            timeout,
            is_final,
            is_offline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_entry(&self) -> Option<&EntryAction<P, V>> {
        self.on_entry.as_ref()
    }

    pub fn on_exit(&self) -> Option<&ExitAction<P, V>> {
        self.on_exit.as_ref()
    }

    /// Resolve the transition for a registered event name, if any.
    pub fn transition(&self, event_name: &str) -> Option<&Transition<P, V>> {
        self.transitions.get(event_name)
    }

    /// Event names this state reacts to (arbitrary order).
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.transitions.keys().map(String::as_str)
    }

    pub fn timeout(&self) -> Option<&StateTimeout> {
        self.timeout.as_ref()
    }

    /// Entering a final state marks the persistent record complete and
    /// permanently evicts the machine.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Entering an offline state evicts the machine from the live set
    /// while leaving its record rehydratable.
    pub fn is_offline(&self) -> bool {
        self.is_offline
    }
}

impl<P, V> fmt::Debug for StateConfig<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateConfig")
            .field("name", &self.name)
            .field("transitions", &self.transitions)
            .field("timeout", &self.timeout)
            .field("is_final", &self.is_final)
            .field("is_offline", &self.is_offline)
            .finish_non_exhaustive()
    }
}

/// Immutable table of states for one machine kind.
///
/// Built once via [`crate::builder::TableBuilder`], then shared by
/// reference (`Arc`) across every machine instance of the kind.
pub struct DescriptorTable<P, V> {
    kind: String,
    initial: String,
    states: IndexMap<String, StateConfig<P, V>>,
}

impl<P, V> DescriptorTable<P, V> {
    pub(crate) fn new(
        kind: String,
        initial: String,
        states: IndexMap<String, StateConfig<P, V>>,
    ) -> Self {
        Self {
            kind,
            initial,
            states,
        }
    }

    /// Machine kind this table describes (e.g. "call", "sms").
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn state(&self, name: &str) -> Option<&StateConfig<P, V>> {
        self.states.get(name)
    }

    pub fn contains_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// States in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &StateConfig<P, V>> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<P, V> fmt::Debug for DescriptorTable<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("kind", &self.kind)
            .field("initial", &self.initial)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Schema violations rejected when a descriptor table is built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("duplicate state '{0}'")]
    DuplicateState(String),
    #[error("duplicate transition on ({state}, {event})")]
    DuplicateTransition { state: String, event: String },
    #[error("state name cannot be empty")]
    EmptyStateName,
    #[error("no initial state declared for machine kind '{0}'")]
    MissingInitial(String),
    #[error("initial state '{0}' is not declared")]
    UnknownInitial(String),
    #[error("timeout duration must be positive on state '{0}'")]
    NonPositiveTimeout(String),
    #[error("timeout on state '{state}' targets unknown state '{target}'")]
    UnknownTimeoutTarget { state: String, target: String },
    #[error("transition on ({state}, {event}) targets unknown state '{target}'")]
    UnknownTarget {
        state: String,
        event: String,
        target: String,
    },
    #[error("state '{0}' is marked both final and offline")]
    FinalAndOffline(String),
    #[error("final state '{0}' cannot define transitions")]
    TransitionOnFinal(String),
    #[error("final state '{0}' cannot define a timeout")]
    TimeoutOnFinal(String),
    #[error("unregistered event type: {0}")]
    UnregisteredEvent(String),
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;
