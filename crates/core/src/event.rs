// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types and the process-wide event type registry.
//!
//! Machines receive typed events; transition tables are keyed by the
//! stable string name each concrete type is registered under. The
//! registry holds the `TypeId ↔ name` bijection so dispatch never
//! depends on the runtime type alone (names also serve as the wire
//! identity for events that leave the process).
//!
//! Registration happens once at startup. Lookups afterwards are
//! read-only and take an uncontended read lock.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Well-known name of the synthetic event delivered when a state
/// timeout elapses. Reserved: caller types cannot register under it.
pub const TIMEOUT_EVENT: &str = "__TIMEOUT__";

/// Synthetic event delivered to a machine when a state timeout fires.
///
/// Carries the arm epoch the timeout was scheduled under; deliveries
/// whose epoch no longer matches the machine's current epoch are stale
/// and dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutFired {
    pub epoch: u64,
}

/// A typed event deliverable to a machine.
///
/// Blanket-implemented for any `Send + Debug + 'static` type, so
/// callers define plain structs and register them by name. Dispatch is
/// resolved through [`EventTypes`], not the Rust type directly; stay
/// handlers downcast via [`MachineEvent::as_any`] to read payloads.
pub trait MachineEvent: Send + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Send + fmt::Debug + 'static> MachineEvent for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Errors from event type registration and lookup
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventTypeError {
    #[error("conflicting event registration for '{name}' ({type_name})")]
    DuplicateRegistration { name: String, type_name: String },
    #[error("unregistered event type: {type_name}")]
    UnknownEventType { type_name: String },
}

#[derive(Default)]
struct Tables {
    names: HashMap<TypeId, &'static str>,
    types: HashMap<&'static str, TypeId>,
}

/// Process-wide bijection between concrete event types and stable names.
///
/// Registration is idempotent for an identical `(type, name)` pair and
/// fails when either side conflicts with an existing mapping.
pub struct EventTypes {
    inner: RwLock<Tables>,
}

impl EventTypes {
    /// Create an instance-scoped registry (tests; production code uses
    /// [`EventTypes::global`]). The synthetic timeout event is always
    /// pre-registered.
    pub fn new() -> Self {
        let registry = Self {
            inner: RwLock::new(Tables::default()),
        };
        {
            let mut tables = registry.inner.write();
            tables
                .names
                .insert(TypeId::of::<TimeoutFired>(), TIMEOUT_EVENT);
            tables.types.insert(TIMEOUT_EVENT, TypeId::of::<TimeoutFired>());
        }
        registry
    }

    /// The process-wide registry.
    pub fn global() -> &'static EventTypes {
        static GLOBAL: OnceLock<EventTypes> = OnceLock::new();
        GLOBAL.get_or_init(EventTypes::new)
    }

    /// Register `T` under `name`.
    ///
    /// Idempotent when `T` is already registered under `name`. Fails
    /// when `name` maps to a different type or `T` already has a
    /// different name — including the reserved timeout name, which is
    /// pre-registered to the engine's own event type.
    pub fn register<T: Send + fmt::Debug + 'static>(
        &self,
        name: &'static str,
    ) -> Result<(), EventTypeError> {
        let type_id = TypeId::of::<T>();
        let mut tables = self.inner.write();

        let existing_name = tables.names.get(&type_id).copied();
        let name_taken = tables.types.contains_key(name);
        match (existing_name, name_taken) {
            (Some(existing), _) if existing == name => Ok(()),
            (Some(_), _) | (_, true) => Err(EventTypeError::DuplicateRegistration {
                name: name.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            }),
            (None, false) => {
                tables.names.insert(type_id, name);
                tables.types.insert(name, type_id);
                Ok(())
            }
        }
    }

    /// Resolve the registered name of an event value.
    pub fn name_of(&self, event: &dyn MachineEvent) -> Result<&'static str, EventTypeError> {
        let type_id = event.as_any().type_id();
        self.inner.read().names.get(&type_id).copied().ok_or_else(|| {
            EventTypeError::UnknownEventType {
                type_name: format!("{event:?}"),
            }
        })
    }

    /// Resolve the registered name of an event type.
    pub fn name_of_type<T: 'static>(&self) -> Result<&'static str, EventTypeError> {
        self.inner
            .read()
            .names
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or_else(|| EventTypeError::UnknownEventType {
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    /// Resolve the registered name for a raw `TypeId` (builder support).
    pub fn name_of_id(&self, type_id: TypeId) -> Option<&'static str> {
        self.inner.read().names.get(&type_id).copied()
    }

    /// Whether any type is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().types.contains_key(name)
    }

    /// Number of registered event types (including the built-in timeout).
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventTypes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
