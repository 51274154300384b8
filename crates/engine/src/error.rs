// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the machine runtime

use thiserror::Error;
use xbar_core::{EventTypeError, MachineId};
use xbar_storage::StoreError;

/// Errors that can occur in registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("machine '{0}' is already registered")]
    AlreadyRegistered(MachineId),
    #[error("machine '{0}' was already started")]
    AlreadyStarted(MachineId),
    #[error("no machine '{0}' and no record to rehydrate")]
    NoSuchMachine(MachineId),
    #[error("machine '{0}' already ran to completion")]
    MachineComplete(MachineId),
    #[error("registry is draining")]
    Draining,
    #[error(transparent)]
    EventType(#[from] EventTypeError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Why an event was not delivered to a machine.
///
/// Surfaced through [`crate::RegistryListener::on_dropped_event`], the
/// drop counter, and logs; `send_event` itself only reports `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Unknown id with rehydration unavailable, or no usable record.
    NoSuchMachine,
    /// Mailbox full under the fail-fast enqueue policy.
    MachineBusy,
    /// Registry is shutting down.
    Draining,
    /// Synchronous send for a machine already dispatching on this thread.
    Reentrant,
    /// Event type has no registered name.
    UnknownEventType,
    /// Machine was evicted while the event waited in its mailbox.
    Evicted,
    /// Mailbox dropped at shutdown after the drain deadline.
    Undelivered,
}

xbar_core::simple_display! {
    DropReason {
        NoSuchMachine => "no-such-machine",
        MachineBusy => "machine-busy",
        Draining => "draining",
        Reentrant => "reentrant-dispatch",
        UnknownEventType => "unknown-event-type",
        Evicted => "evicted",
        Undelivered => "undelivered",
    }
}
