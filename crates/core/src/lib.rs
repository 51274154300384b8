// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! xbar-core: shared types for the Crossbar machine runtime.
//!
//! Everything in this crate is pure data and traits: the event type
//! registry, the clock abstraction, machine identifiers, the persistent
//! context contract, and the declarative state descriptor tables with
//! their fluent builder. The runtime that executes these lives in
//! `xbar-engine`.

pub mod macros;

pub mod builder;
pub mod clock;
pub mod context;
pub mod descriptor;
pub mod event;
pub mod id;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use builder::TableBuilder;
pub use clock::{Clock, FakeClock, SystemClock};
pub use context::{ContextRecord, VolatileInit};
pub use descriptor::{
    ActionError, ActionScope, DescriptorError, DescriptorTable, EntryAction, ExitAction,
    StateConfig, StateTimeout, StayHandler, Transition,
};
pub use event::{EventTypeError, EventTypes, MachineEvent, TimeoutFired, TIMEOUT_EVENT};
pub use id::{IdGen, MachineId, SequentialIdGen, UuidIdGen};
