// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures: a call-flavored persistent record, a scratch
//! volatile context, and the event types the fixtures dispatch on.
//!
//! Only compiled for tests (or with the `test-support` feature).

use crate::context::ContextRecord;
use crate::event::EventTypes;
use serde::{Deserialize, Serialize};

/// Minimal persistent record used across engine and spec tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub current_state: String,
    pub last_state_change: u64,
    pub complete: bool,
    /// Incremented by stay handlers in ring tests.
    #[serde(default)]
    pub ring_count: u32,
    /// Free-form trace of handler invocations.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl TestRecord {
    pub fn new(initial: &str) -> Self {
        Self {
            current_state: initial.to_string(),
            last_state_change: 0,
            complete: false,
            ring_count: 0,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, entry: impl Into<String>) {
        self.notes.push(entry.into());
    }
}

impl ContextRecord for TestRecord {
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

/// Volatile scratch context rebuilt from the persistent record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestScratch {
    pub rebuilt_from: String,
    pub touches: u32,
}

// Call lifecycle events shared by tests.

#[derive(Debug, Clone, Copy)]
pub struct IncomingCall;

#[derive(Debug, Clone, Copy)]
pub struct Answer;

#[derive(Debug, Clone)]
pub struct Hangup {
    pub reason: String,
}

impl Hangup {
    pub fn normal() -> Self {
        Self {
            reason: "normal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionProgress;

/// Register the call events in the process-wide registry. Idempotent,
/// so any number of tests may call it.
pub fn register_call_events() {
    let events = EventTypes::global();
    for result in [
        events.register::<IncomingCall>("INCOMING_CALL"),
        events.register::<Answer>("ANSWER"),
        events.register::<Hangup>("HANGUP"),
        events.register::<SessionProgress>("SESSION_PROGRESS"),
    ] {
        #[allow(clippy::expect_used)]
        result.expect("call event registration conflicts");
    }
}
