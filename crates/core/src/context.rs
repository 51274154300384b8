// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Context contracts: what a machine carries.
//!
//! Each machine owns two parcels of data. The *persistent* context is
//! durably stored and rehydratable; the *volatile* context lives in
//! memory only and is rebuilt from the persistent one on rehydration.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// The persistent context contract.
///
/// Callers supply their own record type (call detail fields, SMS dialog
/// state, ...); the runtime only touches the three well-known fields it
/// maintains across transitions. Records must serialize those fields
/// under the fixed names `current_state`, `last_state_change`, and
/// `complete` so persistence providers can read them without knowing
/// the full type.
///
/// `Clone` is required: the engine snapshots the record before each
/// transition so faulted handlers and failed saves roll back cleanly.
pub trait ContextRecord:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn current_state(&self) -> &str;
    fn set_current_state(&mut self, state: &str);

    /// Epoch milliseconds of the last `Go` transition.
    fn last_state_change(&self) -> u64;
    fn set_last_state_change(&mut self, epoch_ms: u64);

    /// Set when the machine enters a final state; complete records are
    /// never rehydrated.
    fn complete(&self) -> bool;
    fn set_complete(&mut self, complete: bool);
}

/// Factory that rebuilds the volatile context from the persistent
/// record, used when a machine is rehydrated from storage.
pub type VolatileInit<P, V> = Arc<dyn Fn(&P) -> V + Send + Sync>;

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
