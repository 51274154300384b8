// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistence contract the engine dispatches through.
//!
//! Deliberately narrow: five operations over opaque serialized records.
//! Same-id call ordering is guaranteed upstream by per-machine
//! serialization; providers only need to be safe for concurrent use
//! across different ids.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use xbar_core::{ContextRecord, MachineId};

/// Errors from persistence providers
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record for '{id}' is malformed: {message}")]
    Malformed { id: MachineId, message: String },
}

/// The well-known header every persisted record carries, readable
/// without knowing the caller's full context type.
///
/// Loaders refuse to rehydrate records with `complete = true`; the
/// engine relies on `current_state` to resume dispatch where the
/// machine left off.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordHeader {
    pub current_state: String,
    #[serde(default)]
    pub last_state_change: u64,
    #[serde(default)]
    pub complete: bool,
}

impl RecordHeader {
    /// Parse the header fields out of a serialized record, ignoring
    /// everything else.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Key-value persistence over machine contexts.
///
/// `save` may flush synchronously or batch internally, but successive
/// saves for the same id must become durable in call order.
/// `is_complete` and `exists` return `false` for absent records.
#[async_trait]
pub trait ContextStore<P: ContextRecord>: Send + Sync {
    async fn save(&self, id: &MachineId, ctx: &P) -> Result<(), StoreError>;

    async fn load(&self, id: &MachineId) -> Result<Option<P>, StoreError>;

    async fn exists(&self, id: &MachineId) -> Result<bool, StoreError>;

    async fn delete(&self, id: &MachineId) -> Result<(), StoreError>;

    async fn is_complete(&self, id: &MachineId) -> Result<bool, StoreError>;
}

// Stores are commonly shared between a registry and its embedding
// process; delegate through Arc so both can hold the same provider.
#[async_trait]
impl<P, T> ContextStore<P> for std::sync::Arc<T>
where
    P: ContextRecord,
    T: ContextStore<P> + ?Sized,
{
    async fn save(&self, id: &MachineId, ctx: &P) -> Result<(), StoreError> {
        self.as_ref().save(id, ctx).await
    }

    async fn load(&self, id: &MachineId) -> Result<Option<P>, StoreError> {
        self.as_ref().load(id).await
    }

    async fn exists(&self, id: &MachineId) -> Result<bool, StoreError> {
        self.as_ref().exists(id).await
    }

    async fn delete(&self, id: &MachineId) -> Result<(), StoreError> {
        self.as_ref().delete(id).await
    }

    async fn is_complete(&self, id: &MachineId) -> Result<bool, StoreError> {
        self.as_ref().is_complete(id).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
