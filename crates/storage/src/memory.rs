// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory providers: the test/deployment store and the no-op variant.

use crate::store::{ContextStore, RecordHeader, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use xbar_core::{ContextRecord, MachineId};

/// Context store backed by a process-local map of serialized records.
///
/// Records go through serde even in memory so the store exercises the
/// same well-known-field layout as durable providers.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<MachineId, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (complete ones included).
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Raw serialized record, for assertions on the persisted layout.
    pub fn raw(&self, id: &MachineId) -> Option<String> {
        self.records.read().get(id).cloned()
    }
}

#[async_trait]
impl<P: ContextRecord> ContextStore<P> for MemoryStore {
    async fn save(&self, id: &MachineId, ctx: &P) -> Result<(), StoreError> {
        let json = serde_json::to_string(ctx)?;
        self.records.write().insert(id.clone(), json);
        Ok(())
    }

    async fn load(&self, id: &MachineId) -> Result<Option<P>, StoreError> {
        match self.records.read().get(id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &MachineId) -> Result<bool, StoreError> {
        Ok(self.records.read().contains_key(id))
    }

    async fn delete(&self, id: &MachineId) -> Result<(), StoreError> {
        self.records.write().remove(id);
        Ok(())
    }

    async fn is_complete(&self, id: &MachineId) -> Result<bool, StoreError> {
        match self.records.read().get(id) {
            Some(raw) => {
                let header =
                    RecordHeader::parse(raw).map_err(|e| StoreError::Malformed {
                        id: id.clone(),
                        message: e.to_string(),
                    })?;
                Ok(header.complete)
            }
            None => Ok(false),
        }
    }
}

/// The `None` persistence variant: saves are dropped, loads find
/// nothing. Rehydration is implicitly disabled for registries built
/// over this store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<P: ContextRecord> ContextStore<P> for NullStore {
    async fn save(&self, _id: &MachineId, _ctx: &P) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self, _id: &MachineId) -> Result<Option<P>, StoreError> {
        Ok(None)
    }

    async fn exists(&self, _id: &MachineId) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn delete(&self, _id: &MachineId) -> Result<(), StoreError> {
        Ok(())
    }

    async fn is_complete(&self, _id: &MachineId) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
