// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hash-partitioned composite store.
//!
//! Routes each machine id to one of N inner stores by a stable hash of
//! the id bytes, so a deployment can spread records across directories,
//! disks, or database partitions without the engine knowing.

use crate::store::{ContextStore, StoreError};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use xbar_core::{ContextRecord, MachineId};

/// Composite store over a fixed, non-empty set of shards.
///
/// The shard for an id never changes as long as the shard count stays
/// the same; resharding is an offline migration concern.
pub struct HashPartitionedStore<S> {
    shards: Vec<S>,
}

impl<S> HashPartitionedStore<S> {
    /// Build over the given shards. `shards` must be non-empty.
    pub fn new(shards: Vec<S>) -> Self {
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard owning `id`.
    pub fn shard_index(&self, id: &MachineId) -> usize {
        let digest = Sha256::digest(id.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % self.shards.len() as u64) as usize
    }

    fn shard(&self, id: &MachineId) -> &S {
        &self.shards[self.shard_index(id)]
    }
}

#[async_trait]
impl<P, S> ContextStore<P> for HashPartitionedStore<S>
where
    P: ContextRecord,
    S: ContextStore<P>,
{
    async fn save(&self, id: &MachineId, ctx: &P) -> Result<(), StoreError> {
        self.shard(id).save(id, ctx).await
    }

    async fn load(&self, id: &MachineId) -> Result<Option<P>, StoreError> {
        self.shard(id).load(id).await
    }

    async fn exists(&self, id: &MachineId) -> Result<bool, StoreError> {
        self.shard(id).exists(id).await
    }

    async fn delete(&self, id: &MachineId) -> Result<(), StoreError> {
        self.shard(id).delete(id).await
    }

    async fn is_complete(&self, id: &MachineId) -> Result<bool, StoreError> {
        self.shard(id).is_complete(id).await
    }
}

#[cfg(test)]
#[path = "partition_tests.rs"]
mod tests;
