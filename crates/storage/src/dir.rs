// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Directory-backed context store: one JSON file per machine.
//!
//! Writes are atomic (temp file + rename with fsync) so a crash during
//! save never leaves a corrupt record behind. `exists` and
//! `is_complete` read only the well-known header fields.

use crate::store::{ContextStore, RecordHeader, StoreError};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use xbar_core::{ContextRecord, MachineId};

/// File-per-machine store rooted at a directory.
///
/// Machine ids become file names directly; callers choose path-safe ids
/// (the telephony control plane uses UUID-shaped session ids).
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &MachineId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn read_raw(&self, id: &MachineId) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.record_path(id)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<P: ContextRecord> ContextStore<P> for DirStore {
    async fn save(&self, id: &MachineId, ctx: &P) -> Result<(), StoreError> {
        let path = self.record_path(id);
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_vec(ctx)?;

        // Write to temp file and sync before the atomic rename
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    async fn load(&self, id: &MachineId) -> Result<Option<P>, StoreError> {
        match self.read_raw(id)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(ctx) => Ok(Some(ctx)),
                Err(e) => {
                    warn!(id = %id, error = %e, "corrupt context record");
                    Err(StoreError::Malformed {
                        id: id.clone(),
                        message: e.to_string(),
                    })
                }
            },
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &MachineId) -> Result<bool, StoreError> {
        Ok(self.record_path(id).exists())
    }

    async fn delete(&self, id: &MachineId) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_complete(&self, id: &MachineId) -> Result<bool, StoreError> {
        match self.read_raw(id)? {
            Some(raw) => {
                let header =
                    RecordHeader::parse(&raw).map_err(|e| StoreError::Malformed {
                        id: id.clone(),
                        message: e.to_string(),
                    })?;
                Ok(header.complete)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[path = "dir_tests.rs"]
mod tests;
