//! In-memory snapshot store
//!
//! A single `HashMap` behind a `tokio::sync::RwLock`. The lock is fair: a
//! queued writer is served before readers that arrive after it, so neither
//! side can starve the other. Critical sections only clone or move one
//! record, so `get` never waits longer than a single write takes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::backend::SnapshotStore;
use super::error::StorageResult;
use crate::{DeviceId, Snapshot};

/// In-memory store, one entry per device, no eviction
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<DeviceId, Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn put(&self, snapshot: Snapshot) -> StorageResult<()> {
        let id = snapshot.id;
        self.snapshots.write().await.insert(id, snapshot);
        trace!("stored snapshot for device {id}");
        Ok(())
    }

    async fn get(&self, id: DeviceId) -> StorageResult<Option<Snapshot>> {
        Ok(self.snapshots.read().await.get(&id).cloned())
    }

    async fn len(&self) -> StorageResult<usize> {
        Ok(self.snapshots.read().await.len())
    }

    async fn device_ids(&self) -> StorageResult<Vec<DeviceId>> {
        let mut ids: Vec<DeviceId> = self.snapshots.read().await.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
