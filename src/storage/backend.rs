//! Snapshot store trait definition

use async_trait::async_trait;

use super::error::StorageResult;
use crate::{DeviceId, Snapshot};

/// Keyed store of the latest snapshot per device
///
/// ## Contract
///
/// - `put` unconditionally replaces whatever is stored for the snapshot's id
/// - `get` returns the last snapshot put for that id, or `None`
/// - a reader never observes a partially written snapshot
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; a single instance is shared by the
/// ingestion path and every subscriber connection.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store `snapshot`, overwriting any earlier entry for the same device
    async fn put(&self, snapshot: Snapshot) -> StorageResult<()>;

    /// Latest snapshot for `id`
    async fn get(&self, id: DeviceId) -> StorageResult<Option<Snapshot>>;

    /// Number of devices that have reported at least once
    async fn len(&self) -> StorageResult<usize>;

    /// Ids of all devices that have reported, in ascending order
    async fn device_ids(&self) -> StorageResult<Vec<DeviceId>>;
}
