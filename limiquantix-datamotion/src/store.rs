//! Volume and snapshot record stores.
//!
//! The relational schema behind these traits lives outside this crate;
//! the in-memory implementations back tests and development setups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{DataMotionError, Result};
use crate::lifecycle::VolumeEvent;
use crate::types::{Snapshot, SnapshotId, Volume, VolumeId};

/// Persisted volume metadata.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Look up a volume by internal id.
    async fn find_by_id(&self, id: VolumeId) -> Result<Option<Volume>>;

    /// Look up a volume by its stable external identity.
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Volume>>;

    /// Insert a new record; the store assigns the id.
    async fn persist(&self, volume: Volume) -> Result<Volume>;

    /// Overwrite an existing record.
    async fn update(&self, volume: &Volume) -> Result<()>;

    /// Exchange the external identities of two records.
    ///
    /// After the call `dest_id` carries the uuid `src_id` had, and vice versa.
    async fn update_uuid(&self, src_id: VolumeId, dest_id: VolumeId) -> Result<()>;

    /// Remove a record.
    async fn remove(&self, id: VolumeId) -> Result<()>;

    /// Apply a lifecycle event to a stored volume and persist the new state.
    async fn process_event(&self, id: VolumeId, event: VolumeEvent) -> Result<Volume> {
        let mut volume = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| DataMotionError::VolumeNotFound(id.to_string()))?;

        let next = volume.state.on_event(event)?;
        debug!(volume_id = %id, from = %volume.state, to = %next, event = %event, "Volume state transition");
        volume.state = next;
        self.update(&volume).await?;

        Ok(volume)
    }
}

/// Persisted snapshot metadata.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert a new record; the store assigns the id.
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot>;

    /// Look up a snapshot by id.
    async fn find_by_id(&self, id: SnapshotId) -> Result<Option<Snapshot>>;

    /// All snapshots taken from a volume.
    async fn list_by_volume_id(&self, volume_id: VolumeId) -> Result<Vec<Snapshot>>;

    /// Re-point every snapshot of `old_id` to `new_id`. Returns the number moved.
    async fn update_volume_ids(&self, old_id: VolumeId, new_id: VolumeId) -> Result<usize>;
}

/// In-memory volume store.
#[derive(Default)]
pub struct InMemoryVolumeStore {
    volumes: Arc<RwLock<HashMap<VolumeId, Volume>>>,
    next_id: AtomicU64,
}

impl InMemoryVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records, ordered by id.
    pub async fn list(&self) -> Vec<Volume> {
        let volumes = self.volumes.read().await;
        let mut all: Vec<Volume> = volumes.values().cloned().collect();
        all.sort_by_key(|v| v.id);
        all
    }
}

#[async_trait]
impl VolumeStore for InMemoryVolumeStore {
    async fn find_by_id(&self, id: VolumeId) -> Result<Option<Volume>> {
        let volumes = self.volumes.read().await;
        Ok(volumes.get(&id).cloned())
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<Volume>> {
        let volumes = self.volumes.read().await;
        Ok(volumes.values().find(|v| v.uuid == uuid).cloned())
    }

    async fn persist(&self, mut volume: Volume) -> Result<Volume> {
        volume.id = VolumeId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        let mut volumes = self.volumes.write().await;
        if volumes.values().any(|v| v.uuid == volume.uuid) {
            return Err(DataMotionError::Persistence(format!(
                "Duplicate volume uuid {}",
                volume.uuid
            )));
        }
        volumes.insert(volume.id, volume.clone());

        Ok(volume)
    }

    async fn update(&self, volume: &Volume) -> Result<()> {
        let mut volumes = self.volumes.write().await;
        let slot = volumes
            .get_mut(&volume.id)
            .ok_or_else(|| DataMotionError::VolumeNotFound(volume.id.to_string()))?;
        *slot = volume.clone();
        Ok(())
    }

    async fn update_uuid(&self, src_id: VolumeId, dest_id: VolumeId) -> Result<()> {
        let mut volumes = self.volumes.write().await;

        let src_uuid = volumes
            .get(&src_id)
            .map(|v| v.uuid.clone())
            .ok_or_else(|| DataMotionError::VolumeNotFound(src_id.to_string()))?;
        let dest_uuid = volumes
            .get(&dest_id)
            .map(|v| v.uuid.clone())
            .ok_or_else(|| DataMotionError::VolumeNotFound(dest_id.to_string()))?;

        if let Some(src) = volumes.get_mut(&src_id) {
            src.uuid = dest_uuid;
        }
        if let Some(dest) = volumes.get_mut(&dest_id) {
            dest.uuid = src_uuid;
        }

        Ok(())
    }

    async fn remove(&self, id: VolumeId) -> Result<()> {
        let mut volumes = self.volumes.write().await;
        volumes
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DataMotionError::VolumeNotFound(id.to_string()))
    }
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<SnapshotId, Snapshot>>>,
    next_id: AtomicU64,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn persist(&self, mut snapshot: Snapshot) -> Result<Snapshot> {
        snapshot.id = SnapshotId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);

        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.id, snapshot.clone());

        Ok(snapshot)
    }

    async fn find_by_id(&self, id: SnapshotId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&id).cloned())
    }

    async fn list_by_volume_id(&self, volume_id: VolumeId) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        let mut found: Vec<Snapshot> = snapshots
            .values()
            .filter(|s| s.volume_id == volume_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }

    async fn update_volume_ids(&self, old_id: VolumeId, new_id: VolumeId) -> Result<usize> {
        let mut snapshots = self.snapshots.write().await;
        let mut moved = 0;
        for snapshot in snapshots.values_mut().filter(|s| s.volume_id == old_id) {
            snapshot.volume_id = new_id;
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::VolumeState;
    use crate::types::PoolId;

    #[tokio::test]
    async fn test_persist_assigns_ids() {
        let store = InMemoryVolumeStore::new();
        let a = store.persist(Volume::new("a", 1024, PoolId(1))).await.unwrap();
        let b = store.persist(Volume::new("b", 1024, PoolId(1))).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.find_by_id(a.id).await.unwrap().unwrap().name, "a");
        assert_eq!(store.find_by_uuid(&b.uuid).await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn test_update_uuid_swaps_identity() {
        let store = InMemoryVolumeStore::new();
        let src = store.persist(Volume::new("src", 1024, PoolId(1))).await.unwrap();
        let dest = store.persist(Volume::new("dest", 1024, PoolId(2))).await.unwrap();

        store.update_uuid(src.id, dest.id).await.unwrap();

        let promoted = store.find_by_uuid(&src.uuid).await.unwrap().unwrap();
        assert_eq!(promoted.id, dest.id);
        assert_eq!(promoted.pool_id, Some(PoolId(2)));

        let retired = store.find_by_id(src.id).await.unwrap().unwrap();
        assert_eq!(retired.uuid, dest.uuid);
    }

    #[tokio::test]
    async fn test_process_event_persists_state() {
        let store = InMemoryVolumeStore::new();
        let vol = store.persist(Volume::new("vol", 1024, PoolId(1))).await.unwrap();

        let vol = store
            .process_event(vol.id, VolumeEvent::MigrationRequested)
            .await
            .unwrap();
        assert_eq!(vol.state, VolumeState::Migrating);
        assert_eq!(
            store.find_by_id(vol.id).await.unwrap().unwrap().state,
            VolumeState::Migrating
        );

        let err = store
            .process_event(vol.id, VolumeEvent::MigrationRequested)
            .await
            .unwrap_err();
        assert!(matches!(err, DataMotionError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_remove_missing_volume() {
        let store = InMemoryVolumeStore::new();
        assert!(store.remove(VolumeId(42)).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_relink() {
        let store = InMemorySnapshotStore::new();
        store.persist(Snapshot::new("s1", VolumeId(1))).await.unwrap();
        store.persist(Snapshot::new("s2", VolumeId(1))).await.unwrap();
        store.persist(Snapshot::new("s3", VolumeId(2))).await.unwrap();

        let moved = store.update_volume_ids(VolumeId(1), VolumeId(7)).await.unwrap();
        assert_eq!(moved, 2);
        assert!(store.list_by_volume_id(VolumeId(1)).await.unwrap().is_empty());
        assert_eq!(store.list_by_volume_id(VolumeId(7)).await.unwrap().len(), 2);
        assert_eq!(store.list_by_volume_id(VolumeId(2)).await.unwrap().len(), 1);
    }
}
