//! Volume duplication planner.
//!
//! Produces the shadow record that represents a volume on its destination
//! pool while a migration is in flight. No host or backend is touched here.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::lifecycle::VolumeState;
use crate::store::VolumeStore;
use crate::types::{StoragePool, Volume, VolumeId};

/// Creates shadow volume records.
pub struct VolumeDuplicationPlanner {
    volumes: Arc<dyn VolumeStore>,
}

impl VolumeDuplicationPlanner {
    pub fn new(volumes: Arc<dyn VolumeStore>) -> Self {
        Self { volumes }
    }

    /// Build the shadow record for `source` without persisting it.
    pub fn plan(source: &Volume, dest_pool: &StoragePool) -> Volume {
        Volume {
            id: VolumeId(0),
            uuid: Uuid::new_v4().to_string(),
            name: source.name.clone(),
            size_bytes: source.size_bytes,
            pool_id: Some(dest_pool.id),
            last_pool_id: source.pool_id,
            pod_id: dest_pool.pod_id,
            instance_id: None,
            device_id: None,
            path: None,
            folder: None,
            format: source.format,
            volume_type: source.volume_type,
            chain_info: None,
            passphrase_id: source.passphrase_id,
            max_iops: source.max_iops,
            state: VolumeState::Allocated,
            migrated_from: Some(source.id),
            created_at: Utc::now(),
        }
    }

    /// Persist a shadow copy of `source` on `dest_pool`.
    ///
    /// Persistence failures propagate unchanged; nothing is retried here.
    #[instrument(skip(self, source, dest_pool), fields(volume_id = %source.id, dest_pool = %dest_pool.id))]
    pub async fn duplicate(&self, source: &Volume, dest_pool: &StoragePool) -> Result<Volume> {
        let shadow = self.volumes.persist(Self::plan(source, dest_pool)).await?;
        info!(shadow_id = %shadow.id, "Shadow volume allocated");
        Ok(shadow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryVolumeStore;
    use crate::types::{
        ConnectionDescriptor, ImageFormat, PoolCapacity, PoolId, PoolType, ProviderId,
        StorageProtocol, VolumeType,
    };
    use std::collections::HashMap;

    fn dest_pool() -> StoragePool {
        StoragePool {
            id: PoolId(2),
            uuid: "pool-2".to_string(),
            name: "ssd".to_string(),
            pool_type: PoolType::SharedBlock,
            provider: ProviderId::new("StorPool"),
            pod_id: Some(4),
            cluster_id: Some(1),
            connection: ConnectionDescriptor {
                address: "10.0.0.20".to_string(),
                port: None,
                protocol: StorageProtocol::NativeBlock,
                credentials_ref: None,
                parameters: HashMap::new(),
            },
            capacity: PoolCapacity::default(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_clears_placement_fields() {
        let store = Arc::new(InMemoryVolumeStore::new());
        let mut source = Volume::new("ROOT-10", 10 << 30, PoolId(1))
            .with_path("/dev/storpool/~src")
            .with_instance("vm-uuid", 0)
            .with_type(VolumeType::Root);
        source.format = ImageFormat::Qcow2;
        source.chain_info = Some("chain".to_string());
        source.folder = Some("/folder".to_string());
        let source = store.persist(source).await.unwrap();

        let planner = VolumeDuplicationPlanner::new(store.clone());
        let shadow = planner.duplicate(&source, &dest_pool()).await.unwrap();

        assert_ne!(shadow.id, source.id);
        assert_ne!(shadow.uuid, source.uuid);
        assert_eq!(shadow.pool_id, Some(PoolId(2)));
        assert_eq!(shadow.pod_id, Some(4));
        assert_eq!(shadow.last_pool_id, Some(PoolId(1)));
        assert_eq!(shadow.migrated_from, Some(source.id));
        assert_eq!(shadow.size_bytes, source.size_bytes);
        assert_eq!(shadow.format, ImageFormat::Qcow2);
        assert_eq!(shadow.volume_type, VolumeType::Root);
        assert_eq!(shadow.state, VolumeState::Allocated);
        assert!(shadow.instance_id.is_none());
        assert!(shadow.device_id.is_none());
        assert!(shadow.path.is_none());
        assert!(shadow.folder.is_none());
        assert!(shadow.chain_info.is_none());

        assert!(store.find_by_id(shadow.id).await.unwrap().is_some());
    }
}
