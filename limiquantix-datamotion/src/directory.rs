//! Storage pool and host directories.
//!
//! Resolve logical identifiers to connection descriptors and host addresses.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{DataMotionError, Result};
use crate::types::{HostId, HostInfo, PoolId, ProviderId, StoragePool};

/// Resolves storage pool identifiers.
#[async_trait]
pub trait StoragePoolDirectory: Send + Sync {
    /// Look up a pool by id.
    async fn find_pool(&self, pool_id: PoolId) -> Result<Option<StoragePool>>;

    /// Look up a pool, failing if it is unknown.
    async fn get_pool(&self, pool_id: PoolId) -> Result<StoragePool> {
        self.find_pool(pool_id)
            .await?
            .ok_or_else(|| DataMotionError::PoolNotFound(pool_id.to_string()))
    }

    /// Provider serving a pool.
    async fn provider_of(&self, pool_id: PoolId) -> Result<ProviderId> {
        Ok(self.get_pool(pool_id).await?.provider)
    }
}

/// Resolves host identifiers.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Look up a host by id.
    async fn find_host(&self, host_id: HostId) -> Result<Option<HostInfo>>;

    /// Look up a host, failing if it is unknown.
    async fn get_host(&self, host_id: HostId) -> Result<HostInfo> {
        self.find_host(host_id)
            .await?
            .ok_or_else(|| DataMotionError::HostNotFound(host_id.to_string()))
    }
}

/// In-memory pool directory.
#[derive(Default)]
pub struct InMemoryPoolDirectory {
    pools: Arc<RwLock<HashMap<PoolId, StoragePool>>>,
}

impl InMemoryPoolDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a pool.
    pub async fn register(&self, pool: StoragePool) {
        let mut pools = self.pools.write().await;
        pools.insert(pool.id, pool);
    }
}

#[async_trait]
impl StoragePoolDirectory for InMemoryPoolDirectory {
    async fn find_pool(&self, pool_id: PoolId) -> Result<Option<StoragePool>> {
        let pools = self.pools.read().await;
        Ok(pools.get(&pool_id).cloned())
    }
}

/// In-memory host directory.
#[derive(Default)]
pub struct InMemoryHostDirectory {
    hosts: Arc<RwLock<HashMap<HostId, HostInfo>>>,
}

impl InMemoryHostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a host.
    pub async fn register(&self, host: HostInfo) {
        let mut hosts = self.hosts.write().await;
        hosts.insert(host.id, host);
    }
}

#[async_trait]
impl HostDirectory for InMemoryHostDirectory {
    async fn find_host(&self, host_id: HostId) -> Result<Option<HostInfo>> {
        let hosts = self.hosts.read().await;
        Ok(hosts.get(&host_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionDescriptor, HypervisorType, PoolCapacity, PoolType, StorageProtocol};

    fn pool(id: u64, provider: &str) -> StoragePool {
        StoragePool {
            id: PoolId(id),
            uuid: format!("pool-{}", id),
            name: format!("pool-{}", id),
            pool_type: PoolType::SharedBlock,
            provider: ProviderId::new(provider),
            pod_id: None,
            cluster_id: None,
            connection: ConnectionDescriptor {
                address: "10.0.0.10".to_string(),
                port: None,
                protocol: StorageProtocol::NativeBlock,
                credentials_ref: None,
                parameters: HashMap::new(),
            },
            capacity: PoolCapacity::default(),
        }
    }

    #[tokio::test]
    async fn test_pool_lookup() {
        let dir = InMemoryPoolDirectory::new();
        dir.register(pool(1, "StorPool")).await;

        assert_eq!(dir.provider_of(PoolId(1)).await.unwrap().as_str(), "StorPool");
        let err = dir.get_pool(PoolId(2)).await.unwrap_err();
        assert!(matches!(err, DataMotionError::PoolNotFound(_)));
    }

    #[tokio::test]
    async fn test_host_lookup() {
        let dir = InMemoryHostDirectory::new();
        dir.register(HostInfo {
            id: HostId(3),
            name: "kvm-3".to_string(),
            private_address: "10.0.1.3".to_string(),
            hypervisor: HypervisorType::Kvm,
            cluster_id: Some(1),
        })
        .await;

        assert_eq!(dir.get_host(HostId(3)).await.unwrap().name, "kvm-3");
        assert!(dir.get_host(HostId(4)).await.is_err());
    }
}
