//! Mock collaborators for testing and development.
//!
//! These simulate host agents and a storage control plane in memory,
//! recording every call so tests can assert on ordering and cleanup.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::agent::{AgentChannel, AgentCommand, Answer, TargetOperation};
use crate::backend::{BackendVolume, BackendVolumeSpec, StorageControlPlane};
use crate::error::{ChannelError, DataMotionError, Result};
use crate::types::{
    ConnectionDescriptor, HostId, HostInfo, HypervisorType, PoolCapacity, PoolId, PoolType,
    ProviderId, StoragePool, StorageProtocol,
};

/// Scripted reply for a command name.
#[derive(Debug, Clone)]
enum MockReply {
    Reply(std::result::Result<Answer, ChannelError>),
    /// Never answer; the caller's timeout decides
    Hang,
}

/// Mock agent channel.
///
/// Answers every command successfully unless a reply was scripted for
/// its name (see [`AgentCommand::name`]). `modify_targets` adds answer
/// with one device path per target, derived from host and handle.
#[derive(Default)]
pub struct MockAgentChannel {
    calls: RwLock<Vec<(HostId, AgentCommand)>>,
    replies: RwLock<HashMap<String, MockReply>>,
    unavailable_hosts: RwLock<HashSet<HostId>>,
}

impl MockAgentChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to every command named `name` with `reply`.
    pub async fn script(&self, name: &str, reply: std::result::Result<Answer, ChannelError>) {
        let mut replies = self.replies.write().await;
        replies.insert(name.to_string(), MockReply::Reply(reply));
    }

    /// Never answer commands named `name`.
    pub async fn hang_on(&self, name: &str) {
        let mut replies = self.replies.write().await;
        replies.insert(name.to_string(), MockReply::Hang);
    }

    /// Fail every command to `host` with [`ChannelError::AgentUnavailable`].
    pub async fn make_unavailable(&self, host: HostId) {
        let mut hosts = self.unavailable_hosts.write().await;
        hosts.insert(host);
    }

    /// Every command sent so far, in order.
    pub async fn calls(&self) -> Vec<(HostId, AgentCommand)> {
        self.calls.read().await.clone()
    }

    /// Commands with the given name, in order.
    pub async fn commands_named(&self, name: &str) -> Vec<(HostId, AgentCommand)> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|(_, cmd)| cmd.name() == name)
            .cloned()
            .collect()
    }

    /// Device path the mock reports for a handle on a host.
    pub fn device_path_for(host: HostId, handle: &str) -> String {
        let leaf = handle.rsplit('/').next().unwrap_or(handle);
        format!("/dev/mock/host-{}/{}", host, leaf)
    }

    fn default_answer(host: HostId, command: &AgentCommand) -> Answer {
        match command {
            AgentCommand::ModifyTargets(cmd) if cmd.operation == TargetOperation::Add => {
                Answer::connected(
                    cmd.targets
                        .iter()
                        .map(|t| Self::device_path_for(host, &t.handle))
                        .collect(),
                )
            }
            _ => Answer::success(),
        }
    }
}

#[async_trait]
impl AgentChannel for MockAgentChannel {
    async fn send(&self, host_id: HostId, command: AgentCommand) -> std::result::Result<Answer, ChannelError> {
        debug!(host_id = %host_id, command = command.name(), "Mock agent received command");

        {
            let mut calls = self.calls.write().await;
            calls.push((host_id, command.clone()));
        }

        if self.unavailable_hosts.read().await.contains(&host_id) {
            return Err(ChannelError::AgentUnavailable(host_id.to_string()));
        }

        let reply = {
            let replies = self.replies.read().await;
            replies.get(command.name()).cloned()
        };

        match reply {
            Some(MockReply::Reply(reply)) => reply,
            Some(MockReply::Hang) => {
                // Far beyond any configured timeout
                tokio::time::sleep(Duration::from_secs(30 * 24 * 3600)).await;
                Err(ChannelError::OperationTimedOut(host_id.to_string(), 0))
            }
            None => Ok(Self::default_answer(host_id, &command)),
        }
    }
}

/// Mock storage control plane.
///
/// Volume objects are kept per pool; created objects get a generated
/// global id and a `/dev/storpool-byid/<id>` path.
#[derive(Default)]
pub struct MockStorageControlPlane {
    objects: RwLock<HashMap<(PoolId, String), BackendVolume>>,
    created: RwLock<Vec<BackendVolumeSpec>>,
    deleted: RwLock<Vec<(PoolId, String)>>,
    revoked: RwLock<Vec<(PoolId, String, HostId)>>,
    fail_create: RwLock<HashSet<String>>,
    fail_delete: RwLock<bool>,
    seq: AtomicU64,
}

impl MockStorageControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object, e.g. the backing storage of an existing volume.
    pub async fn insert_object(&self, pool_id: PoolId, name: &str, path: &str) {
        let mut objects = self.objects.write().await;
        objects.insert(
            (pool_id, name.to_string()),
            BackendVolume {
                name: name.to_string(),
                path: path.to_string(),
            },
        );
    }

    /// Fail creation of objects requested under `name`.
    pub async fn fail_create_for(&self, name: &str) {
        let mut fail = self.fail_create.write().await;
        fail.insert(name.to_string());
    }

    /// Fail every delete call.
    pub async fn fail_deletes(&self) {
        *self.fail_delete.write().await = true;
    }

    pub async fn created(&self) -> Vec<BackendVolumeSpec> {
        self.created.read().await.clone()
    }

    pub async fn deleted(&self) -> Vec<(PoolId, String)> {
        self.deleted.read().await.clone()
    }

    pub async fn revoked(&self) -> Vec<(PoolId, String, HostId)> {
        self.revoked.read().await.clone()
    }

    pub async fn exists(&self, pool_id: PoolId, name: &str) -> bool {
        self.objects.read().await.contains_key(&(pool_id, name.to_string()))
    }
}

#[async_trait]
impl StorageControlPlane for MockStorageControlPlane {
    async fn create_volume(&self, pool: &StoragePool, spec: &BackendVolumeSpec) -> Result<BackendVolume> {
        {
            let mut created = self.created.write().await;
            created.push(spec.clone());
        }

        if self.fail_create.read().await.contains(&spec.name) {
            return Err(DataMotionError::Backend(format!(
                "VolumeCreate {} failed: insufficient placement group capacity",
                spec.name
            )));
        }

        let global_id = format!("{}.{}", pool.id, self.seq.fetch_add(1, Ordering::SeqCst) + 1);
        let volume = BackendVolume {
            name: global_id.clone(),
            path: format!("/dev/storpool-byid/{}", global_id),
        };

        let mut objects = self.objects.write().await;
        objects.insert((pool.id, volume.name.clone()), volume.clone());
        info!(pool_id = %pool.id, name = %volume.name, "Mock backend volume created");

        Ok(volume)
    }

    async fn delete_volume(&self, pool: &StoragePool, name: &str) -> Result<()> {
        {
            let mut deleted = self.deleted.write().await;
            deleted.push((pool.id, name.to_string()));
        }

        if *self.fail_delete.read().await {
            return Err(DataMotionError::Backend(format!("VolumeDelete {} failed", name)));
        }

        let mut objects = self.objects.write().await;
        objects
            .remove(&(pool.id, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| DataMotionError::Backend(format!("volume {} does not exist", name)))
    }

    async fn revoke_access(&self, pool: &StoragePool, name: &str, host: &HostInfo) -> Result<()> {
        let mut revoked = self.revoked.write().await;
        revoked.push((pool.id, name.to_string(), host.id));
        Ok(())
    }
}

/// A block storage pool served by `provider`.
pub fn sample_pool(id: u64, provider: &str) -> StoragePool {
    StoragePool {
        id: PoolId(id),
        uuid: format!("pool-{}", id),
        name: format!("{}-pool-{}", provider.to_lowercase(), id),
        pool_type: PoolType::SharedBlock,
        provider: ProviderId::new(provider),
        pod_id: Some(1),
        cluster_id: Some(1),
        connection: ConnectionDescriptor {
            address: format!("10.0.0.{}", id),
            port: Some(81),
            protocol: StorageProtocol::NativeBlock,
            credentials_ref: None,
            parameters: HashMap::new(),
        },
        capacity: PoolCapacity {
            total_bytes: 10 << 40,
            used_bytes: 0,
        },
    }
}

/// A KVM host.
pub fn sample_host(id: u64) -> HostInfo {
    HostInfo {
        id: HostId(id),
        name: format!("kvm-{}", id),
        private_address: format!("10.1.0.{}", id),
        hypervisor: HypervisorType::Kvm,
        cluster_id: Some(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::PrepareForMigrationCommand;
    use crate::types::VmDescriptor;

    #[tokio::test]
    async fn test_mock_agent_records_calls() {
        let agents = MockAgentChannel::new();
        let cmd = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
            vm: VmDescriptor::new("i-2-10-VM", HypervisorType::Kvm),
            rollback: false,
        });

        let answer = agents.send(HostId(2), cmd).await.unwrap();
        assert!(answer.result);
        assert_eq!(agents.commands_named("prepare_for_migration").await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_agent_unavailable_host() {
        let agents = MockAgentChannel::new();
        agents.make_unavailable(HostId(1)).await;
        let cmd = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
            vm: VmDescriptor::new("i-2-10-VM", HypervisorType::Kvm),
            rollback: false,
        });

        let err = agents.send(HostId(1), cmd).await.unwrap_err();
        assert_eq!(err, ChannelError::AgentUnavailable("1".to_string()));
    }

    #[tokio::test]
    async fn test_mock_backend_create_delete() {
        let backend = MockStorageControlPlane::new();
        let pool = sample_pool(2, "StorPool");
        let spec = BackendVolumeSpec {
            name: "vol-uuid".to_string(),
            parent_name: None,
            size_bytes: 1 << 30,
            tag: "cs".to_string(),
            owner: "vm-uuid".to_string(),
            purpose: "volume".to_string(),
            iops_limit: None,
        };

        let created = backend.create_volume(&pool, &spec).await.unwrap();
        assert!(created.path.ends_with(&created.name));
        assert!(backend.exists(pool.id, &created.name).await);

        backend.delete_volume(&pool, &created.name).await.unwrap();
        assert!(!backend.exists(pool.id, &created.name).await);
        assert!(backend.delete_volume(&pool, &created.name).await.is_err());
    }
}
