//! Target connectivity manager.
//!
//! Makes pool volumes visible (or invisible) on hosts by sending a single
//! batched `ModifyTargets` command per host. Connections made through the
//! manager are remembered so repeated connects return the same device path
//! without touching the host again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::agent::{
    send_with_timeout, AgentChannel, AgentCommand, AnswerPayload, ModifyTargetsCommand,
    TargetDescriptor, TargetOperation, TargetTypeToRemove,
};
use crate::config::MigrationConfig;
use crate::error::{DataMotionError, Result};
use crate::types::{HostId, StoragePool};

/// Attaches and detaches storage targets on hosts.
pub struct TargetConnectivityManager {
    agents: Arc<dyn AgentChannel>,
    timeout: Duration,
    apply_to_all_hosts_in_cluster: bool,
    target_type_to_remove: TargetTypeToRemove,
    /// (host, target) -> host-local device path
    connected: RwLock<HashMap<(HostId, TargetDescriptor), String>>,
}

impl TargetConnectivityManager {
    pub fn new(agents: Arc<dyn AgentChannel>, config: &MigrationConfig) -> Self {
        Self {
            agents,
            timeout: config.command_timeout(),
            apply_to_all_hosts_in_cluster: config.apply_targets_cluster_wide,
            target_type_to_remove: config.remove_targets,
            connected: RwLock::new(HashMap::new()),
        }
    }

    /// Describe the target for `handle` on `pool`.
    pub fn target_for(pool: &StoragePool, handle: &str) -> TargetDescriptor {
        TargetDescriptor {
            pool_uuid: pool.uuid.clone(),
            address: pool.connection.address.clone(),
            port: pool.connection.port,
            protocol: pool.connection.protocol,
            handle: handle.to_string(),
            credentials_ref: pool.connection.credentials_ref.clone(),
        }
    }

    /// Connect `host` to a single target and return its device path.
    pub async fn connect(&self, host: HostId, pool: &StoragePool, handle: &str) -> Result<String> {
        let mut paths = self.connect_all(host, &[(pool, handle)]).await?;
        paths
            .pop()
            .ok_or_else(|| DataMotionError::Connectivity("no device path returned".into()))
    }

    /// Connect `host` to several targets with one command.
    ///
    /// Returns device paths in the order of `targets`. Targets already
    /// connected through this manager are not sent again. The cache stays
    /// locked until the host answers, so concurrent callers asking for the
    /// same target send a single add.
    #[instrument(skip(self, targets), fields(host_id = %host, count = targets.len()))]
    pub async fn connect_all(&self, host: HostId, targets: &[(&StoragePool, &str)]) -> Result<Vec<String>> {
        let descriptors: Vec<TargetDescriptor> = targets
            .iter()
            .map(|(pool, handle)| Self::target_for(pool, handle))
            .collect();

        let mut connected = self.connected.write().await;
        let pending: Vec<TargetDescriptor> = descriptors
            .iter()
            .filter(|d| !connected.contains_key(&(host, (*d).clone())))
            .cloned()
            .collect();

        if !pending.is_empty() {
            let command = AgentCommand::ModifyTargets(ModifyTargetsCommand {
                operation: TargetOperation::Add,
                targets: pending.clone(),
                apply_to_all_hosts_in_cluster: self.apply_to_all_hosts_in_cluster,
                target_type_to_remove: self.target_type_to_remove,
            });

            let answer = send_with_timeout(self.agents.as_ref(), host, command, self.timeout).await?;
            if !answer.result {
                return Err(DataMotionError::Connectivity(format!(
                    "failed to add targets on host {}: {}",
                    host, answer.details
                )));
            }

            let paths = match answer.payload {
                AnswerPayload::ConnectedPaths { paths } if paths.len() == pending.len() => paths,
                AnswerPayload::ConnectedPaths { paths } => {
                    return Err(DataMotionError::Connectivity(format!(
                        "host {} returned {} device paths for {} targets",
                        host,
                        paths.len(),
                        pending.len()
                    )))
                }
                AnswerPayload::None => {
                    return Err(DataMotionError::Connectivity(format!(
                        "host {} returned no device paths",
                        host
                    )))
                }
            };

            for (descriptor, path) in pending.into_iter().zip(paths) {
                info!(handle = %descriptor.handle, device = %path, "Target connected");
                connected.insert((host, descriptor), path);
            }
        }

        descriptors
            .into_iter()
            .map(|d| {
                connected.get(&(host, d.clone())).cloned().ok_or_else(|| {
                    DataMotionError::Connectivity(format!("target {} not connected", d.handle))
                })
            })
            .collect()
    }

    /// Disconnect `host` from a single target.
    pub async fn disconnect(&self, host: HostId, pool: &StoragePool, handle: &str) -> Result<()> {
        self.disconnect_all(host, &[(pool, handle)]).await
    }

    /// Disconnect `host` from several targets with one command.
    ///
    /// Failures are returned; whether they matter is the caller's call.
    #[instrument(skip(self, targets), fields(host_id = %host, count = targets.len()))]
    pub async fn disconnect_all(&self, host: HostId, targets: &[(&StoragePool, &str)]) -> Result<()> {
        let descriptors: Vec<TargetDescriptor> = targets
            .iter()
            .map(|(pool, handle)| Self::target_for(pool, handle))
            .collect();

        let command = AgentCommand::ModifyTargets(ModifyTargetsCommand {
            operation: TargetOperation::Remove,
            targets: descriptors.clone(),
            apply_to_all_hosts_in_cluster: self.apply_to_all_hosts_in_cluster,
            target_type_to_remove: self.target_type_to_remove,
        });

        let answer = send_with_timeout(self.agents.as_ref(), host, command, self.timeout).await?;
        if !answer.result {
            return Err(DataMotionError::Connectivity(format!(
                "failed to remove targets on host {}: {}",
                host, answer.details
            )));
        }

        let mut connected = self.connected.write().await;
        for descriptor in descriptors {
            debug!(handle = %descriptor.handle, "Target disconnected");
            connected.remove(&(host, descriptor));
        }

        Ok(())
    }

    /// Device path of a target connected through this manager.
    pub async fn device_path(&self, host: HostId, pool: &StoragePool, handle: &str) -> Option<String> {
        let connected = self.connected.read().await;
        connected.get(&(host, Self::target_for(pool, handle))).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Answer;
    use crate::mock::{MockAgentChannel, sample_pool};

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let agents = Arc::new(MockAgentChannel::new());
        let manager = TargetConnectivityManager::new(agents.clone(), &MigrationConfig::default());
        let pool = sample_pool(2, "StorPool");

        let first = manager.connect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap();
        let second = manager.connect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(agents.commands_named("modify_targets").await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_all_batches_one_command() {
        let agents = Arc::new(MockAgentChannel::new());
        let manager = TargetConnectivityManager::new(agents.clone(), &MigrationConfig::default());
        let pool = sample_pool(2, "StorPool");

        let paths = manager
            .connect_all(HostId(2), &[(&pool, "/dev/storpool/~a"), (&pool, "/dev/storpool/~b")])
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
        assert_eq!(agents.commands_named("modify_targets").await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_send_one_add() {
        let agents = Arc::new(MockAgentChannel::new());
        let manager = TargetConnectivityManager::new(agents.clone(), &MigrationConfig::default());
        let pool = sample_pool(2, "StorPool");

        let (first, second) = tokio::join!(
            manager.connect(HostId(2), &pool, "/dev/storpool/~abc"),
            manager.connect(HostId(2), &pool, "/dev/storpool/~abc"),
        );

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(agents.commands_named("modify_targets").await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_forgets_target() {
        let agents = Arc::new(MockAgentChannel::new());
        let manager = TargetConnectivityManager::new(agents.clone(), &MigrationConfig::default());
        let pool = sample_pool(2, "StorPool");

        manager.connect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap();
        manager.disconnect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap();
        assert!(manager.device_path(HostId(2), &pool, "/dev/storpool/~abc").await.is_none());

        manager.connect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap();
        assert_eq!(agents.commands_named("modify_targets").await.len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let agents = Arc::new(MockAgentChannel::new());
        agents
            .script("modify_targets", Ok(Answer::failure("client not running")))
            .await;
        let manager = TargetConnectivityManager::new(agents.clone(), &MigrationConfig::default());
        let pool = sample_pool(2, "StorPool");

        let err = manager.connect(HostId(2), &pool, "/dev/storpool/~abc").await.unwrap_err();
        assert!(matches!(err, DataMotionError::Connectivity(_)));
    }
}
