//! Agent command and answer types.
//!
//! The wire encoding belongs to the agent transport; these are the typed
//! shapes the data-motion layer builds and interprets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{HostId, StorageProtocol, VmDescriptor};

/// A command addressed to a host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Prepare the destination host to receive a VM (or undo that preparation)
    PrepareForMigration(PrepareForMigrationCommand),
    /// Live-migrate a VM together with its storage
    Migrate(MigrateCommand),
    /// Attach or detach storage targets on a host
    ModifyTargets(ModifyTargetsCommand),
}

impl AgentCommand {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrepareForMigration(cmd) if cmd.rollback => "prepare_for_migration_rollback",
            Self::PrepareForMigration(_) => "prepare_for_migration",
            Self::Migrate(_) => "migrate",
            Self::ModifyTargets(_) => "modify_targets",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareForMigrationCommand {
    pub vm: VmDescriptor,
    /// Undo a previous preparation instead of performing one
    pub rollback: bool,
}

/// How the hypervisor sees a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Block,
    File,
    Network,
}

/// Disk driver format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    Raw,
    Qcow2,
}

/// Disk source element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSource {
    Dev,
    File,
}

/// Destination description for one migrating disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateDiskInfo {
    /// Disk serial, the volume's stable uuid
    pub serial: String,
    pub disk_type: DiskType,
    pub driver_type: DriverType,
    pub source: DiskSource,
    /// Device path on the destination host
    pub source_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrateCommand {
    pub vm: VmDescriptor,
    pub dest_host: HostId,
    /// Address the source hypervisor streams to
    pub dest_address: String,
    /// Source disk path -> destination disk
    pub migrate_storage: BTreeMap<String, MigrateDiskInfo>,
    /// Destination disks are managed (pre-created) rather than copied into files
    pub migrate_storage_managed: bool,
    pub auto_convergence: bool,
    pub max_downtime_ms: u64,
    /// 0 = unlimited
    pub migrate_speed_mbps: u64,
    /// Seconds the agent may spend before aborting the migration
    pub wait_secs: u64,
}

/// Add or remove targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOperation {
    Add,
    Remove,
}

/// Which kinds of targets a remove operation may prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetTypeToRemove {
    Both,
    Static,
    Dynamic,
}

impl Default for TargetTypeToRemove {
    fn default() -> Self {
        Self::Dynamic
    }
}

/// A host-visible storage target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub pool_uuid: String,
    pub address: String,
    pub port: Option<u16>,
    pub protocol: StorageProtocol,
    /// Protocol-specific handle: IQN, volume name or path
    pub handle: String,
    pub credentials_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyTargetsCommand {
    pub operation: TargetOperation,
    pub targets: Vec<TargetDescriptor>,
    /// Apply to every host in the cluster rather than only the addressed host
    pub apply_to_all_hosts_in_cluster: bool,
    pub target_type_to_remove: TargetTypeToRemove,
}

/// Payload carried by specific answers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    #[default]
    None,
    /// Host-local device paths, one per target in command order
    ConnectedPaths { paths: Vec<String> },
}

/// An agent's reply. Failures other than transport problems are reported here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub result: bool,
    pub details: String,
    #[serde(default)]
    pub payload: AnswerPayload,
}

impl Answer {
    pub fn success() -> Self {
        Self {
            result: true,
            details: String::new(),
            payload: AnswerPayload::None,
        }
    }

    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            result: false,
            details: details.into(),
            payload: AnswerPayload::None,
        }
    }

    pub fn connected(paths: Vec<String>) -> Self {
        Self {
            result: true,
            details: String::new(),
            payload: AnswerPayload::ConnectedPaths { paths },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HypervisorType;

    #[test]
    fn test_command_names() {
        let vm = VmDescriptor::new("i-2-10-VM", HypervisorType::Kvm);
        let prepare = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
            vm: vm.clone(),
            rollback: false,
        });
        let rollback = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
            vm,
            rollback: true,
        });
        assert_eq!(prepare.name(), "prepare_for_migration");
        assert_eq!(rollback.name(), "prepare_for_migration_rollback");
    }

    #[test]
    fn test_answer_json_defaults_payload() {
        let answer: Answer = serde_json::from_str(r#"{"result": false, "details": "no space"}"#).unwrap();
        assert!(!answer.result);
        assert_eq!(answer.payload, AnswerPayload::None);
    }
}
