//! Type definitions for volumes, pools, hosts, VMs and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::lifecycle::VolumeState;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Internal volume record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(pub u64);

/// Storage pool identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u64);

/// Host identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u64);

/// Snapshot record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub u64);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage provider name (e.g. "StorPool"), used to pick a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// VOLUMES
// =============================================================================

/// Disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Raw,
    Qcow2,
    Vhd,
    Vmdk,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Qcow2 => "qcow2",
            Self::Vhd => "vhd",
            Self::Vmdk => "vmdk",
        }
    }
}

/// Role of a volume in its VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    Root,
    DataDisk,
}

/// A block device backing a VM disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Internal record id
    pub id: VolumeId,
    /// Stable external identity; survives promotion of a shadow volume
    pub uuid: String,
    /// Display name
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Current storage pool
    pub pool_id: Option<PoolId>,
    /// Previous pool, set while a migration is in flight
    pub last_pool_id: Option<PoolId>,
    /// Pod the volume's pool lives in
    pub pod_id: Option<u64>,
    /// UUID of the VM the volume is attached to
    pub instance_id: Option<String>,
    /// Device slot on the VM
    pub device_id: Option<u64>,
    /// Backing path or handle, pool specific
    pub path: Option<String>,
    /// Folder on file-based pools
    pub folder: Option<String>,
    /// Image format
    pub format: ImageFormat,
    /// Root or data disk
    pub volume_type: VolumeType,
    /// Copy-on-write chain information
    pub chain_info: Option<String>,
    /// Encryption passphrase reference
    pub passphrase_id: Option<u64>,
    /// QoS limit applied by the backend
    pub max_iops: Option<u64>,
    /// Lifecycle state
    pub state: VolumeState,
    /// Source record this volume was duplicated from
    pub migrated_from: Option<VolumeId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Create a new, ready volume record on a pool.
    ///
    /// The id is assigned by the store on persist.
    pub fn new(name: impl Into<String>, size_bytes: u64, pool_id: PoolId) -> Self {
        Self {
            id: VolumeId(0),
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            size_bytes,
            pool_id: Some(pool_id),
            last_pool_id: None,
            pod_id: None,
            instance_id: None,
            device_id: None,
            path: None,
            folder: None,
            format: ImageFormat::Raw,
            volume_type: VolumeType::DataDisk,
            chain_info: None,
            passphrase_id: None,
            max_iops: None,
            state: VolumeState::Ready,
            migrated_from: None,
            created_at: Utc::now(),
        }
    }

    /// Set the backing path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach to a VM.
    pub fn with_instance(mut self, instance_uuid: impl Into<String>, device_id: u64) -> Self {
        self.instance_id = Some(instance_uuid.into());
        self.device_id = Some(device_id);
        self
    }

    /// Set the encryption passphrase reference.
    pub fn with_passphrase(mut self, passphrase_id: u64) -> Self {
        self.passphrase_id = Some(passphrase_id);
        self
    }

    /// Set the volume type.
    pub fn with_type(mut self, volume_type: VolumeType) -> Self {
        self.volume_type = volume_type;
        self
    }

    /// Whether the volume carries encryption material.
    pub fn is_encrypted(&self) -> bool {
        self.passphrase_id.is_some()
    }

    /// Backend object name derived from the backing path.
    ///
    /// Paths look like `/dev/<provider>/<name>`; the last component is the name.
    pub fn backend_name(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(|p| p.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

// =============================================================================
// STORAGE POOLS
// =============================================================================

/// Pool-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    /// Vendor-managed distributed block storage
    SharedBlock,
    /// NFS (file-based, network)
    Nfs,
    /// Ceph RBD (block-based, distributed)
    CephRbd,
    /// iSCSI (block-based, network)
    Iscsi,
    /// Local directory (file-based)
    LocalDir,
}

/// Protocol used to reach a pool's targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProtocol {
    /// Block device exposed by a host-side client
    NativeBlock,
    Iscsi,
    Nfs,
    Rbd,
    File,
}

/// How to reach a storage pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Host/address of the storage endpoint
    pub address: String,
    /// Port, if the protocol uses one
    pub port: Option<u16>,
    /// Protocol
    pub protocol: StorageProtocol,
    /// Reference to credentials kept outside of this record
    pub credentials_ref: Option<String>,
    /// Driver-specific parameters (template, IQN prefix, ...)
    pub parameters: HashMap<String, String>,
}

/// Advisory capacity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl PoolCapacity {
    pub fn available_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// A physical or logical storage endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: PoolId,
    pub uuid: String,
    pub name: String,
    /// Pool-type tag
    pub pool_type: PoolType,
    /// Storage provider serving this pool
    pub provider: ProviderId,
    pub pod_id: Option<u64>,
    pub cluster_id: Option<u64>,
    /// Connection descriptor
    pub connection: ConnectionDescriptor,
    /// Capacity counters
    pub capacity: PoolCapacity,
}

impl StoragePool {
    /// Driver-specific parameter lookup.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.connection.parameters.get(key).map(String::as_str)
    }
}

// =============================================================================
// HOSTS AND VMS
// =============================================================================

/// Hypervisor type of a host or VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    Kvm,
    XenServer,
    VMware,
    Hyperv,
    Lxc,
    Simulator,
}

impl fmt::Display for HypervisorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Kvm => "KVM",
            Self::XenServer => "XenServer",
            Self::VMware => "VMware",
            Self::Hyperv => "Hyperv",
            Self::Lxc => "LXC",
            Self::Simulator => "Simulator",
        };
        f.write_str(name)
    }
}

/// Host directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: HostId,
    pub name: String,
    /// Address reachable by other hosts (migration traffic)
    pub private_address: String,
    pub hypervisor: HypervisorType,
    pub cluster_id: Option<u64>,
}

/// VM power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    Stopped,
    Paused,
    Migrating,
}

/// VM descriptor handed to the migration protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmDescriptor {
    pub uuid: String,
    /// Hypervisor-side instance name
    pub instance_name: String,
    pub hypervisor: HypervisorType,
    pub state: VmState,
    pub cpus: u32,
    pub memory_mib: u64,
}

impl VmDescriptor {
    pub fn new(instance_name: impl Into<String>, hypervisor: HypervisorType) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            instance_name: instance_name.into(),
            hypervisor,
            state: VmState::Running,
            cpus: 2,
            memory_mib: 2048,
        }
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// An immutable point-in-time reference to a volume's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub uuid: String,
    pub name: String,
    /// Volume the snapshot was taken from
    pub volume_id: VolumeId,
    /// Backend path of the snapshot
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, volume_id: VolumeId) -> Self {
        Self {
            id: SnapshotId(0),
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            volume_id,
            path: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_from_path() {
        let vol = Volume::new("data", 1 << 30, PoolId(1)).with_path("/dev/storpool/~abc.d.1");
        assert_eq!(vol.backend_name(), Some("~abc.d.1"));

        let vol = Volume::new("data", 1 << 30, PoolId(1));
        assert_eq!(vol.backend_name(), None);

        let vol = Volume::new("data", 1 << 30, PoolId(1)).with_path("/dev/storpool/");
        assert_eq!(vol.backend_name(), None);
    }

    #[test]
    fn test_encrypted_volume() {
        let vol = Volume::new("secret", 1 << 30, PoolId(1)).with_passphrase(9);
        assert!(vol.is_encrypted());
    }

    #[test]
    fn test_pool_capacity_is_saturating() {
        let capacity = PoolCapacity { total_bytes: 10, used_bytes: 20 };
        assert_eq!(capacity.available_bytes(), 0);
    }
}
