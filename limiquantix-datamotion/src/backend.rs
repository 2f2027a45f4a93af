//! Storage control plane seam.
//!
//! Backend clones talk to the storage vendor's control plane directly,
//! never through a hypervisor host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{HostInfo, StoragePool};

/// Request to create a volume object on a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendVolumeSpec {
    /// Stable external name of the object
    pub name: String,
    /// Existing object to derive from (clone source)
    pub parent_name: Option<String>,
    /// Size in bytes
    pub size_bytes: u64,
    /// Tag marking objects created by this deployment
    pub tag: String,
    /// Owner, usually the VM uuid
    pub owner: String,
    /// Purpose tag (e.g. "volume", "snapshot")
    pub purpose: String,
    /// Optional IOPS limit
    pub iops_limit: Option<u64>,
}

/// Volume object created by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendVolume {
    /// Name the backend assigned
    pub name: String,
    /// Host-independent backing path to persist on the volume record
    pub path: String,
}

/// Storage control plane operations used by data motion.
#[async_trait]
pub trait StorageControlPlane: Send + Sync {
    /// Create a volume object in `pool`.
    async fn create_volume(&self, pool: &StoragePool, spec: &BackendVolumeSpec) -> Result<BackendVolume>;

    /// Delete a volume object from `pool`.
    async fn delete_volume(&self, pool: &StoragePool, name: &str) -> Result<()>;

    /// Revoke a host's access to a volume object.
    ///
    /// Backends without per-host access control need not override this.
    async fn revoke_access(&self, pool: &StoragePool, name: &str, host: &HostInfo) -> Result<()> {
        let _ = (pool, name, host);
        Ok(())
    }
}
