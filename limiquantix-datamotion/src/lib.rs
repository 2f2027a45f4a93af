//! # limiquantix Data Motion
//!
//! Moves a running VM together with its volumes from one host to another
//! while the volumes change storage pools.
//!
//! For every volume a shadow record is allocated on the destination pool
//! and the storage backend creates a volume object for it. The shadow is
//! attached on the destination host, the hypervisor streams the disk
//! contents during live migration, and on success the shadow takes over
//! the identity of the original volume. On failure everything created
//! along the way is removed again.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            StrategySelector             │
//! │   (can_handle → highest priority wins)  │
//! └─────────────────────┬───────────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────┐
//! │          MigrationOrchestrator          │
//! └──┬──────────┬──────────┬─────────────┬──┘
//!    ▼          ▼          ▼             ▼
//! ┌───────┐ ┌────────┐ ┌─────────┐ ┌──────────┐
//! │Volume │ │Storage │ │ Target  │ │  Agent   │
//! │ Store │ │Control │ │ Manager │ │ Channel  │
//! │       │ │ Plane  │ │         │ │          │
//! └───────┘ └────────┘ └─────────┘ └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use limiquantix_datamotion::*;
//!
//! let orchestrator = MigrationOrchestrator::new(ProviderId::new("StorPool"), config, collaborators);
//! let request = MigrationRequest::new(vm, HostId(1), HostId(2)).with_volume(VolumeId(7), PoolId(2));
//!
//! let signal = orchestrator.migrate_volumes_and_vm(request).await?;
//! let result = signal.wait().await;
//! assert!(result.success);
//! ```

pub mod agent;
pub mod backend;
pub mod config;
pub mod directory;
pub mod error;
pub mod lifecycle;
pub mod mock;
pub mod orchestrator;
pub mod planner;
pub mod store;
pub mod strategy;
pub mod targets;
pub mod types;

pub use agent::{send_with_timeout, AgentChannel, AgentCommand, Answer, AnswerPayload};
pub use backend::{BackendVolume, BackendVolumeSpec, StorageControlPlane};
pub use config::MigrationConfig;
pub use directory::{HostDirectory, InMemoryHostDirectory, InMemoryPoolDirectory, StoragePoolDirectory};
pub use error::{ChannelError, DataMotionError, Result};
pub use lifecycle::{VolumeEvent, VolumeState};
pub use mock::{MockAgentChannel, MockStorageControlPlane};
pub use orchestrator::{
    Collaborators, CompletionSignal, MigrationOrchestrator, MigrationResult, MigrationTask,
    TaskOutcome, VolumeMigration, SUPPORTED_HYPERVISORS,
};
pub use planner::VolumeDuplicationPlanner;
pub use store::{InMemorySnapshotStore, InMemoryVolumeStore, SnapshotStore, VolumeStore};
pub use strategy::{DataMotionStrategy, MigrationRequest, StrategyKind, StrategyPriority, StrategySelector};
pub use targets::TargetConnectivityManager;
pub use types::*;
