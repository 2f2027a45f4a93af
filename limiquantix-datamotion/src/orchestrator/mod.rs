//! Migration orchestrator.
//!
//! Drives a cross-host, cross-pool migration of a VM and its volumes to a
//! committed or rolled-back end state:
//!
//! ```text
//! validate ─► duplicate ─► backend clone ─► attach ─► prepare ─► migrate
//!   (sync)      │              │              │          │          │
//!               └──────────────┴──── any failure ────────┴──────────┴─► rollback
//!                                                            success ─► commit
//! ```
//!
//! Validation runs before anything is touched and fails synchronously.
//! Everything after it runs on a spawned task whose single result is
//! delivered through a [`CompletionSignal`].

mod completion;
mod task;

pub use completion::{CompletionSignal, MigrationResult};

use completion::guard_phase;
pub use task::{MigrationTask, TaskOutcome, VolumeMigration};

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::agent::{
    send_with_timeout, AgentChannel, AgentCommand, DiskSource, DiskType, DriverType,
    MigrateCommand, MigrateDiskInfo, PrepareForMigrationCommand,
};
use crate::backend::{BackendVolumeSpec, StorageControlPlane};
use crate::config::MigrationConfig;
use crate::directory::{HostDirectory, StoragePoolDirectory};
use crate::error::{DataMotionError, Result};
use crate::lifecycle::{VolumeEvent, VolumeState};
use crate::planner::VolumeDuplicationPlanner;
use crate::store::{SnapshotStore, VolumeStore};
use crate::strategy::{DataMotionStrategy, MigrationRequest, StrategyKind, StrategyPriority};
use crate::targets::TargetConnectivityManager;
use crate::types::{
    HostInfo, HypervisorType, ImageFormat, PoolId, ProviderId, StoragePool, VmDescriptor,
    VolumeId,
};

/// Hypervisors whose agents understand managed-storage migration.
pub const SUPPORTED_HYPERVISORS: &[HypervisorType] = &[HypervisorType::Kvm];

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub volumes: Arc<dyn VolumeStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub pools: Arc<dyn StoragePoolDirectory>,
    pub hosts: Arc<dyn HostDirectory>,
    pub agents: Arc<dyn AgentChannel>,
    pub backend: Arc<dyn StorageControlPlane>,
}

/// Migration strategy for pools served by one storage provider.
#[derive(Clone)]
pub struct MigrationOrchestrator {
    provider: ProviderId,
    config: Arc<MigrationConfig>,
    volumes: Arc<dyn VolumeStore>,
    snapshots: Arc<dyn SnapshotStore>,
    pools: Arc<dyn StoragePoolDirectory>,
    hosts: Arc<dyn HostDirectory>,
    agents: Arc<dyn AgentChannel>,
    backend: Arc<dyn StorageControlPlane>,
    planner: Arc<VolumeDuplicationPlanner>,
    targets: Arc<TargetConnectivityManager>,
}

/// Best-effort cleanup: a failure is logged and otherwise ignored, it never
/// changes the outcome already decided for the task.
fn best_effort(action: &str, volume_id: VolumeId, result: Result<()>) {
    if let Err(e) = result {
        warn!(action = %action, volume_id = %volume_id, error = %e, "Cleanup step failed");
    }
}

impl MigrationOrchestrator {
    pub fn new(provider: ProviderId, config: MigrationConfig, deps: Collaborators) -> Self {
        let planner = Arc::new(VolumeDuplicationPlanner::new(deps.volumes.clone()));
        let targets = Arc::new(TargetConnectivityManager::new(deps.agents.clone(), &config));

        Self {
            provider,
            config: Arc::new(config),
            volumes: deps.volumes,
            snapshots: deps.snapshots,
            pools: deps.pools,
            hosts: deps.hosts,
            agents: deps.agents,
            backend: deps.backend,
            planner,
            targets,
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Target connectivity manager shared with the orchestrator.
    pub fn targets(&self) -> &Arc<TargetConnectivityManager> {
        &self.targets
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Live-migrate `request.vm` and its volumes to `request.dest_host`.
    ///
    /// Precondition failures are returned immediately and nothing is touched.
    /// Otherwise the migration runs on its own task and reports through the
    /// returned signal.
    #[instrument(skip_all, fields(
        vm = %request.vm.instance_name,
        source_host = %request.source_host,
        dest_host = %request.dest_host,
        volumes = request.volumes.len()
    ))]
    pub async fn migrate_volumes_and_vm(&self, request: MigrationRequest) -> Result<CompletionSignal> {
        let task = self.validate(&request).await.map_err(|e| {
            warn!(error = %e, "Migration request rejected");
            e
        })?;

        info!(task_id = %task.id, "Starting live migration");

        let span = info_span!("migration_task", task_id = %task.id, vm = %request.vm.instance_name);
        let this = self.clone();
        Ok(CompletionSignal::spawn(
            async move { this.run_live(task).await }.instrument(span),
        ))
    }

    /// Move a volume to another pool at the storage level only.
    ///
    /// For volumes not in use by a running VM: the backend clone is the
    /// copy and no host agent is involved.
    #[instrument(skip_all, fields(volume_id = %volume_id, dest_pool = %dest_pool_id))]
    pub async fn migrate_volume(&self, volume_id: VolumeId, dest_pool_id: PoolId) -> Result<CompletionSignal> {
        let entry = self.resolve_entry(volume_id, dest_pool_id).await?;
        self.check_providers(std::slice::from_ref(&entry))?;

        let task = MigrationTask::detached(entry);
        info!(task_id = %task.id, "Starting storage migration");

        let span = info_span!("migration_task", task_id = %task.id, volume_id = %volume_id);
        let this = self.clone();
        Ok(CompletionSignal::spawn(
            async move { this.run_detached(task).await }.instrument(span),
        ))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    async fn validate(&self, request: &MigrationRequest) -> Result<MigrationTask> {
        let vm = &request.vm;

        if request.volumes.is_empty() {
            return Err(DataMotionError::EmptyRequest(format!(
                "no volumes given for vm {}",
                vm.instance_name
            )));
        }

        if request.source_host == request.dest_host {
            return Err(DataMotionError::SameHost(format!(
                "vm {} is already on host {}",
                vm.instance_name, request.source_host
            )));
        }

        if !SUPPORTED_HYPERVISORS.contains(&vm.hypervisor) {
            return Err(DataMotionError::UnsupportedHypervisor(format!(
                "{} (vm {})",
                vm.hypervisor, vm.instance_name
            )));
        }

        let source_host = self.hosts.get_host(request.source_host).await?;
        let dest_host = self.hosts.get_host(request.dest_host).await?;

        if dest_host.hypervisor != vm.hypervisor {
            return Err(DataMotionError::UnsupportedHypervisor(format!(
                "destination host {} runs {}, vm {} runs {}",
                dest_host.name, dest_host.hypervisor, vm.instance_name, vm.hypervisor
            )));
        }

        let mut entries = Vec::with_capacity(request.volumes.len());
        for (volume_id, pool_id) in &request.volumes {
            entries.push(self.resolve_entry(*volume_id, *pool_id).await?);
        }
        self.check_providers(&entries)?;

        Ok(MigrationTask::live(vm.clone(), source_host, dest_host, entries))
    }

    /// Load and check one source volume and its pools.
    async fn resolve_entry(&self, volume_id: VolumeId, dest_pool_id: PoolId) -> Result<VolumeMigration> {
        let source = self
            .volumes
            .find_by_id(volume_id)
            .await?
            .ok_or_else(|| DataMotionError::VolumeNotFound(volume_id.to_string()))?;

        if source.is_encrypted() {
            return Err(DataMotionError::EncryptedVolume(format!(
                "volume {} ({})",
                source.uuid, source.name
            )));
        }

        // Only a Ready volume may start migrating
        source.state.on_event(VolumeEvent::MigrationRequested)?;

        if source.path.is_none() {
            return Err(DataMotionError::VolumeNotFound(format!(
                "volume {} has no backing path",
                source.uuid
            )));
        }

        let source_pool_id = source.pool_id.ok_or_else(|| {
            DataMotionError::PoolNotFound(format!("volume {} has no pool", source.uuid))
        })?;
        let source_pool = self.pools.get_pool(source_pool_id).await?;
        let dest_pool = self.pools.get_pool(dest_pool_id).await?;

        Ok(VolumeMigration::new(source, source_pool, dest_pool))
    }

    /// Every pool involved must be served by this orchestrator's provider.
    fn check_providers(&self, entries: &[VolumeMigration]) -> Result<()> {
        let dest_providers: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.dest_pool.provider.as_str())
            .collect();

        if dest_providers.len() > 1 {
            return Err(DataMotionError::MixedBackends(format!(
                "destination pools span providers {}",
                dest_providers.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        for entry in entries {
            for pool in [&entry.dest_pool, &entry.source_pool] {
                if pool.provider != self.provider {
                    return Err(DataMotionError::MixedBackends(format!(
                        "pool {} is served by {}, not {}",
                        pool.name, pool.provider, self.provider
                    )));
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Task bodies
    // =========================================================================

    async fn run_live(self, mut task: MigrationTask) -> MigrationResult {
        let outcome = guard_phase(self.execute_live(&mut task)).await;
        self.finish(task, outcome).await
    }

    async fn run_detached(self, mut task: MigrationTask) -> MigrationResult {
        let outcome = guard_phase(self.duplicate_and_clone(&mut task, true)).await;
        self.finish(task, outcome).await
    }

    /// Single exit point: settle the outcome, then commit or roll back.
    async fn finish(&self, mut task: MigrationTask, outcome: Result<()>) -> MigrationResult {
        match outcome {
            Ok(()) => {
                if let Err(e) = task.settle(TaskOutcome::Succeeded) {
                    error!(error = %e, "Could not settle task");
                }
                self.commit(&mut task).await;
                info!("Migration committed");
            }
            Err(e) => {
                warn!(error = %e, "Migration failed, rolling back");
                if let Err(e) = task.settle(TaskOutcome::Failed(e)) {
                    error!(error = %e, "Could not settle task");
                }
                self.rollback(&task).await;
                info!("Migration rolled back");
            }
        }

        task.into_result()
    }

    /// Phases 2 to 5 of a live migration.
    async fn execute_live(&self, task: &mut MigrationTask) -> Result<()> {
        let (Some(vm), Some(source_host), Some(dest_host)) =
            (task.vm.clone(), task.source_host.clone(), task.dest_host.clone())
        else {
            return Err(DataMotionError::Internal("live task without vm or hosts".into()));
        };

        self.duplicate_and_clone(task, false).await?;

        // Attach every shadow on the destination host in one command
        let handles = task
            .entries
            .iter()
            .map(|e| {
                e.shadow_path()
                    .map(|path| (e.dest_pool.clone(), path.to_string()))
                    .ok_or_else(|| DataMotionError::Internal(format!("volume {} has no shadow path", e.source.id)))
            })
            .collect::<Result<Vec<(StoragePool, String)>>>()?;
        let targets: Vec<(&StoragePool, &str)> = handles.iter().map(|(p, h)| (p, h.as_str())).collect();

        for entry in task.entries.iter_mut() {
            entry.attach_sent = true;
        }
        let devices = self.targets.connect_all(dest_host.id, &targets).await?;
        for (entry, device) in task.entries.iter_mut().zip(devices) {
            entry.dest_device = Some(device);
        }
        info!(host = %dest_host.name, "Shadow volumes attached on destination");

        // Destination must be prepared before the source starts streaming
        task.prepare_sent = true;
        let prepare = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
            vm: vm.clone(),
            rollback: false,
        });
        let answer = send_with_timeout(self.agents.as_ref(), dest_host.id, prepare, self.config.command_timeout()).await?;
        if !answer.result {
            return Err(DataMotionError::CommandFailed(format!(
                "prepare for migration on host {} failed: {}",
                dest_host.name, answer.details
            )));
        }
        info!(host = %dest_host.name, "Destination prepared");

        let migrate = AgentCommand::Migrate(self.build_migrate_command(&vm, &dest_host, &task.entries)?);
        let answer = send_with_timeout(self.agents.as_ref(), source_host.id, migrate, self.config.migrate_timeout()).await?;
        if !answer.result {
            return Err(DataMotionError::CommandFailed(format!(
                "migration of vm {} to host {} failed: {}",
                vm.instance_name, dest_host.name, answer.details
            )));
        }
        info!(host = %dest_host.name, "VM migrated");

        Ok(())
    }

    /// Duplicate and backend-clone each volume in turn.
    ///
    /// Entries are processed in order, so on failure only a prefix of them
    /// has been touched.
    async fn duplicate_and_clone(&self, task: &mut MigrationTask, derive_from_source: bool) -> Result<()> {
        let owner = task.vm.as_ref().map(|vm| vm.uuid.clone());

        for entry in task.entries.iter_mut() {
            entry.source = self
                .volumes
                .process_event(entry.source.id, VolumeEvent::MigrationRequested)
                .await?;
            entry.source_marked = true;

            let mut shadow = self.planner.duplicate(&entry.source, &entry.dest_pool).await?;
            entry.shadow = Some(shadow.clone());

            // No client-side copy happens, so the copy phases complete at once
            for event in [
                VolumeEvent::MigrationCopyRequested,
                VolumeEvent::MigrationCopySucceeded,
                VolumeEvent::MigrationRequested,
            ] {
                shadow = self.volumes.process_event(shadow.id, event).await?;
                entry.shadow = Some(shadow.clone());
            }

            let spec = BackendVolumeSpec {
                name: entry.source.uuid.clone(),
                parent_name: if derive_from_source {
                    entry.source.backend_name().map(str::to_string)
                } else {
                    None
                },
                size_bytes: entry.source.size_bytes,
                tag: self.config.backend_tag.clone(),
                owner: owner
                    .clone()
                    .or_else(|| entry.source.instance_id.clone())
                    .unwrap_or_default(),
                purpose: self.config.volume_purpose_tag.clone(),
                iops_limit: entry.source.max_iops,
            };

            let created = self.backend.create_volume(&entry.dest_pool, &spec).await?;
            entry.backend_object = Some(created.clone());

            shadow.path = Some(created.path.clone());
            self.volumes.update(&shadow).await?;
            entry.shadow = Some(shadow);

            info!(
                volume_id = %entry.source.id,
                dest_pool = %entry.dest_pool.name,
                path = %created.path,
                "Destination volume created"
            );
        }

        Ok(())
    }

    fn build_migrate_command(
        &self,
        vm: &VmDescriptor,
        dest_host: &HostInfo,
        entries: &[VolumeMigration],
    ) -> Result<MigrateCommand> {
        let mut migrate_storage = BTreeMap::new();

        for entry in entries {
            let source_path = entry.source.path.clone().ok_or_else(|| {
                DataMotionError::Internal(format!("volume {} has no backing path", entry.source.id))
            })?;
            let device = entry.dest_device.clone().ok_or_else(|| {
                DataMotionError::Internal(format!("volume {} is not attached on destination", entry.source.id))
            })?;

            migrate_storage.insert(
                source_path,
                MigrateDiskInfo {
                    serial: entry.source.uuid.clone(),
                    disk_type: DiskType::Block,
                    driver_type: match entry.source.format {
                        ImageFormat::Qcow2 => DriverType::Qcow2,
                        _ => DriverType::Raw,
                    },
                    source: DiskSource::Dev,
                    source_text: device,
                },
            );
        }

        Ok(MigrateCommand {
            vm: vm.clone(),
            dest_host: dest_host.id,
            dest_address: dest_host.private_address.clone(),
            migrate_storage,
            migrate_storage_managed: true,
            auto_convergence: self.config.auto_convergence,
            max_downtime_ms: self.config.max_downtime_ms,
            migrate_speed_mbps: self.config.migrate_speed_mbps,
            wait_secs: self.config.migrate_wait_secs,
        })
    }

    // =========================================================================
    // Commit and rollback
    // =========================================================================

    /// Promote every shadow. The migration already happened, so a failed
    /// promotion does not fail the task; the volume is reported unpromoted
    /// and keeps its original record.
    async fn commit(&self, task: &mut MigrationTask) {
        let source_host = task.source_host.clone();
        let mut promoted = Vec::with_capacity(task.entries.len());
        let mut unpromoted = Vec::new();

        for entry in &task.entries {
            match self.promote(entry, source_host.as_ref()).await {
                Ok(shadow_id) => promoted.push((entry.source.id, shadow_id)),
                Err(e) => {
                    error!(volume_id = %entry.source.id, error = %e, "Failed to promote migrated volume");
                    unpromoted.push((entry.source.id, e));
                }
            }
        }

        for (source_id, shadow_id) in promoted {
            task.record_promotion(source_id, shadow_id);
        }
        for (source_id, error) in unpromoted {
            task.record_unpromoted(source_id, error);
        }
    }

    async fn promote(&self, entry: &VolumeMigration, source_host: Option<&HostInfo>) -> Result<VolumeId> {
        let shadow = entry
            .shadow
            .as_ref()
            .ok_or_else(|| DataMotionError::Internal(format!("volume {} has no shadow", entry.source.id)))?;
        let source_id = entry.source.id;

        let moved = match self.swap_identity(entry, shadow.id).await {
            Ok(moved) => moved,
            Err(e) => {
                self.abandon_promotion(source_id, shadow.id).await;
                return Err(e);
            }
        };

        info!(
            volume_id = %source_id,
            promoted_id = %shadow.id,
            snapshots = moved,
            "Shadow volume promoted"
        );

        if let (Some(host), Some(path)) = (source_host, entry.source.path.as_deref()) {
            best_effort(
                "disconnect source target",
                source_id,
                self.targets.disconnect(host.id, &entry.source_pool, path).await,
            );
        }
        if let Some(name) = entry.source.backend_name() {
            best_effort(
                "delete source backend volume",
                source_id,
                self.backend.delete_volume(&entry.source_pool, name).await,
            );
        }
        best_effort("destroy source record", source_id, self.retire_volume(source_id).await);

        Ok(shadow.id)
    }

    /// Hand the source's identity, attachment and snapshots to the shadow.
    ///
    /// Either every step lands or the uuid swap is undone before returning
    /// the error.
    async fn swap_identity(&self, entry: &VolumeMigration, shadow_id: VolumeId) -> Result<usize> {
        let source_id = entry.source.id;

        self.volumes.process_event(source_id, VolumeEvent::OperationSucceeded).await?;
        let mut promoted = self.volumes.process_event(shadow_id, VolumeEvent::OperationSucceeded).await?;

        promoted.instance_id = entry.source.instance_id.clone();
        promoted.device_id = entry.source.device_id;
        self.volumes.update(&promoted).await?;

        self.volumes.update_uuid(source_id, shadow_id).await?;
        match self.snapshots.update_volume_ids(source_id, shadow_id).await {
            Ok(moved) => Ok(moved),
            Err(e) => {
                best_effort(
                    "restore volume identity",
                    source_id,
                    self.volumes.update_uuid(source_id, shadow_id).await,
                );
                Err(e)
            }
        }
    }

    /// Leave the source canonical after a failed promotion: the shadow is
    /// detached from the instance and neither record stays `Migrating`.
    async fn abandon_promotion(&self, source_id: VolumeId, shadow_id: VolumeId) {
        match self.volumes.find_by_id(shadow_id).await {
            Ok(Some(mut shadow)) => {
                shadow.instance_id = None;
                shadow.device_id = None;
                best_effort("detach shadow record", source_id, self.volumes.update(&shadow).await);
            }
            Ok(None) => {}
            Err(e) => warn!(volume_id = %source_id, error = %e, "Could not load shadow record"),
        }

        for id in [source_id, shadow_id] {
            if let Ok(Some(volume)) = self.volumes.find_by_id(id).await {
                if volume.state == VolumeState::Migrating {
                    best_effort(
                        "clear migrating state",
                        source_id,
                        self.volumes
                            .process_event(id, VolumeEvent::OperationFailed)
                            .await
                            .map(drop),
                    );
                }
            }
        }
    }

    /// Undo whatever each entry got through, newest first.
    async fn rollback(&self, task: &MigrationTask) {
        if task.prepare_sent {
            if let (Some(vm), Some(dest_host)) = (&task.vm, &task.dest_host) {
                let command = AgentCommand::PrepareForMigration(PrepareForMigrationCommand {
                    vm: vm.clone(),
                    rollback: true,
                });
                match send_with_timeout(self.agents.as_ref(), dest_host.id, command, self.config.command_timeout()).await {
                    Ok(answer) if answer.result => info!(host = %dest_host.name, "Destination preparation rolled back"),
                    Ok(answer) => warn!(host = %dest_host.name, details = %answer.details, "Failed to roll back destination preparation"),
                    Err(e) => warn!(host = %dest_host.name, error = %e, "Failed to roll back destination preparation"),
                }
            }
        }

        for entry in task.entries.iter().rev() {
            self.rollback_entry(entry, task.dest_host.as_ref()).await;
        }
    }

    async fn rollback_entry(&self, entry: &VolumeMigration, dest_host: Option<&HostInfo>) {
        let source_id = entry.source.id;

        if let (Some(host), Some(path), true) = (dest_host, entry.shadow_path(), entry.attach_sent) {
            best_effort(
                "disconnect shadow target",
                source_id,
                self.targets.disconnect(host.id, &entry.dest_pool, path).await,
            );
            if let Some(object) = &entry.backend_object {
                best_effort(
                    "revoke shadow access",
                    source_id,
                    self.backend.revoke_access(&entry.dest_pool, &object.name, host).await,
                );
            }
        }

        if let Some(shadow) = &entry.shadow {
            if shadow.state == VolumeState::Migrating {
                best_effort(
                    "mark shadow failed",
                    source_id,
                    self.volumes
                        .process_event(shadow.id, VolumeEvent::OperationFailed)
                        .await
                        .map(drop),
                );
            }
        }

        if entry.source_marked {
            best_effort(
                "mark source failed",
                source_id,
                self.volumes
                    .process_event(source_id, VolumeEvent::OperationFailed)
                    .await
                    .map(drop),
            );
        }

        if let Some(object) = &entry.backend_object {
            best_effort(
                "delete shadow backend volume",
                source_id,
                self.backend.delete_volume(&entry.dest_pool, &object.name).await,
            );
        }

        if let Some(shadow) = &entry.shadow {
            best_effort("destroy shadow record", source_id, self.retire_volume(shadow.id).await);
        }
    }

    /// Walk a volume through destruction and drop its record.
    async fn retire_volume(&self, id: VolumeId) -> Result<()> {
        for event in [
            VolumeEvent::DestroyRequested,
            VolumeEvent::ExpungingRequested,
            VolumeEvent::OperationSucceeded,
        ] {
            self.volumes.process_event(id, event).await?;
        }
        self.volumes.remove(id).await
    }
}

#[async_trait]
impl DataMotionStrategy for MigrationOrchestrator {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BackendSpecific(self.provider.clone())
    }

    async fn can_handle(&self, request: &MigrationRequest) -> StrategyPriority {
        if !SUPPORTED_HYPERVISORS.contains(&request.vm.hypervisor) {
            return StrategyPriority::CantHandle;
        }

        for (volume_id, dest_pool_id) in &request.volumes {
            let source_pool_id = match self.volumes.find_by_id(*volume_id).await {
                Ok(Some(volume)) => volume.pool_id,
                _ => None,
            };
            let Some(source_pool_id) = source_pool_id else {
                return StrategyPriority::CantHandle;
            };

            for pool_id in [source_pool_id, *dest_pool_id] {
                match self.pools.find_pool(pool_id).await {
                    Ok(Some(pool)) if pool.provider == self.provider => {}
                    _ => return StrategyPriority::CantHandle,
                }
            }
        }

        StrategyPriority::Plugin
    }

    async fn migrate_volumes_and_vm(&self, request: MigrationRequest) -> Result<CompletionSignal> {
        MigrationOrchestrator::migrate_volumes_and_vm(self, request).await
    }
}
