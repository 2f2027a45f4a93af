//! Per-task bookkeeping.
//!
//! A task records how far each volume got so that rollback only undoes
//! what was actually done. Nothing here is persisted.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::backend::BackendVolume;
use crate::error::{DataMotionError, Result};
use crate::types::{HostInfo, StoragePool, VmDescriptor, Volume, VolumeId};

use super::completion::MigrationResult;

/// Outcome of a task. Moves forward only.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Pending,
    Succeeded,
    Failed(DataMotionError),
}

/// Progress of one source volume.
#[derive(Debug, Clone)]
pub struct VolumeMigration {
    pub source: Volume,
    pub source_pool: StoragePool,
    pub dest_pool: StoragePool,
    /// Source was moved to `Migrating`
    pub source_marked: bool,
    /// Shadow record, once persisted
    pub shadow: Option<Volume>,
    /// Destination backend object, once created
    pub backend_object: Option<BackendVolume>,
    /// Attach on the destination host was requested
    pub attach_sent: bool,
    /// Device path on the destination host, once attached
    pub dest_device: Option<String>,
}

impl VolumeMigration {
    pub fn new(source: Volume, source_pool: StoragePool, dest_pool: StoragePool) -> Self {
        Self {
            source,
            source_pool,
            dest_pool,
            source_marked: false,
            shadow: None,
            backend_object: None,
            attach_sent: false,
            dest_device: None,
        }
    }

    /// Backing path of the shadow, once the backend assigned one.
    pub fn shadow_path(&self) -> Option<&str> {
        self.shadow.as_ref().and_then(|s| s.path.as_deref())
    }
}

/// One migration of a set of volumes, with or without a running VM.
#[derive(Debug)]
pub struct MigrationTask {
    pub id: Uuid,
    /// Present for live migrations
    pub vm: Option<VmDescriptor>,
    pub source_host: Option<HostInfo>,
    pub dest_host: Option<HostInfo>,
    pub entries: Vec<VolumeMigration>,
    /// Prepare-for-migration was sent to the destination
    pub prepare_sent: bool,
    outcome: TaskOutcome,
    promoted: BTreeMap<VolumeId, VolumeId>,
    unpromoted: Vec<(VolumeId, DataMotionError)>,
}

impl MigrationTask {
    /// Task for a live VM migration.
    pub fn live(vm: VmDescriptor, source_host: HostInfo, dest_host: HostInfo, entries: Vec<VolumeMigration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            vm: Some(vm),
            source_host: Some(source_host),
            dest_host: Some(dest_host),
            entries,
            prepare_sent: false,
            outcome: TaskOutcome::Pending,
            promoted: BTreeMap::new(),
            unpromoted: Vec::new(),
        }
    }

    /// Task for a storage-only migration.
    pub fn detached(entry: VolumeMigration) -> Self {
        Self {
            id: Uuid::new_v4(),
            vm: None,
            source_host: None,
            dest_host: None,
            entries: vec![entry],
            prepare_sent: false,
            outcome: TaskOutcome::Pending,
            promoted: BTreeMap::new(),
            unpromoted: Vec::new(),
        }
    }

    pub fn outcome(&self) -> &TaskOutcome {
        &self.outcome
    }

    /// Settle the outcome. Only a pending task can be settled.
    pub fn settle(&mut self, outcome: TaskOutcome) -> Result<()> {
        if self.outcome != TaskOutcome::Pending {
            return Err(DataMotionError::Internal(format!(
                "task {} already settled as {:?}",
                self.id, self.outcome
            )));
        }
        if outcome == TaskOutcome::Pending {
            return Err(DataMotionError::Internal(format!(
                "task {} cannot be settled as pending",
                self.id
            )));
        }
        self.outcome = outcome;
        Ok(())
    }

    /// Record that `shadow` replaced `source`.
    pub fn record_promotion(&mut self, source: VolumeId, shadow: VolumeId) {
        self.promoted.insert(source, shadow);
    }

    /// Record that `source` kept its identity because promotion failed.
    pub fn record_unpromoted(&mut self, source: VolumeId, error: DataMotionError) {
        self.unpromoted.push((source, error));
    }

    /// Convert into the result handed to the caller.
    ///
    /// A succeeded task with unpromoted volumes still reports success, with
    /// the failed promotions listed in the details.
    pub fn into_result(self) -> MigrationResult {
        match self.outcome {
            TaskOutcome::Succeeded if !self.unpromoted.is_empty() => {
                let details = self
                    .unpromoted
                    .iter()
                    .map(|(id, error)| format!("volume {} not promoted: {}", id, error))
                    .collect::<Vec<_>>()
                    .join("; ");
                MigrationResult {
                    details: Some(details),
                    ..MigrationResult::succeeded(self.promoted)
                }
            }
            TaskOutcome::Succeeded => MigrationResult::succeeded(self.promoted),
            TaskOutcome::Failed(error) => MigrationResult::failed(error),
            TaskOutcome::Pending => MigrationResult::failed(DataMotionError::Internal(format!(
                "task {} finished without an outcome",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::sample_pool;
    use crate::types::PoolId;

    fn task() -> MigrationTask {
        let source = Volume::new("vol", 1 << 30, PoolId(1));
        MigrationTask::detached(VolumeMigration::new(source, sample_pool(1, "StorPool"), sample_pool(2, "StorPool")))
    }

    #[test]
    fn test_outcome_is_monotonic() {
        let mut task = task();
        assert_eq!(task.outcome(), &TaskOutcome::Pending);

        task.settle(TaskOutcome::Succeeded).unwrap();
        assert!(task.settle(TaskOutcome::Failed(DataMotionError::Internal("late".into()))).is_err());
        assert!(task.settle(TaskOutcome::Succeeded).is_err());
        assert_eq!(task.outcome(), &TaskOutcome::Succeeded);
    }

    #[test]
    fn test_cannot_settle_as_pending() {
        let mut task = task();
        assert!(task.settle(TaskOutcome::Pending).is_err());
    }

    #[test]
    fn test_unsettled_task_reports_failure() {
        let result = task().into_result();
        assert!(!result.success);
    }

    #[test]
    fn test_unpromoted_volumes_are_reported() {
        let mut task = task();
        task.settle(TaskOutcome::Succeeded).unwrap();
        task.record_unpromoted(VolumeId(7), DataMotionError::Persistence("snapshot table locked".into()));

        let result = task.into_result();
        assert!(result.success);
        assert!(result.promoted.is_empty());
        assert_eq!(
            result.details.as_deref(),
            Some("volume 7 not promoted: Persistence error: snapshot table locked")
        );
    }

    #[test]
    fn test_failed_task_carries_diagnostic() {
        let mut task = task();
        task.settle(TaskOutcome::Failed(DataMotionError::OperationTimedOut("host 1".into())))
            .unwrap();
        let result = task.into_result();
        assert!(!result.success);
        assert!(result.details.unwrap().starts_with("Operation timed out"));
    }
}
