//! Volume lifecycle state machine.
//!
//! Every persisted state change of a volume goes through [`VolumeState::on_event`].
//! The migration protocol drives two volumes through it in lockstep:
//!
//! ```text
//! shadow:  Allocated --MigrationCopyRequested--> Creating
//!          Creating  --MigrationCopySucceeded--> Ready
//!          Ready     --MigrationRequested-----> Migrating
//! source:  Ready     --MigrationRequested-----> Migrating
//! both:    Migrating --OperationSucceeded/OperationFailed--> Ready
//! retire:  Ready --DestroyRequested--> Destroy --ExpungingRequested--> Expunging
//!          Expunging --OperationSucceeded--> Expunged
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DataMotionError, Result};

/// Persisted lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    /// Record exists, no backing storage yet
    Allocated,
    /// Backing storage is being created
    Creating,
    /// Usable
    Ready,
    /// Being migrated to another pool
    Migrating,
    /// Data is being copied
    Copying,
    /// Marked for destruction
    Destroy,
    /// Backing storage is being removed
    Expunging,
    /// Gone
    Expunged,
}

/// Events accepted by the volume state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeEvent {
    CreateRequested,
    OperationSucceeded,
    OperationFailed,
    MigrationRequested,
    MigrationCopyRequested,
    MigrationCopySucceeded,
    MigrationCopyFailed,
    CopyRequested,
    DestroyRequested,
    ExpungingRequested,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for VolumeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl VolumeState {
    /// Compute the state reached by applying `event`.
    pub fn on_event(self, event: VolumeEvent) -> Result<VolumeState> {
        use VolumeEvent as E;
        use VolumeState as S;

        let next = match (self, event) {
            (S::Allocated, E::CreateRequested) => S::Creating,
            (S::Allocated, E::MigrationCopyRequested) => S::Creating,
            (S::Allocated, E::DestroyRequested) => S::Destroy,

            (S::Creating, E::OperationSucceeded) => S::Ready,
            (S::Creating, E::OperationFailed) => S::Allocated,
            (S::Creating, E::MigrationCopySucceeded) => S::Ready,
            (S::Creating, E::MigrationCopyFailed) => S::Allocated,
            (S::Creating, E::DestroyRequested) => S::Destroy,

            (S::Ready, E::MigrationRequested) => S::Migrating,
            (S::Ready, E::CopyRequested) => S::Copying,
            (S::Ready, E::DestroyRequested) => S::Destroy,

            (S::Migrating, E::OperationSucceeded) => S::Ready,
            (S::Migrating, E::OperationFailed) => S::Ready,

            (S::Copying, E::OperationSucceeded) => S::Ready,
            (S::Copying, E::OperationFailed) => S::Ready,

            (S::Destroy, E::ExpungingRequested) => S::Expunging,
            (S::Expunging, E::OperationSucceeded) => S::Expunged,
            (S::Expunging, E::OperationFailed) => S::Destroy,

            (state, event) => {
                return Err(DataMotionError::InvalidStateTransition(format!(
                    "{} does not accept {}",
                    state, event
                )))
            }
        };

        Ok(next)
    }

    /// A canonical volume is one that is neither retired nor half-built.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Destroy | Self::Expunging | Self::Expunged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_path() {
        let state = VolumeState::Allocated
            .on_event(VolumeEvent::MigrationCopyRequested).unwrap()
            .on_event(VolumeEvent::MigrationCopySucceeded).unwrap()
            .on_event(VolumeEvent::MigrationRequested).unwrap();
        assert_eq!(state, VolumeState::Migrating);

        assert_eq!(
            state.on_event(VolumeEvent::OperationSucceeded).unwrap(),
            VolumeState::Ready
        );
        assert_eq!(
            state.on_event(VolumeEvent::OperationFailed).unwrap(),
            VolumeState::Ready
        );
    }

    #[test]
    fn test_retire_path() {
        let state = VolumeState::Ready
            .on_event(VolumeEvent::DestroyRequested).unwrap()
            .on_event(VolumeEvent::ExpungingRequested).unwrap()
            .on_event(VolumeEvent::OperationSucceeded).unwrap();
        assert_eq!(state, VolumeState::Expunged);
        assert!(!state.is_live());
    }

    #[test]
    fn test_invalid_transition() {
        let err = VolumeState::Expunged
            .on_event(VolumeEvent::MigrationRequested)
            .unwrap_err();
        assert!(matches!(err, DataMotionError::InvalidStateTransition(_)));

        // A volume cannot be migrated twice concurrently
        assert!(VolumeState::Migrating
            .on_event(VolumeEvent::MigrationRequested)
            .is_err());
    }
}
