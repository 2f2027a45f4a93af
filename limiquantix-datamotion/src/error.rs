//! Error types for the data-motion layer.

use thiserror::Error;

/// Errors that can occur while moving volume data between pools and hosts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataMotionError {
    /// Source and destination host are the same.
    #[error("Source and destination host must differ: {0}")]
    SameHost(String),

    /// The VM runs on a hypervisor this strategy cannot migrate.
    #[error("Unsupported hypervisor: {0}")]
    UnsupportedHypervisor(String),

    /// Destination pools are served by different storage providers.
    #[error("Mixed storage backends: {0}")]
    MixedBackends(String),

    /// Encrypted volumes cannot be migrated by this backend.
    #[error("Encrypted volume migration is not supported: {0}")]
    EncryptedVolume(String),

    /// Nothing to migrate.
    #[error("Empty migration request: {0}")]
    EmptyRequest(String),

    /// No registered strategy accepts the request.
    #[error("No data motion strategy can handle request: {0}")]
    NoStrategy(String),

    /// Volume record was not found.
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    /// Storage pool was not found.
    #[error("Storage pool not found: {0}")]
    PoolNotFound(String),

    /// Host was not found.
    #[error("Host not found: {0}")]
    HostNotFound(String),

    /// Snapshot record was not found.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Volume lifecycle state machine rejected an event.
    #[error("Invalid volume state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage control plane call failed.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Record store failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Agent could not be reached.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Agent command did not answer in time.
    #[error("Operation timed out: {0}")]
    OperationTimedOut(String),

    /// Agent answered with a negative result.
    #[error("Agent command failed: {0}")]
    CommandFailed(String),

    /// Target attach/detach failed.
    #[error("Target connectivity error: {0}")]
    Connectivity(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataMotionError {
    /// Precondition failures are reported before any side effect happens.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::SameHost(_)
                | Self::UnsupportedHypervisor(_)
                | Self::MixedBackends(_)
                | Self::EncryptedVolume(_)
                | Self::EmptyRequest(_)
                | Self::NoStrategy(_)
                | Self::VolumeNotFound(_)
                | Self::PoolNotFound(_)
                | Self::HostNotFound(_)
        )
    }
}

/// Failures raised by the agent command channel itself.
///
/// Anything else an agent reports travels inside the answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The host's agent is disconnected or unreachable.
    #[error("agent on host {0} is unavailable")]
    AgentUnavailable(String),

    /// No answer within the allotted time.
    #[error("command to host {0} timed out after {1}s")]
    OperationTimedOut(String, u64),

    /// The command could not be delivered or its answer not decoded.
    #[error("transport failure talking to host {0}: {1}")]
    Transport(String, String),
}

impl From<ChannelError> for DataMotionError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::AgentUnavailable(_) => Self::AgentUnavailable(err.to_string()),
            ChannelError::OperationTimedOut(..) => Self::OperationTimedOut(err.to_string()),
            ChannelError::Transport(..) => Self::CommandFailed(err.to_string()),
        }
    }
}

/// Result type alias for data-motion operations.
pub type Result<T> = std::result::Result<T, DataMotionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        assert!(DataMotionError::SameHost("host-1".into()).is_precondition());
        assert!(DataMotionError::EncryptedVolume("vol-1".into()).is_precondition());
        assert!(!DataMotionError::Backend("boom".into()).is_precondition());
        assert!(!DataMotionError::OperationTimedOut("x".into()).is_precondition());
    }

    #[test]
    fn test_channel_error_conversion() {
        let err: DataMotionError = ChannelError::OperationTimedOut("7".into(), 30).into();
        assert!(matches!(err, DataMotionError::OperationTimedOut(_)));
        assert!(err.to_string().contains("timed out after 30s"));

        let err: DataMotionError = ChannelError::AgentUnavailable("7".into()).into();
        assert!(matches!(err, DataMotionError::AgentUnavailable(_)));

        let err: DataMotionError = ChannelError::Transport("7".into(), "bad frame".into()).into();
        assert!(matches!(err, DataMotionError::CommandFailed(_)));
    }
}
