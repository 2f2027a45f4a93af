//! Completion delivery for migration tasks.

use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::{DataMotionError, Result};
use crate::types::VolumeId;

/// Final outcome of a migration task.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationResult {
    pub success: bool,
    /// Diagnostic on failure, or the volumes left unpromoted on success
    pub details: Option<String>,
    /// Classified failure, when there is one
    pub error: Option<DataMotionError>,
    /// Retired source volume id -> promoted volume id
    pub promoted: BTreeMap<VolumeId, VolumeId>,
}

impl MigrationResult {
    pub fn succeeded(promoted: BTreeMap<VolumeId, VolumeId>) -> Self {
        Self {
            success: true,
            details: None,
            error: None,
            promoted,
        }
    }

    pub fn failed(error: DataMotionError) -> Self {
        Self {
            success: false,
            details: Some(error.to_string()),
            error: Some(error),
            promoted: BTreeMap::new(),
        }
    }

    /// Failure with a bare diagnostic.
    pub fn failed_with(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
            error: None,
            promoted: BTreeMap::new(),
        }
    }
}

/// Receives the single result of a migration task.
#[derive(Debug)]
pub struct CompletionSignal {
    rx: oneshot::Receiver<MigrationResult>,
}

impl CompletionSignal {
    /// Run `task` on the runtime and deliver its result exactly once.
    ///
    /// A panicking task still completes the signal, with a failure.
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = MigrationResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(panic = %message, "Migration task panicked");
                    MigrationResult::failed(DataMotionError::Internal(format!(
                        "migration task panicked: {}",
                        message
                    )))
                }
            };

            // The receiver may have been dropped; nobody is left to tell.
            let _ = tx.send(result);
        });

        Self { rx }
    }

    /// Wait for the task's result.
    pub async fn wait(self) -> MigrationResult {
        self.rx.await.unwrap_or_else(|_| {
            MigrationResult::failed(DataMotionError::Internal(
                "migration task ended without reporting a result".into(),
            ))
        })
    }
}

/// Await one phase of a task, turning a panic into an internal error so
/// the task still settles and cleans up.
pub(crate) async fn guard_phase<F>(phase: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(phase).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(panic = %message, "Migration phase panicked");
            Err(DataMotionError::Internal(format!(
                "migration phase panicked: {}",
                message
            )))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_delivers_result() {
        let signal = CompletionSignal::spawn(async { MigrationResult::succeeded(BTreeMap::new()) });
        let result = signal.wait().await;
        assert!(result.success);
        assert!(result.details.is_none());
    }

    #[tokio::test]
    async fn test_signal_survives_panic() {
        let signal = CompletionSignal::spawn(async {
            if true {
                panic!("phase exploded");
            }
            MigrationResult::succeeded(BTreeMap::new())
        });

        let result = signal.wait().await;
        assert!(!result.success);
        assert!(result.details.unwrap().contains("phase exploded"));
        assert!(matches!(result.error, Some(DataMotionError::Internal(_))));
    }

    #[tokio::test]
    async fn test_guard_phase_converts_panic() {
        let outcome = guard_phase(async {
            if true {
                panic!("clone exploded");
            }
            Ok(())
        })
        .await;

        let err = outcome.unwrap_err();
        assert!(matches!(err, DataMotionError::Internal(_)));
        assert!(err.to_string().contains("clone exploded"));
    }

    #[tokio::test]
    async fn test_guard_phase_passes_errors_through() {
        let outcome = guard_phase(async { Err(DataMotionError::Backend("full".into())) }).await;
        assert_eq!(outcome, Err(DataMotionError::Backend("full".into())));
    }
}
