//! Agent command channel.
//!
//! Sends a typed command to one host's agent and waits for its answer.
//! Transport problems surface as [`ChannelError`]; everything the agent
//! itself reports travels inside [`Answer`].

mod commands;

pub use commands::*;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::types::HostId;

/// Synchronous request/answer channel to host agents.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Send `command` to the agent on `host_id` and await its answer.
    async fn send(&self, host_id: HostId, command: AgentCommand) -> Result<Answer, ChannelError>;
}

/// Send a command, converting an overrun of `timeout` into
/// [`ChannelError::OperationTimedOut`].
pub async fn send_with_timeout(
    channel: &dyn AgentChannel,
    host_id: HostId,
    command: AgentCommand,
    timeout: Duration,
) -> Result<Answer, ChannelError> {
    let name = command.name();
    debug!(host_id = %host_id, command = name, timeout_secs = timeout.as_secs(), "Sending agent command");

    match tokio::time::timeout(timeout, channel.send(host_id, command)).await {
        Ok(Ok(answer)) => {
            debug!(host_id = %host_id, command = name, result = answer.result, details = %answer.details, "Agent answered");
            Ok(answer)
        }
        Ok(Err(e)) => {
            warn!(host_id = %host_id, command = name, error = %e, "Agent command failed");
            Err(e)
        }
        Err(_) => {
            warn!(host_id = %host_id, command = name, "Agent command timed out");
            Err(ChannelError::OperationTimedOut(host_id.to_string(), timeout.as_secs()))
        }
    }
}
