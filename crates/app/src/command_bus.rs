//! In-process command status feed backed by a tokio broadcast channel.

use std::future::Future;

use tokio::sync::broadcast;

use growdash_domain::command::{Command, CommandStatus};
use growdash_domain::error::GrowdashError;
use growdash_domain::id::{CommandId, DeviceId};
use growdash_domain::time::Timestamp;

use crate::ports::CommandNotifier;

/// A command moved to a new status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatusChanged {
    pub command_id: CommandId,
    pub device_id: DeviceId,
    pub status: CommandStatus,
    pub result_message: Option<String>,
    pub at: Timestamp,
}

impl From<&Command> for CommandStatusChanged {
    fn from(command: &Command) -> Self {
        Self {
            command_id: command.id,
            device_id: command.device_id,
            status: command.status,
            result_message: command.result_message.clone(),
            at: command.updated_at,
        }
    }
}

/// In-process status feed using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the change is simply dropped).
pub struct InProcessCommandBus {
    sender: broadcast::Sender<CommandStatusChanged>,
}

impl InProcessCommandBus {
    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to status changes published *after* this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CommandStatusChanged> {
        self.sender.subscribe()
    }
}

impl CommandNotifier for InProcessCommandBus {
    fn command_status_changed(
        &self,
        command: &Command,
    ) -> impl Future<Output = Result<(), GrowdashError>> + Send {
        // Fails only with zero receivers.
        let _ = self.sender.send(CommandStatusChanged::from(command));
        async { Ok(()) }
    }
}
