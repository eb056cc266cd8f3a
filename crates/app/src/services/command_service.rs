//! Command service: use-cases driven by users and device agents.

use growdash_domain::action;
use growdash_domain::command::{Command, CommandStatus, NewCommand};
use growdash_domain::error::{GrowdashError, NotFoundError, TransitionError, ValidationError};
use growdash_domain::event::EventAction;
use growdash_domain::id::{CommandId, DeviceId};
use growdash_domain::time::Timestamp;

use crate::ports::{CommandNotifier, CommandStore, CommandTransition, TransitionOutcome};

/// Application service for sending commands and recording agent results.
pub struct CommandService<CS, N> {
    commands: CS,
    notifier: N,
}

impl<CS, N> CommandService<CS, N>
where
    CS: CommandStore,
    N: CommandNotifier,
{
    /// Create a new service backed by the given store and notifier.
    pub fn new(commands: CS, notifier: N) -> Self {
        Self { commands, notifier }
    }

    /// Compile a user-issued action for `device` and enqueue it.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Uncompilable`] when the action yields no
    /// command, or a storage error from the store.
    #[tracing::instrument(skip(self, action), fields(kind = action.kind.as_deref()))]
    pub async fn send(
        &self,
        device: DeviceId,
        action: &EventAction,
        now: Timestamp,
    ) -> Result<Command, GrowdashError> {
        let payload = action::compile(action, Some(device)).map_err(ValidationError::from)?;
        let new = NewCommand::from_payload(payload, now);
        let id = self.commands.enqueue(new.clone()).await?;
        let command = Command::from_new(id, new);
        tracing::info!(command_id = %id, command_type = %command.command_type, "command enqueued");
        self.notify(&command).await;
        Ok(command)
    }

    /// Look up a command by id, returning an error if not found.
    ///
    /// # Errors
    ///
    /// Returns [`GrowdashError::NotFound`] when no command with `id` exists,
    /// or a storage error from the store.
    pub async fn get_command(&self, id: CommandId) -> Result<Command, GrowdashError> {
        self.commands.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Command",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// The agent's work queue: pending commands for `device`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the store.
    pub async fn pending_for_device(
        &self,
        device: DeviceId,
    ) -> Result<Vec<Command>, GrowdashError> {
        self.commands
            .find_by_device(device, Some(CommandStatus::Pending))
            .await
    }

    /// Record a status reported by the agent that owns the command.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - [`GrowdashError::NotFound`] for an unknown command
    /// - [`ValidationError::ForeignCommand`] when `device` does not own it
    /// - [`GrowdashError::InvalidTransition`] when the state machine forbids
    ///   the change, including when a concurrent writer moved it first
    #[tracing::instrument(skip(self, result_message, result_data))]
    pub async fn report_result(
        &self,
        command_id: CommandId,
        device: DeviceId,
        status: CommandStatus,
        result_message: Option<String>,
        result_data: Option<serde_json::Value>,
        now: Timestamp,
    ) -> Result<Command, GrowdashError> {
        let mut command = self.get_command(command_id).await?;
        if command.device_id != device {
            return Err(ValidationError::ForeignCommand.into());
        }
        let expected = command.status;
        command.transition(status, result_message.clone(), now)?;

        let mut transition = CommandTransition::new(command_id, expected, status, now);
        transition.result_message = result_message;
        transition.result_data = result_data;

        match self.commands.transition(transition).await? {
            TransitionOutcome::Applied(updated) => {
                tracing::info!(command_id = %command_id, %status, "command result recorded");
                self.notify(&updated).await;
                Ok(updated)
            }
            TransitionOutcome::Conflict => {
                let current = self.get_command(command_id).await?;
                Err(TransitionError {
                    from: current.status,
                    to: status,
                }
                .into())
            }
        }
    }

    async fn notify(&self, command: &Command) {
        if let Err(err) = self.notifier.command_status_changed(command).await {
            tracing::warn!(command_id = %command.id, error = %err, "notification failed");
        }
    }
}
