//! Command store port: the device command queue.

use std::future::Future;
use std::sync::Arc;

use growdash_domain::command::{Command, CommandStatus, NewCommand};
use growdash_domain::error::GrowdashError;
use growdash_domain::id::{CommandId, DeviceId};
use growdash_domain::time::Timestamp;

/// A conditional status change: applied only while the command is still in
/// `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTransition {
    pub id: CommandId,
    pub expected: CommandStatus,
    pub next: CommandStatus,
    pub result_message: Option<String>,
    pub result_data: Option<serde_json::Value>,
    pub at: Timestamp,
}

impl CommandTransition {
    #[must_use]
    pub fn new(id: CommandId, expected: CommandStatus, next: CommandStatus, at: Timestamp) -> Self {
        Self {
            id,
            expected,
            next,
            result_message: None,
            result_data: None,
            at,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.result_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.result_data = Some(data);
        self
    }

    /// `completed_at` the stored row gets: `at` for terminal targets.
    #[must_use]
    pub fn completed_at(&self) -> Option<Timestamp> {
        self.next.is_terminal().then_some(self.at)
    }
}

/// Result of a [`CommandStore::transition`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The row was updated; carries the command as now stored.
    Applied(Command),
    /// The row was no longer in the expected status (or is gone).
    Conflict,
}

/// Repository for the device command queue.
pub trait CommandStore {
    /// Insert a new pending command.
    fn enqueue(
        &self,
        command: NewCommand,
    ) -> impl Future<Output = Result<CommandId, GrowdashError>> + Send;

    /// Get a command by its unique identifier.
    fn get_by_id(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, GrowdashError>> + Send;

    /// Commands in `status` whose staleness anchor is strictly older than
    /// `threshold` (`created_at` for pending, `updated_at` otherwise), oldest first.
    fn find_stale(
        &self,
        status: CommandStatus,
        threshold: Timestamp,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send;

    /// Commands addressed to `device`, optionally filtered by status, oldest first.
    fn find_by_device(
        &self,
        device: DeviceId,
        status: Option<CommandStatus>,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send;

    /// Apply `transition` if the command is still in its expected status.
    ///
    /// Does not check the state machine; callers do.
    fn transition(
        &self,
        transition: CommandTransition,
    ) -> impl Future<Output = Result<TransitionOutcome, GrowdashError>> + Send;
}

impl<T: CommandStore + Send + Sync> CommandStore for Arc<T> {
    fn enqueue(
        &self,
        command: NewCommand,
    ) -> impl Future<Output = Result<CommandId, GrowdashError>> + Send {
        (**self).enqueue(command)
    }

    fn get_by_id(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, GrowdashError>> + Send {
        (**self).get_by_id(id)
    }

    fn find_stale(
        &self,
        status: CommandStatus,
        threshold: Timestamp,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
        (**self).find_stale(status, threshold)
    }

    fn find_by_device(
        &self,
        device: DeviceId,
        status: Option<CommandStatus>,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
        (**self).find_by_device(device, status)
    }

    fn transition(
        &self,
        transition: CommandTransition,
    ) -> impl Future<Output = Result<TransitionOutcome, GrowdashError>> + Send {
        (**self).transition(transition)
    }
}
