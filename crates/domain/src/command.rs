//! Command: an instruction queued for a device agent, and its lifecycle.
//!
//! ```text
//! pending ──► executing ──► completed
//!    │            │
//!    └────────────┴───────► failed
//! ```
//!
//! `completed` and `failed` are terminal. `completed_at` is set exactly when
//! a command is terminal.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::action::CommandPayload;
use crate::error::{GrowdashError, TransitionError, ValidationError};
use crate::event::UnknownStatus;
use crate::id::{CommandId, DeviceId};
use crate::time::{Timestamp, whole_minutes};

/// Execution state of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl CommandStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine has an edge from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing | Self::Completed | Self::Failed)
                | (Self::Executing, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A command queued for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub command_type: String,
    pub params: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub result_message: Option<String>,
    /// Raw agent output (`output`, `error`, `stdout`, …) attached to the result.
    pub result_data: Option<serde_json::Value>,
}

impl Command {
    /// Materialize a freshly enqueued command.
    #[must_use]
    pub fn from_new(id: CommandId, new: NewCommand) -> Self {
        Self {
            id,
            device_id: new.device_id,
            command_type: new.command_type,
            params: new.params,
            status: CommandStatus::Pending,
            created_at: new.created_at,
            updated_at: new.created_at,
            completed_at: None,
            result_message: None,
            result_data: None,
        }
    }

    /// Timestamp that staleness is measured from in the current status:
    /// `created_at` while pending, `updated_at` otherwise.
    #[must_use]
    pub fn staleness_anchor(&self) -> Timestamp {
        match self.status {
            CommandStatus::Pending => self.created_at,
            _ => self.updated_at,
        }
    }

    /// Move to `next`, keeping `completed_at` in step with terminality.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the state machine has no such edge.
    pub fn transition(
        &mut self,
        next: CommandStatus,
        result_message: Option<String>,
        at: Timestamp,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        self.completed_at = next.is_terminal().then_some(at);
        if result_message.is_some() {
            self.result_message = result_message;
        }
        Ok(())
    }
}

/// A command about to be enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCommand {
    pub device_id: DeviceId,
    pub command_type: String,
    pub params: serde_json::Value,
    pub created_at: Timestamp,
}

impl NewCommand {
    /// Build a command, checking the type is set and params are an object.
    ///
    /// # Errors
    ///
    /// Returns [`GrowdashError::Validation`] for an empty type or
    /// non-object params.
    pub fn new(
        device_id: DeviceId,
        command_type: impl Into<String>,
        params: serde_json::Value,
        created_at: Timestamp,
    ) -> Result<Self, GrowdashError> {
        let command_type = command_type.into();
        if command_type.trim().is_empty() {
            return Err(ValidationError::EmptyCommandType.into());
        }
        let params = match params {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            serde_json::Value::Object(_) => params,
            _ => return Err(ValidationError::ParamsNotObject.into()),
        };
        Ok(Self {
            device_id,
            command_type,
            params,
            created_at,
        })
    }

    /// A pending command carrying a compiled payload.
    #[must_use]
    pub fn from_payload(payload: CommandPayload, created_at: Timestamp) -> Self {
        Self {
            device_id: payload.device_id,
            command_type: payload.command_type,
            params: payload.params,
            created_at,
        }
    }
}

/// Which non-terminal state a stuck command was reclaimed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The agent never picked the command up.
    Pending,
    /// The agent picked it up but never reported an outcome.
    Executing,
}

impl TimeoutKind {
    /// Timeout kind for a command currently in `status`, if it can time out.
    #[must_use]
    pub fn for_status(status: CommandStatus) -> Option<Self> {
        match status {
            CommandStatus::Pending => Some(Self::Pending),
            CommandStatus::Executing => Some(Self::Executing),
            CommandStatus::Completed | CommandStatus::Failed => None,
        }
    }

    /// The operator-facing failure message stored on the reclaimed command.
    #[must_use]
    pub fn result_message(self, threshold: TimeDelta) -> String {
        let minutes = whole_minutes(threshold);
        match self {
            Self::Pending => {
                format!("Timeout - Agent did not pick up command within {minutes} minutes")
            }
            Self::Executing => {
                format!("Execution timeout - Command stuck for more than {minutes} minutes")
            }
        }
    }
}
