//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`GrowdashError`] via `#[from]`. Storage adapters box their own error
//! type into [`GrowdashError::Storage`].

use crate::action::NoAction;
use crate::command::CommandStatus;
use crate::recurrence::RuleParseError;

/// Top-level error for domain and application operations.
#[derive(Debug, thiserror::Error)]
pub enum GrowdashError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A looked-up record does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// A command was asked to move along an edge the state machine forbids.
    #[error("invalid command transition")]
    InvalidTransition(#[from] TransitionError),

    /// The backing store could not be read or written.
    #[error("storage unavailable")]
    Storage(Box<dyn std::error::Error + Send + Sync>),
}

/// Domain invariant violations.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// An event title was empty.
    #[error("title must not be empty")]
    EmptyTitle,

    /// An event was built without a start time.
    #[error("start time is required")]
    MissingStartAt,

    /// `end_at` precedes `start_at`.
    #[error("end time must not precede start time")]
    EndBeforeStart,

    /// The stored recurrence rule cannot be parsed.
    #[error("invalid recurrence rule")]
    InvalidRecurrence(#[from] RuleParseError),

    /// A command type was empty.
    #[error("command type must not be empty")]
    EmptyCommandType,

    /// Command params must be a JSON object.
    #[error("command params must be a JSON object")]
    ParamsNotObject,

    /// A user-issued action does not compile to a device command.
    #[error("action does not compile to a command")]
    Uncompilable(#[from] NoAction),

    /// Reclaiming is only meaningful for non-terminal states.
    #[error("cannot reclaim commands in terminal state {0}")]
    TerminalReclaimState(CommandStatus),

    /// A command was reported by a device that does not own it.
    #[error("command does not belong to the reporting device")]
    ForeignCommand,
}

/// A record was not found in storage.
#[derive(Debug, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// A forbidden command status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition command from {from} to {to}")]
pub struct TransitionError {
    pub from: CommandStatus,
    pub to: CommandStatus,
}
