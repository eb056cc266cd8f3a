//! Occurrence ledger port: claim an occurrence and enqueue its commands as
//! one step.
//!
//! Overlapping scheduler runs may see the same due occurrence. Exactly one of
//! them must win the claim, and the winner's commands must land with it.

use std::future::Future;
use std::sync::Arc;

use growdash_domain::command::NewCommand;
use growdash_domain::error::GrowdashError;
use growdash_domain::event::EventStatus;
use growdash_domain::id::{CommandId, EventId};
use growdash_domain::time::Timestamp;

use crate::ports::{CommandStore, EventStore};

/// Everything needed to fire one occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct OccurrenceFiring {
    pub event_id: EventId,
    /// `last_executed_at` as read when the occurrence was computed.
    pub expected_last: Option<Timestamp>,
    pub fire_time: Timestamp,
    pub new_status: EventStatus,
    pub commands: Vec<NewCommand>,
}

/// Result of [`OccurrenceLedger::fire_occurrence`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The claim succeeded and these commands were enqueued.
    Fired { command_ids: Vec<CommandId> },
    /// `last_executed_at` moved since it was read; nothing was written.
    AlreadyClaimed,
}

/// Atomically claims an occurrence and enqueues its commands.
pub trait OccurrenceLedger {
    /// Claim `firing.fire_time` for the event and enqueue `firing.commands`.
    fn fire_occurrence(
        &self,
        firing: OccurrenceFiring,
    ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send;
}

impl<T: OccurrenceLedger + Send + Sync> OccurrenceLedger for Arc<T> {
    fn fire_occurrence(
        &self,
        firing: OccurrenceFiring,
    ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send {
        (**self).fire_occurrence(firing)
    }
}

/// Ledger for stores without shared transactions: claim first through the
/// conditional [`EventStore::save_execution`], then enqueue.
///
/// A crash between the two steps loses that occurrence's commands, so an
/// occurrence fires at most once, never twice.
pub struct ClaimThenEnqueue<E, C> {
    events: E,
    commands: C,
}

impl<E, C> ClaimThenEnqueue<E, C> {
    pub fn new(events: E, commands: C) -> Self {
        Self { events, commands }
    }
}

impl<E, C> OccurrenceLedger for ClaimThenEnqueue<E, C>
where
    E: EventStore + Send + Sync,
    C: CommandStore + Send + Sync,
{
    fn fire_occurrence(
        &self,
        firing: OccurrenceFiring,
    ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send {
        async move {
            let claimed = self
                .events
                .save_execution(
                    firing.event_id,
                    firing.expected_last,
                    firing.fire_time,
                    firing.new_status,
                )
                .await?;
            if !claimed {
                return Ok(FireOutcome::AlreadyClaimed);
            }

            let mut command_ids = Vec::with_capacity(firing.commands.len());
            for command in firing.commands {
                match self.commands.enqueue(command).await {
                    Ok(id) => command_ids.push(id),
                    Err(err) => {
                        tracing::error!(
                            event_id = %firing.event_id,
                            fire_time = %firing.fire_time,
                            enqueued = command_ids.len(),
                            error = %err,
                            "occurrence claimed but enqueue failed"
                        );
                        return Err(err);
                    }
                }
            }
            Ok(FireOutcome::Fired { command_ids })
        }
    }
}
