//! In-memory store implementing every storage port.
//!
//! Backs use-case tests without a database. One mutex guards
//! all state, so [`OccurrenceLedger::fire_occurrence`] is atomic here too.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use growdash_domain::command::{Command, CommandStatus, NewCommand};
use growdash_domain::error::{GrowdashError, NotFoundError};
use growdash_domain::event::{Event, EventStatus};
use growdash_domain::id::{CommandId, DeviceId, EventId};
use growdash_domain::time::Timestamp;

use crate::ports::{
    CommandStore, CommandTransition, DueEvents, EventStore, FireOutcome, OccurrenceFiring,
    OccurrenceLedger, TransitionOutcome,
};

#[derive(Default)]
struct State {
    events: HashMap<EventId, Event>,
    /// Kept in enqueue order.
    commands: Vec<Command>,
}

impl State {
    fn claim(
        &mut self,
        event_id: EventId,
        expected_last: Option<Timestamp>,
        fire_time: Timestamp,
        new_status: EventStatus,
    ) -> bool {
        match self.events.get_mut(&event_id) {
            Some(event) if event.last_executed_at == expected_last => {
                event.last_executed_at = Some(fire_time);
                event.status = new_status;
                true
            }
            _ => false,
        }
    }

    fn enqueue(&mut self, command: NewCommand) -> CommandId {
        let id = CommandId::new();
        self.commands.push(Command::from_new(id, command));
        id
    }
}

/// Thread-safe in-memory events and commands.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every command, in enqueue order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventStore for InMemoryStore {
    fn create(&self, event: Event) -> impl Future<Output = Result<Event, GrowdashError>> + Send {
        self.lock().events.insert(event.id, event.clone());
        async move { Ok(event) }
    }

    fn get_by_id(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, GrowdashError>> + Send {
        let found = self.lock().events.get(&id).cloned();
        async move { Ok(found) }
    }

    fn find_due_events(&self) -> impl Future<Output = Result<DueEvents, GrowdashError>> + Send {
        let mut due: Vec<Event> = self
            .lock()
            .events
            .values()
            .filter(|e| e.is_schedulable())
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.start_at, e.id));
        async move {
            Ok(DueEvents {
                events: due,
                unreadable: 0,
            })
        }
    }

    fn save_execution(
        &self,
        event_id: EventId,
        expected_last: Option<Timestamp>,
        fire_time: Timestamp,
        new_status: EventStatus,
    ) -> impl Future<Output = Result<bool, GrowdashError>> + Send {
        let claimed = self
            .lock()
            .claim(event_id, expected_last, fire_time, new_status);
        async move { Ok(claimed) }
    }

    fn cancel(&self, id: EventId) -> impl Future<Output = Result<(), GrowdashError>> + Send {
        let result = match self.lock().events.get_mut(&id) {
            Some(event) => {
                event.cancel();
                Ok(())
            }
            None => Err(NotFoundError {
                entity: "Event",
                id: id.to_string(),
            }
            .into()),
        };
        async move { result }
    }
}

impl CommandStore for InMemoryStore {
    fn enqueue(
        &self,
        command: NewCommand,
    ) -> impl Future<Output = Result<CommandId, GrowdashError>> + Send {
        let id = self.lock().enqueue(command);
        async move { Ok(id) }
    }

    fn get_by_id(
        &self,
        id: CommandId,
    ) -> impl Future<Output = Result<Option<Command>, GrowdashError>> + Send {
        let found = self.lock().commands.iter().find(|c| c.id == id).cloned();
        async move { Ok(found) }
    }

    fn find_stale(
        &self,
        status: CommandStatus,
        threshold: Timestamp,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
        let mut stale: Vec<Command> = self
            .lock()
            .commands
            .iter()
            .filter(|c| c.status == status && c.staleness_anchor() < threshold)
            .cloned()
            .collect();
        stale.sort_by_key(Command::staleness_anchor);
        async move { Ok(stale) }
    }

    fn find_by_device(
        &self,
        device: DeviceId,
        status: Option<CommandStatus>,
    ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
        let found: Vec<Command> = self
            .lock()
            .commands
            .iter()
            .filter(|c| c.device_id == device && status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        async move { Ok(found) }
    }

    fn transition(
        &self,
        transition: CommandTransition,
    ) -> impl Future<Output = Result<TransitionOutcome, GrowdashError>> + Send {
        let completed_at = transition.completed_at();
        let mut state = self.lock();
        let outcome = match state
            .commands
            .iter_mut()
            .find(|c| c.id == transition.id && c.status == transition.expected)
        {
            Some(command) => {
                command.status = transition.next;
                command.updated_at = transition.at;
                command.completed_at = completed_at;
                if transition.result_message.is_some() {
                    command.result_message = transition.result_message;
                }
                if transition.result_data.is_some() {
                    command.result_data = transition.result_data;
                }
                TransitionOutcome::Applied(command.clone())
            }
            None => TransitionOutcome::Conflict,
        };
        drop(state);
        async move { Ok(outcome) }
    }
}

impl OccurrenceLedger for InMemoryStore {
    fn fire_occurrence(
        &self,
        firing: OccurrenceFiring,
    ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send {
        let mut state = self.lock();
        let claimed = state.claim(
            firing.event_id,
            firing.expected_last,
            firing.fire_time,
            firing.new_status,
        );
        let outcome = if claimed {
            let command_ids = firing
                .commands
                .into_iter()
                .map(|c| state.enqueue(c))
                .collect();
            FireOutcome::Fired { command_ids }
        } else {
            FireOutcome::AlreadyClaimed
        };
        drop(state);
        async move { Ok(outcome) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use growdash_domain::event::EventAction;

    fn at(m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, m, 0).unwrap()
    }

    fn event(device: Option<DeviceId>) -> Event {
        let mut builder = Event::builder()
            .title("Mist")
            .start_at(at(0))
            .action(EventAction::new("spray_pump"));
        if let Some(device) = device {
            builder = builder.device(device);
        }
        builder.build().unwrap()
    }

    fn new_command(device: DeviceId, m: u32) -> NewCommand {
        NewCommand::new(device, "turn_on", serde_json::json!({}), at(m)).unwrap()
    }

    #[tokio::test]
    async fn should_only_return_schedulable_events_as_due() {
        let store = InMemoryStore::new();
        let linked = store.create(event(Some(DeviceId::new()))).await.unwrap();
        store.create(event(None)).await.unwrap();
        let canceled = store.create(event(Some(DeviceId::new()))).await.unwrap();
        store.cancel(canceled.id).await.unwrap();

        let due = store.find_due_events().await.unwrap();
        assert_eq!(due.unreadable, 0);
        assert_eq!(due.events.len(), 1);
        assert_eq!(due.events[0].id, linked.id);
    }

    #[tokio::test]
    async fn should_refuse_save_execution_with_stale_expectation() {
        let store = InMemoryStore::new();
        let ev = store.create(event(Some(DeviceId::new()))).await.unwrap();

        let first = store
            .save_execution(ev.id, None, at(0), EventStatus::Completed)
            .await
            .unwrap();
        let second = store
            .save_execution(ev.id, None, at(0), EventStatus::Completed)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        let stored = EventStore::get_by_id(&store, ev.id).await.unwrap().unwrap();
        assert_eq!(stored.last_executed_at, Some(at(0)));
        assert_eq!(stored.status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn should_report_missing_event_on_cancel() {
        let store = InMemoryStore::new();
        let result = store.cancel(EventId::new()).await;
        assert!(matches!(result, Err(GrowdashError::NotFound(_))));
    }

    #[tokio::test]
    async fn should_find_stale_commands_strictly_older_than_threshold() {
        let store = InMemoryStore::new();
        let device = DeviceId::new();
        let old = store.enqueue(new_command(device, 0)).await.unwrap();
        store.enqueue(new_command(device, 5)).await.unwrap();

        let stale = store
            .find_stale(CommandStatus::Pending, at(5))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old);
    }

    #[tokio::test]
    async fn should_conflict_when_command_left_expected_status() {
        let store = InMemoryStore::new();
        let id = store.enqueue(new_command(DeviceId::new(), 0)).await.unwrap();

        let applied = store
            .transition(CommandTransition::new(
                id,
                CommandStatus::Pending,
                CommandStatus::Executing,
                at(1),
            ))
            .await
            .unwrap();
        let conflict = store
            .transition(CommandTransition::new(
                id,
                CommandStatus::Pending,
                CommandStatus::Failed,
                at(2),
            ))
            .await
            .unwrap();

        assert!(matches!(applied, TransitionOutcome::Applied(ref c) if c.completed_at.is_none()));
        assert_eq!(conflict, TransitionOutcome::Conflict);
    }

    #[tokio::test]
    async fn should_filter_commands_by_device_and_status() {
        let store = InMemoryStore::new();
        let device = DeviceId::new();
        let id = store.enqueue(new_command(device, 0)).await.unwrap();
        store.enqueue(new_command(device, 1)).await.unwrap();
        store.enqueue(new_command(DeviceId::new(), 2)).await.unwrap();
        store
            .transition(CommandTransition::new(
                id,
                CommandStatus::Pending,
                CommandStatus::Completed,
                at(3),
            ))
            .await
            .unwrap();

        let all = store.find_by_device(device, None).await.unwrap();
        let pending = store
            .find_by_device(device, Some(CommandStatus::Pending))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn should_claim_and_enqueue_in_one_step() {
        let store = InMemoryStore::new();
        let device = DeviceId::new();
        let ev = store.create(event(Some(device))).await.unwrap();
        let firing = OccurrenceFiring {
            event_id: ev.id,
            expected_last: None,
            fire_time: at(0),
            new_status: EventStatus::Completed,
            commands: vec![new_command(device, 0), new_command(device, 0)],
        };

        let first = store.fire_occurrence(firing.clone()).await.unwrap();
        let second = store.fire_occurrence(firing).await.unwrap();

        assert!(matches!(first, FireOutcome::Fired { ref command_ids } if command_ids.len() == 2));
        assert_eq!(second, FireOutcome::AlreadyClaimed);
        assert_eq!(store.commands().len(), 2);
    }
}
