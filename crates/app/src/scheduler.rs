//! Event scheduler: fires due occurrences of calendar events.
//!
//! Each run loads the schedulable events, expands them over
//! `[now - radius, now + radius]`, drops occurrences at or before
//! `last_executed_at`, compiles the event's actions and hands every
//! remaining occurrence to the [`OccurrenceLedger`]. Per-event failures are
//! logged and counted; the run always continues with the next event.

use chrono::TimeDelta;

use growdash_domain::action::{self, CommandPayload};
use growdash_domain::command::NewCommand;
use growdash_domain::error::GrowdashError;
use growdash_domain::event::Event;
use growdash_domain::recurrence::Occurrence;
use growdash_domain::time::Timestamp;

use crate::ports::{EventStore, FireOutcome, OccurrenceFiring, OccurrenceLedger};

/// Whether a run writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Live,
    /// Compute and log what would fire; enqueue and mark nothing.
    DryRun,
}

/// Summary of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub events_considered: usize,
    pub occurrences_fired: usize,
    /// Commands enqueued (or, in a dry run, that would have been).
    pub enqueued: usize,
    /// Occurrences whose actions all compiled to nothing.
    pub skipped_no_action: usize,
    /// Occurrences another run claimed first.
    pub already_claimed: usize,
    /// Events abandoned because of a bad rule, an unreadable row or a store
    /// error.
    pub failures: usize,
    pub dry_run: bool,
}

/// Fires due occurrences through an [`OccurrenceLedger`].
pub struct EventScheduler<ES, L> {
    events: ES,
    ledger: L,
}

impl<ES, L> EventScheduler<ES, L>
where
    ES: EventStore,
    L: OccurrenceLedger,
{
    /// Create a scheduler reading from `events` and firing through `ledger`.
    pub fn new(events: ES, ledger: L) -> Self {
        Self { events, ledger }
    }

    /// Fire every due occurrence in `[now - window_radius, now + window_radius]`.
    ///
    /// # Errors
    ///
    /// Returns a storage error only when the due events cannot be loaded.
    /// Failures on individual events are counted in the report.
    pub async fn run_once(
        &self,
        now: Timestamp,
        window_radius: TimeDelta,
    ) -> Result<RunReport, GrowdashError> {
        self.run(now, window_radius, RunMode::Live).await
    }

    /// Like [`run_once`](Self::run_once) but writes nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the due events cannot be loaded.
    pub async fn dry_run(
        &self,
        now: Timestamp,
        window_radius: TimeDelta,
    ) -> Result<RunReport, GrowdashError> {
        self.run(now, window_radius, RunMode::DryRun).await
    }

    /// Run in the given mode.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the due events cannot be loaded.
    #[tracing::instrument(skip_all, fields(now = %now, ?mode))]
    pub async fn run(
        &self,
        now: Timestamp,
        window_radius: TimeDelta,
        mode: RunMode,
    ) -> Result<RunReport, GrowdashError> {
        let window_start = now
            .checked_sub_signed(window_radius)
            .unwrap_or(Timestamp::MIN_UTC);
        let window_end = now
            .checked_add_signed(window_radius)
            .unwrap_or(Timestamp::MAX_UTC);

        let due = self.events.find_due_events().await?;
        let mut report = RunReport {
            events_considered: due.matched(),
            failures: due.unreadable,
            dry_run: mode == RunMode::DryRun,
            ..RunReport::default()
        };

        for event in &due.events {
            if let Err(err) = self
                .fire_event(event, window_start, window_end, now, mode, &mut report)
                .await
            {
                tracing::error!(event_id = %event.id, error = %err, "failed to fire event");
                report.failures += 1;
            }
        }

        tracing::info!(
            events = report.events_considered,
            fired = report.occurrences_fired,
            enqueued = report.enqueued,
            skipped_no_action = report.skipped_no_action,
            failures = report.failures,
            dry_run = report.dry_run,
            "scheduler run finished"
        );
        Ok(report)
    }

    async fn fire_event(
        &self,
        event: &Event,
        window_start: Timestamp,
        window_end: Timestamp,
        now: Timestamp,
        mode: RunMode,
        report: &mut RunReport,
    ) -> Result<(), GrowdashError> {
        let occurrences = match event.occurrences(window_start, window_end) {
            Ok(occurrences) => occurrences,
            Err(err) => {
                tracing::warn!(
                    event_id = %event.id,
                    rule = event.recurrence_rule.as_deref().unwrap_or_default(),
                    error = %err,
                    "skipping event with invalid recurrence rule"
                );
                report.failures += 1;
                return Ok(());
            }
        };

        let mut last = event.last_executed_at;
        let new_status = event.status_after_firing();
        let payloads = compile_actions(event);
        for Occurrence { fire_time, .. } in occurrences {
            if last.is_some_and(|last| fire_time <= last) {
                continue;
            }

            if payloads.is_empty() {
                tracing::warn!(event_id = %event.id, %fire_time, "no actionable commands");
                report.skipped_no_action += 1;
                continue;
            }

            if mode == RunMode::DryRun {
                for payload in &payloads {
                    tracing::info!(
                        event_id = %event.id,
                        %fire_time,
                        device_id = %payload.device_id,
                        command_type = %payload.command_type,
                        params = %payload.params,
                        "would enqueue command"
                    );
                }
                report.occurrences_fired += 1;
                report.enqueued += payloads.len();
                last = Some(fire_time);
                continue;
            }

            let firing = OccurrenceFiring {
                event_id: event.id,
                expected_last: last,
                fire_time,
                new_status,
                commands: payloads
                    .iter()
                    .map(|p| NewCommand::from_payload(p.clone(), now))
                    .collect(),
            };
            match self.ledger.fire_occurrence(firing).await? {
                FireOutcome::Fired { command_ids } => {
                    tracing::info!(
                        event_id = %event.id,
                        %fire_time,
                        commands = command_ids.len(),
                        "occurrence fired"
                    );
                    report.occurrences_fired += 1;
                    report.enqueued += command_ids.len();
                    last = Some(fire_time);
                }
                FireOutcome::AlreadyClaimed => {
                    tracing::debug!(
                        event_id = %event.id,
                        %fire_time,
                        "occurrence claimed by a concurrent run"
                    );
                    report.already_claimed += 1;
                    break;
                }
            }
        }
        Ok(())
    }
}

fn compile_actions(event: &Event) -> Vec<CommandPayload> {
    event
        .action
        .as_slice()
        .iter()
        .filter_map(|a| match action::compile(a, event.device_id) {
            Ok(payload) => Some(payload),
            Err(reason) => {
                tracing::debug!(event_id = %event.id, %reason, "action skipped");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use growdash_domain::action::SERIAL_COMMAND;
    use growdash_domain::event::{EventAction, EventStatus};
    use growdash_domain::id::{DeviceId, EventId};

    use crate::memory::InMemoryStore;
    use crate::ports::{ClaimThenEnqueue, DueEvents};

    fn ts(d: u32, h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, d, h, m, 0).unwrap()
    }

    fn radius() -> TimeDelta {
        TimeDelta::minutes(5)
    }

    fn scheduler(
        store: &Arc<InMemoryStore>,
    ) -> EventScheduler<Arc<InMemoryStore>, Arc<InMemoryStore>> {
        EventScheduler::new(Arc::clone(store), Arc::clone(store))
    }

    fn spray_event(device: DeviceId, start: Timestamp) -> Event {
        Event::builder()
            .title("Mist")
            .device(device)
            .start_at(start)
            .action(EventAction::new("spray_pump").duration_ms(1000))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_fire_single_shot_event_once_and_complete_it() {
        let store = Arc::new(InMemoryStore::new());
        let device = DeviceId::new();
        let event = store
            .create(spray_event(device, ts(5, 10, 0)))
            .await
            .unwrap();
        let scheduler = scheduler(&store);

        let first = scheduler.run_once(ts(5, 10, 1), radius()).await.unwrap();
        let second = scheduler.run_once(ts(5, 10, 2), radius()).await.unwrap();

        assert_eq!(first.enqueued, 1);
        assert_eq!(second.enqueued, 0);
        let commands = store.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command_type, SERIAL_COMMAND);
        assert_eq!(commands[0].params, serde_json::json!({"command": "Spray 1000"}));
        assert_eq!(commands[0].device_id, device);
        let stored = EventStore::get_by_id(&*store, event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Completed);
        assert_eq!(stored.last_executed_at, Some(ts(5, 10, 0)));
    }

    #[tokio::test]
    async fn should_not_double_fire_recurring_event_on_rerun() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::builder()
            .title("Daily mist")
            .device(DeviceId::new())
            .start_at(ts(1, 8, 0))
            .recurrence("FREQ=DAILY")
            .action(EventAction::new("spray_pump"))
            .build()
            .unwrap();
        let event = store.create(event).await.unwrap();
        let scheduler = scheduler(&store);

        let first = scheduler.run_once(ts(3, 8, 1), radius()).await.unwrap();
        let rerun = scheduler.run_once(ts(3, 8, 1), radius()).await.unwrap();

        assert_eq!(first.occurrences_fired, 1);
        assert_eq!(rerun.enqueued, 0);
        let stored = EventStore::get_by_id(&*store, event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Scheduled);
        assert_eq!(stored.last_executed_at, Some(ts(3, 8, 0)));
    }

    #[tokio::test]
    async fn should_fire_next_recurrence_on_later_day() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::builder()
            .title("Every other day")
            .device(DeviceId::new())
            .start_at(ts(1, 8, 0))
            .recurrence("FREQ=DAILY;INTERVAL=2")
            .action(EventAction::new("fan"))
            .build()
            .unwrap();
        store.create(event).await.unwrap();
        let scheduler = scheduler(&store);

        let off_day = scheduler.run_once(ts(4, 8, 0), radius()).await.unwrap();
        let on_day = scheduler.run_once(ts(5, 8, 0), radius()).await.unwrap();

        assert_eq!(off_day.enqueued, 0);
        assert_eq!(on_day.enqueued, 1);
        assert_eq!(store.commands()[0].params["command"], "Fan 5000");
    }

    #[tokio::test]
    async fn should_skip_occurrences_before_last_execution() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::builder()
            .title("Minutely")
            .device(DeviceId::new())
            .start_at(ts(1, 8, 0))
            .recurrence("FREQ=MINUTELY")
            .last_executed_at(ts(1, 8, 10))
            .action(EventAction::new("light"))
            .build()
            .unwrap();
        store.create(event).await.unwrap();

        let report = scheduler(&store).run_once(ts(1, 8, 10), radius()).await.unwrap();

        // 08:11 ..= 08:15 remain in the window.
        assert_eq!(report.occurrences_fired, 5);
        assert_eq!(report.enqueued, 5);
    }

    #[tokio::test]
    async fn should_not_prevent_valid_event_when_another_rule_is_malformed() {
        let store = Arc::new(InMemoryStore::new());
        let mut broken = spray_event(DeviceId::new(), ts(5, 10, 0));
        broken.recurrence_rule = Some("FREQ=FORTNIGHTLY".into());
        store.create(broken).await.unwrap();
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();

        let report = scheduler(&store).run_once(ts(5, 10, 0), radius()).await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.enqueued, 1);
    }

    #[tokio::test]
    async fn should_skip_without_marking_when_no_action_compiles() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::builder()
            .title("Unknown gadget")
            .device(DeviceId::new())
            .start_at(ts(5, 10, 0))
            .action(EventAction::new("teleport"))
            .build()
            .unwrap();
        let event = store.create(event).await.unwrap();

        let report = scheduler(&store).run_once(ts(5, 10, 0), radius()).await.unwrap();

        assert_eq!(report.skipped_no_action, 1);
        assert_eq!(report.enqueued, 0);
        let stored = EventStore::get_by_id(&*store, event.id).await.unwrap().unwrap();
        assert_eq!(stored.last_executed_at, None);
        assert_eq!(stored.status, EventStatus::Scheduled);
    }

    #[tokio::test]
    async fn should_enqueue_one_command_per_compiled_action() {
        let store = Arc::new(InMemoryStore::new());
        let event = Event::builder()
            .title("Flush")
            .device(DeviceId::new())
            .start_at(ts(5, 10, 0))
            .action(EventAction::new("valve").param("state", "off"))
            .action(EventAction::new("fill_valve").duration_ms(6000))
            .action(EventAction::default())
            .build()
            .unwrap();
        store.create(event).await.unwrap();

        let report = scheduler(&store).run_once(ts(5, 10, 0), radius()).await.unwrap();

        assert_eq!(report.enqueued, 2);
        let lines: Vec<_> = store
            .commands()
            .iter()
            .map(|c| c.params["command"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(lines, vec!["TabOFF", "FillL 0.60"]);
    }

    #[tokio::test]
    async fn should_write_nothing_in_dry_run() {
        let store = Arc::new(InMemoryStore::new());
        let event = store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();

        let report = scheduler(&store).dry_run(ts(5, 10, 0), radius()).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.enqueued, 1);
        assert!(store.commands().is_empty());
        let stored = EventStore::get_by_id(&*store, event.id).await.unwrap().unwrap();
        assert_eq!(stored.last_executed_at, None);
    }

    #[tokio::test]
    async fn should_ignore_events_outside_the_window() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();

        let report = scheduler(&store).run_once(ts(5, 10, 6), radius()).await.unwrap();

        assert_eq!(report.events_considered, 1);
        assert_eq!(report.enqueued, 0);
    }

    #[tokio::test]
    async fn should_fire_through_claim_then_enqueue_ledger() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();
        let ledger = ClaimThenEnqueue::new(Arc::clone(&store), Arc::clone(&store));
        let scheduler = EventScheduler::new(Arc::clone(&store), ledger);

        let first = scheduler.run_once(ts(5, 10, 0), radius()).await.unwrap();
        let second = scheduler.run_once(ts(5, 10, 0), radius()).await.unwrap();

        assert_eq!(first.enqueued, 1);
        assert_eq!(second.enqueued, 0);
        assert_eq!(store.commands().len(), 1);
    }

    /// Ledger that loses every race, as if a concurrent run claimed first.
    struct AlwaysClaimed;

    impl OccurrenceLedger for AlwaysClaimed {
        fn fire_occurrence(
            &self,
            _firing: OccurrenceFiring,
        ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send {
            async { Ok(FireOutcome::AlreadyClaimed) }
        }
    }

    #[tokio::test]
    async fn should_count_occurrences_claimed_by_concurrent_run() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();

        let report = EventScheduler::new(Arc::clone(&store), AlwaysClaimed)
            .run_once(ts(5, 10, 0), radius())
            .await
            .unwrap();

        assert_eq!(report.already_claimed, 1);
        assert_eq!(report.enqueued, 0);
    }

    /// Ledger whose backing store is down for one event.
    struct FailingFor(EventId, Arc<InMemoryStore>);

    impl OccurrenceLedger for FailingFor {
        fn fire_occurrence(
            &self,
            firing: OccurrenceFiring,
        ) -> impl Future<Output = Result<FireOutcome, GrowdashError>> + Send {
            let fail = firing.event_id == self.0;
            let store = Arc::clone(&self.1);
            async move {
                if fail {
                    return Err(GrowdashError::Storage("database is locked".into()));
                }
                store.fire_occurrence(firing).await
            }
        }
    }

    #[tokio::test]
    async fn should_continue_after_store_error_on_one_event() {
        let store = Arc::new(InMemoryStore::new());
        let doomed = store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 1)))
            .await
            .unwrap();

        let report = EventScheduler::new(
            Arc::clone(&store),
            FailingFor(doomed.id, Arc::clone(&store)),
        )
        .run_once(ts(5, 10, 0), radius())
        .await
        .unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.enqueued, 1);
    }

    /// Event store whose backing table holds rows it cannot decode.
    struct WithUnreadableRows(Arc<InMemoryStore>, usize);

    impl EventStore for WithUnreadableRows {
        fn create(
            &self,
            event: Event,
        ) -> impl Future<Output = Result<Event, GrowdashError>> + Send {
            self.0.create(event)
        }

        fn get_by_id(
            &self,
            id: EventId,
        ) -> impl Future<Output = Result<Option<Event>, GrowdashError>> + Send {
            EventStore::get_by_id(&*self.0, id)
        }

        fn find_due_events(&self) -> impl Future<Output = Result<DueEvents, GrowdashError>> + Send {
            let store = Arc::clone(&self.0);
            let unreadable = self.1;
            async move {
                let mut due = store.find_due_events().await?;
                due.unreadable += unreadable;
                Ok(due)
            }
        }

        fn save_execution(
            &self,
            event_id: EventId,
            expected_last: Option<Timestamp>,
            fire_time: Timestamp,
            new_status: EventStatus,
        ) -> impl Future<Output = Result<bool, GrowdashError>> + Send {
            self.0.save_execution(event_id, expected_last, fire_time, new_status)
        }

        fn cancel(&self, id: EventId) -> impl Future<Output = Result<(), GrowdashError>> + Send {
            self.0.cancel(id)
        }
    }

    #[tokio::test]
    async fn should_count_unreadable_rows_as_failures_and_fire_the_rest() {
        let store = Arc::new(InMemoryStore::new());
        store
            .create(spray_event(DeviceId::new(), ts(5, 10, 0)))
            .await
            .unwrap();
        let events = WithUnreadableRows(Arc::clone(&store), 2);

        let report = EventScheduler::new(events, Arc::clone(&store))
            .run_once(ts(5, 10, 0), radius())
            .await
            .unwrap();

        assert_eq!(report.events_considered, 3);
        assert_eq!(report.failures, 2);
        assert_eq!(report.enqueued, 1);
        assert_eq!(store.commands().len(), 1);
    }
}
