//! Command lifecycle: reclaims commands no agent finished in time.
//!
//! A pending command older than the pending timeout was never picked up; an
//! executing command not updated within the executing timeout is stuck. Both
//! are moved to `failed` with a fixed message, one conditional write each, so
//! a command that advanced in the meantime is left alone.

use chrono::TimeDelta;

use growdash_domain::command::{CommandStatus, TimeoutKind};
use growdash_domain::error::{GrowdashError, ValidationError};
use growdash_domain::id::CommandId;
use growdash_domain::time::{Timestamp, minutes};

use crate::ports::{CommandNotifier, CommandStore, CommandTransition, TransitionOutcome};

/// Staleness thresholds for both sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub pending_timeout: TimeDelta,
    pub executing_timeout: TimeDelta,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            pending_timeout: minutes(5),
            executing_timeout: minutes(10),
        }
    }
}

/// Summary of a reclaim sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub reclaimed: Vec<CommandId>,
    /// Commands that left the swept status before they could be reclaimed.
    pub conflicts: usize,
    pub failures: usize,
}

impl ReclaimReport {
    fn merge(&mut self, other: Self) {
        self.reclaimed.extend(other.reclaimed);
        self.conflicts += other.conflicts;
        self.failures += other.failures;
    }
}

/// Times out stuck commands and announces each one.
pub struct CommandLifecycle<CS, N> {
    commands: CS,
    notifier: N,
    config: LifecycleConfig,
}

impl<CS, N> CommandLifecycle<CS, N>
where
    CS: CommandStore,
    N: CommandNotifier,
{
    pub fn new(commands: CS, notifier: N, config: LifecycleConfig) -> Self {
        Self {
            commands,
            notifier,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    /// Fail every `from_state` command that has been stale longer than
    /// `stale_threshold`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TerminalReclaimState`] for a terminal
    /// `from_state`, or a storage error when the stale commands cannot be
    /// listed. Failures on individual commands are counted in the report.
    #[tracing::instrument(skip_all, fields(now = %now, from = %from_state, ?stale_threshold))]
    pub async fn reclaim_timed_out(
        &self,
        now: Timestamp,
        stale_threshold: TimeDelta,
        from_state: CommandStatus,
    ) -> Result<ReclaimReport, GrowdashError> {
        let kind = TimeoutKind::for_status(from_state)
            .ok_or(ValidationError::TerminalReclaimState(from_state))?;
        let message = kind.result_message(stale_threshold);
        let threshold = now
            .checked_sub_signed(stale_threshold)
            .unwrap_or(Timestamp::MIN_UTC);

        let stale = self.commands.find_stale(from_state, threshold).await?;
        let mut report = ReclaimReport::default();

        for command in stale {
            let transition =
                CommandTransition::new(command.id, from_state, CommandStatus::Failed, now)
                    .with_message(message.clone());
            match self.commands.transition(transition).await {
                Ok(TransitionOutcome::Applied(updated)) => {
                    tracing::warn!(
                        command_id = %updated.id,
                        device_id = %updated.device_id,
                        command_type = %updated.command_type,
                        "{message}"
                    );
                    report.reclaimed.push(updated.id);
                    if let Err(err) = self.notifier.command_status_changed(&updated).await {
                        tracing::warn!(
                            command_id = %updated.id,
                            error = %err,
                            "notification failed"
                        );
                    }
                }
                Ok(TransitionOutcome::Conflict) => {
                    tracing::debug!(command_id = %command.id, "command moved on before reclaim");
                    report.conflicts += 1;
                }
                Err(err) => {
                    tracing::error!(
                        command_id = %command.id,
                        error = %err,
                        "failed to reclaim command"
                    );
                    report.failures += 1;
                }
            }
        }

        if !report.reclaimed.is_empty() {
            tracing::info!(count = report.reclaimed.len(), "reclaimed timed out commands");
        }
        Ok(report)
    }

    /// Sweep pending commands with the configured pending timeout.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the stale commands cannot be listed.
    pub async fn reclaim_pending(&self, now: Timestamp) -> Result<ReclaimReport, GrowdashError> {
        self.reclaim_timed_out(now, self.config.pending_timeout, CommandStatus::Pending)
            .await
    }

    /// Sweep executing commands with the configured executing timeout.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the stale commands cannot be listed.
    pub async fn reclaim_executing(&self, now: Timestamp) -> Result<ReclaimReport, GrowdashError> {
        self.reclaim_timed_out(now, self.config.executing_timeout, CommandStatus::Executing)
            .await
    }

    /// Run both sweeps, pending first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when either sweep cannot list its commands.
    pub async fn reclaim_all(&self, now: Timestamp) -> Result<ReclaimReport, GrowdashError> {
        let mut report = self.reclaim_pending(now).await?;
        report.merge(self.reclaim_executing(now).await?);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};
    use growdash_domain::command::{Command, NewCommand};
    use growdash_domain::id::DeviceId;

    use crate::command_bus::InProcessCommandBus;
    use crate::memory::InMemoryStore;

    fn at(m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, m, 0).unwrap()
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<Command>>);

    impl CommandNotifier for RecordingNotifier {
        fn command_status_changed(
            &self,
            command: &Command,
        ) -> impl Future<Output = Result<(), GrowdashError>> + Send {
            self.0.lock().unwrap().push(command.clone());
            async { Ok(()) }
        }
    }

    async fn enqueue(store: &InMemoryStore, created: Timestamp) -> CommandId {
        let new = NewCommand::new(DeviceId::new(), "turn_off", serde_json::Value::Null, created)
            .unwrap();
        store.enqueue(new).await.unwrap()
    }

    #[tokio::test]
    async fn should_reclaim_pending_command_past_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let old = enqueue(&store, at(0)).await;
        let fresh = enqueue(&store, at(2)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let lifecycle = CommandLifecycle::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            LifecycleConfig::default(),
        );

        let report = lifecycle.reclaim_pending(at(6)).await.unwrap();

        assert_eq!(report.reclaimed, vec![old]);
        let old = CommandStore::get_by_id(&*store, old).await.unwrap().unwrap();
        assert_eq!(old.status, CommandStatus::Failed);
        assert_eq!(old.completed_at, Some(at(6)));
        assert_eq!(
            old.result_message.as_deref(),
            Some("Timeout - Agent did not pick up command within 5 minutes")
        );
        let fresh = CommandStore::get_by_id(&*store, fresh).await.unwrap().unwrap();
        assert_eq!(fresh.status, CommandStatus::Pending);
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_reclaim_executing_command_by_last_update() {
        let store = Arc::new(InMemoryStore::new());
        let id = enqueue(&store, at(0)).await;
        store
            .transition(CommandTransition::new(
                id,
                CommandStatus::Pending,
                CommandStatus::Executing,
                at(5),
            ))
            .await
            .unwrap();
        let lifecycle = CommandLifecycle::new(
            Arc::clone(&store),
            InProcessCommandBus::new(4),
            LifecycleConfig::default(),
        );

        let early = lifecycle.reclaim_executing(at(14)).await.unwrap();
        let late = lifecycle.reclaim_executing(at(16)).await.unwrap();

        assert!(early.reclaimed.is_empty());
        assert_eq!(late.reclaimed, vec![id]);
        let cmd = CommandStore::get_by_id(&*store, id).await.unwrap().unwrap();
        assert_eq!(
            cmd.result_message.as_deref(),
            Some("Execution timeout - Command stuck for more than 10 minutes")
        );
    }

    #[tokio::test]
    async fn should_reject_terminal_from_state() {
        let lifecycle = CommandLifecycle::new(
            InMemoryStore::new(),
            InProcessCommandBus::new(4),
            LifecycleConfig::default(),
        );

        let result = lifecycle
            .reclaim_timed_out(at(0), minutes(5), CommandStatus::Completed)
            .await;

        assert!(matches!(
            result,
            Err(GrowdashError::Validation(ValidationError::TerminalReclaimState(
                CommandStatus::Completed
            )))
        ));
    }

    #[tokio::test]
    async fn should_run_both_sweeps() {
        let store = Arc::new(InMemoryStore::new());
        let pending = enqueue(&store, at(0)).await;
        let executing = enqueue(&store, at(0)).await;
        store
            .transition(CommandTransition::new(
                executing,
                CommandStatus::Pending,
                CommandStatus::Executing,
                at(1),
            ))
            .await
            .unwrap();
        let lifecycle = CommandLifecycle::new(
            Arc::clone(&store),
            InProcessCommandBus::new(4),
            LifecycleConfig::default(),
        );

        let report = lifecycle.reclaim_all(at(20)).await.unwrap();

        assert_eq!(report.reclaimed, vec![pending, executing]);
        assert_eq!(report.conflicts, 0);
    }

    /// Store where an agent completes every command right after it is listed.
    struct RacingStore(InMemoryStore);

    impl CommandStore for RacingStore {
        fn enqueue(
            &self,
            command: NewCommand,
        ) -> impl Future<Output = Result<CommandId, GrowdashError>> + Send {
            self.0.enqueue(command)
        }

        fn get_by_id(
            &self,
            id: CommandId,
        ) -> impl Future<Output = Result<Option<Command>, GrowdashError>> + Send {
            CommandStore::get_by_id(&self.0, id)
        }

        fn find_stale(
            &self,
            status: CommandStatus,
            threshold: Timestamp,
        ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
            async move {
                let stale = self.0.find_stale(status, threshold).await?;
                for command in &stale {
                    self.0
                        .transition(CommandTransition::new(
                            command.id,
                            status,
                            CommandStatus::Completed,
                            threshold,
                        ))
                        .await?;
                }
                Ok(stale)
            }
        }

        fn find_by_device(
            &self,
            device: DeviceId,
            status: Option<CommandStatus>,
        ) -> impl Future<Output = Result<Vec<Command>, GrowdashError>> + Send {
            self.0.find_by_device(device, status)
        }

        fn transition(
            &self,
            transition: CommandTransition,
        ) -> impl Future<Output = Result<TransitionOutcome, GrowdashError>> + Send {
            self.0.transition(transition)
        }
    }

    #[tokio::test]
    async fn should_count_conflict_when_agent_wins_the_race() {
        let store = RacingStore(InMemoryStore::new());
        enqueue(&store.0, at(0)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let lifecycle =
            CommandLifecycle::new(store, Arc::clone(&notifier), LifecycleConfig::default());

        let report = lifecycle.reclaim_pending(at(6)).await.unwrap();

        assert!(report.reclaimed.is_empty());
        assert_eq!(report.conflicts, 1);
        assert!(notifier.0.lock().unwrap().is_empty());
    }
}
