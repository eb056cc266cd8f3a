//! `SQLite` implementation of [`OccurrenceLedger`]: the claim and the command
//! inserts share one transaction.

use sqlx::SqlitePool;

use growdash_app::ports::{FireOutcome, OccurrenceFiring, OccurrenceLedger};
use growdash_domain::error::GrowdashError;
use growdash_domain::id::CommandId;

use crate::command_repo;
use crate::error::StorageError;
use crate::event_repo;

/// Transactional occurrence ledger.
pub struct SqliteOccurrenceLedger {
    pool: SqlitePool,
}

impl SqliteOccurrenceLedger {
    /// Create a new ledger using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fire(&self, firing: OccurrenceFiring) -> Result<FireOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let claimed = event_repo::mark_executed(
            &mut *tx,
            firing.event_id,
            firing.expected_last,
            firing.fire_time,
            firing.new_status,
        )
        .await?;
        if !claimed {
            tx.rollback().await?;
            return Ok(FireOutcome::AlreadyClaimed);
        }

        let mut command_ids = Vec::with_capacity(firing.commands.len());
        for command in &firing.commands {
            let id = CommandId::new();
            command_repo::insert(&mut *tx, id, command).await?;
            command_ids.push(id);
        }

        tx.commit().await?;
        Ok(FireOutcome::Fired { command_ids })
    }
}

impl OccurrenceLedger for SqliteOccurrenceLedger {
    async fn fire_occurrence(
        &self,
        firing: OccurrenceFiring,
    ) -> Result<FireOutcome, GrowdashError> {
        Ok(self.fire(firing).await?)
    }
}
