//! `SQLite` implementation of [`CommandStore`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite, SqlitePool};

use growdash_app::ports::{CommandStore, CommandTransition, TransitionOutcome};
use growdash_domain::command::{Command, CommandStatus, NewCommand};
use growdash_domain::error::GrowdashError;
use growdash_domain::id::{CommandId, DeviceId};
use growdash_domain::time::Timestamp;

use crate::codec::{decode_opt_ts, decode_ts, encode_ts};
use crate::error::StorageError;

struct Wrapper(Command);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Command> {
        value.map(|w| w.0)
    }

    fn all(rows: Vec<Self>) -> Vec<Command> {
        rows.into_iter().map(|w| w.0).collect()
    }
}

fn decode_json(value: &str) -> Result<serde_json::Value, StorageError> {
    Ok(serde_json::from_str(value)?)
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let device_id: uuid::Uuid = row.try_get("device_id")?;
        let command_type: String = row.try_get("command_type")?;
        let params: String = row.try_get("params")?;
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        let result_message: Option<String> = row.try_get("result_message")?;
        let result_data: Option<String> = row.try_get("result_data")?;

        let decode = || -> Result<Command, StorageError> {
            Ok(Command {
                id: CommandId::from_uuid(id),
                device_id: DeviceId::from_uuid(device_id),
                command_type,
                params: decode_json(&params)?,
                status: status.parse::<CommandStatus>()?,
                created_at: decode_ts(&created_at)?,
                updated_at: decode_ts(&updated_at)?,
                completed_at: decode_opt_ts(completed_at)?,
                result_message,
                result_data: result_data.as_deref().map(decode_json).transpose()?,
            })
        };
        decode().map(Self).map_err(StorageError::into_decode)
    }
}

const INSERT: &str = r"
    INSERT INTO commands (id, device_id, command_type, params, status, created_at, updated_at)
    VALUES (?, ?, ?, ?, 'pending', ?, ?)
";

const SELECT_BY_ID: &str = "SELECT * FROM commands WHERE id = ?";

const SELECT_STALE_PENDING: &str = r"
    SELECT * FROM commands WHERE status = ? AND created_at < ?
    ORDER BY created_at, rowid
";

const SELECT_STALE_BY_UPDATE: &str = r"
    SELECT * FROM commands WHERE status = ? AND updated_at < ?
    ORDER BY updated_at, rowid
";

const SELECT_BY_DEVICE: &str = r"
    SELECT * FROM commands WHERE device_id = ? AND (? IS NULL OR status = ?)
    ORDER BY created_at, rowid
";

const TRANSITION: &str = r"
    UPDATE commands
    SET status = ?,
        updated_at = ?,
        completed_at = ?,
        result_message = COALESCE(?, result_message),
        result_data = COALESCE(?, result_data)
    WHERE id = ? AND status = ?
";

/// Insert a pending command through any executor (pool or transaction).
pub(crate) async fn insert<'e, E>(
    executor: E,
    id: CommandId,
    command: &NewCommand,
) -> Result<(), StorageError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let params = serde_json::to_string(&command.params)?;
    let created_at = encode_ts(command.created_at);

    sqlx::query(INSERT)
        .bind(id.as_uuid())
        .bind(command.device_id.as_uuid())
        .bind(&command.command_type)
        .bind(&params)
        .bind(&created_at)
        .bind(&created_at)
        .execute(executor)
        .await?;

    Ok(())
}

/// `SQLite`-backed command queue.
pub struct SqliteCommandStore {
    pool: SqlitePool,
}

impl SqliteCommandStore {
    /// Create a new command store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: CommandId) -> Result<Option<Command>, StorageError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(Wrapper::maybe(row))
    }
}

impl CommandStore for SqliteCommandStore {
    async fn enqueue(&self, command: NewCommand) -> Result<CommandId, GrowdashError> {
        let id = CommandId::new();
        insert(&self.pool, id, &command).await?;
        Ok(id)
    }

    async fn get_by_id(&self, id: CommandId) -> Result<Option<Command>, GrowdashError> {
        Ok(self.fetch(id).await?)
    }

    async fn find_stale(
        &self,
        status: CommandStatus,
        threshold: Timestamp,
    ) -> Result<Vec<Command>, GrowdashError> {
        let query = match status {
            CommandStatus::Pending => SELECT_STALE_PENDING,
            _ => SELECT_STALE_BY_UPDATE,
        };
        let rows: Vec<Wrapper> = sqlx::query_as(query)
            .bind(status.as_str())
            .bind(encode_ts(threshold))
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::all(rows))
    }

    async fn find_by_device(
        &self,
        device: DeviceId,
        status: Option<CommandStatus>,
    ) -> Result<Vec<Command>, GrowdashError> {
        let status = status.map(CommandStatus::as_str);
        let rows: Vec<Wrapper> = sqlx::query_as(SELECT_BY_DEVICE)
            .bind(device.as_uuid())
            .bind(status)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::all(rows))
    }

    async fn transition(
        &self,
        transition: CommandTransition,
    ) -> Result<TransitionOutcome, GrowdashError> {
        let result_data = transition
            .result_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(StorageError::from)?;

        let result = sqlx::query(TRANSITION)
            .bind(transition.next.as_str())
            .bind(encode_ts(transition.at))
            .bind(transition.completed_at().map(encode_ts))
            .bind(transition.result_message.as_deref())
            .bind(result_data)
            .bind(transition.id.as_uuid())
            .bind(transition.expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Ok(TransitionOutcome::Conflict);
        }
        match self.fetch(transition.id).await? {
            Some(command) => Ok(TransitionOutcome::Applied(command)),
            None => Ok(TransitionOutcome::Conflict),
        }
    }
}
