//! `SQLite` implementation of [`EventStore`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite, SqlitePool};

use growdash_app::ports::{DueEvents, EventStore};
use growdash_domain::error::{GrowdashError, NotFoundError};
use growdash_domain::event::{ActionSet, Event, EventStatus};
use growdash_domain::id::{DeviceId, EventId};
use growdash_domain::time::Timestamp;

use crate::codec::{decode_opt_ts, decode_ts, encode_ts};
use crate::error::StorageError;

struct Wrapper(Event);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Event> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let title: String = row.try_get("title")?;
        let device_id: Option<uuid::Uuid> = row.try_get("device_id")?;
        let start_at: String = row.try_get("start_at")?;
        let end_at: Option<String> = row.try_get("end_at")?;
        let recurrence_rule: Option<String> = row.try_get("recurrence_rule")?;
        let last_executed_at: Option<String> = row.try_get("last_executed_at")?;
        let status: String = row.try_get("status")?;
        let action_json: String = row.try_get("action")?;

        let decode = || -> Result<Event, StorageError> {
            Ok(Event {
                id: EventId::from_uuid(id),
                title,
                device_id: device_id.map(DeviceId::from_uuid),
                start_at: decode_ts(&start_at)?,
                end_at: decode_opt_ts(end_at)?,
                recurrence_rule,
                last_executed_at: decode_opt_ts(last_executed_at)?,
                status: status.parse::<EventStatus>()?,
                action: serde_json::from_str::<ActionSet>(&action_json)?,
            })
        };
        decode().map(Self).map_err(StorageError::into_decode)
    }
}

const INSERT: &str = r"
    INSERT INTO events
        (id, title, device_id, start_at, end_at, recurrence_rule, last_executed_at, status, action)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_BY_ID: &str = "SELECT * FROM events WHERE id = ?";

const SELECT_DUE: &str = r"
    SELECT * FROM events
    WHERE device_id IS NOT NULL AND status IN ('scheduled', 'active')
    ORDER BY start_at, id
";

// `IS` so that a NULL expectation matches a never-fired event.
const MARK_EXECUTED: &str = r"
    UPDATE events SET last_executed_at = ?, status = ?
    WHERE id = ? AND last_executed_at IS ?
";

const CANCEL: &str = "UPDATE events SET status = 'canceled' WHERE id = ?";

/// Conditionally record a fired occurrence. Returns whether the row changed.
pub(crate) async fn mark_executed<'e, E>(
    executor: E,
    event_id: EventId,
    expected_last: Option<Timestamp>,
    fire_time: Timestamp,
    new_status: EventStatus,
) -> Result<bool, StorageError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(MARK_EXECUTED)
        .bind(encode_ts(fire_time))
        .bind(new_status.as_str())
        .bind(event_id.as_uuid())
        .bind(expected_last.map(encode_ts))
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// `SQLite`-backed event store.
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    /// Create a new event store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl EventStore for SqliteEventStore {
    async fn create(&self, event: Event) -> Result<Event, GrowdashError> {
        let action_json = serde_json::to_string(&event.action).map_err(StorageError::from)?;

        sqlx::query(INSERT)
            .bind(event.id.as_uuid())
            .bind(&event.title)
            .bind(event.device_id.map(DeviceId::as_uuid))
            .bind(encode_ts(event.start_at))
            .bind(event.end_at.map(encode_ts))
            .bind(event.recurrence_rule.as_deref())
            .bind(event.last_executed_at.map(encode_ts))
            .bind(event.status.as_str())
            .bind(&action_json)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(event)
    }

    async fn get_by_id(&self, id: EventId) -> Result<Option<Event>, GrowdashError> {
        let row: Option<Wrapper> = sqlx::query_as(SELECT_BY_ID)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;

        Ok(Wrapper::maybe(row))
    }

    async fn find_due_events(&self) -> Result<DueEvents, GrowdashError> {
        let rows: Vec<SqliteRow> = sqlx::query(SELECT_DUE)
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;

        // Decode row by row so one bad row cannot hide the others.
        let mut due = DueEvents::default();
        for row in &rows {
            match Wrapper::from_row(row) {
                Ok(Wrapper(event)) => due.events.push(event),
                Err(err) => {
                    let event_id = row
                        .try_get::<uuid::Uuid, _>("id")
                        .map_or_else(|_| "unknown".to_string(), |id| id.to_string());
                    tracing::warn!(%event_id, error = %err, "skipping unreadable event row");
                    due.unreadable += 1;
                }
            }
        }
        Ok(due)
    }

    async fn save_execution(
        &self,
        event_id: EventId,
        expected_last: Option<Timestamp>,
        fire_time: Timestamp,
        new_status: EventStatus,
    ) -> Result<bool, GrowdashError> {
        Ok(mark_executed(&self.pool, event_id, expected_last, fire_time, new_status).await?)
    }

    async fn cancel(&self, id: EventId) -> Result<(), GrowdashError> {
        let result = sqlx::query(CANCEL)
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(NotFoundError {
                entity: "Event",
                id: id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
