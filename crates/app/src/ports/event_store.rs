//! Event store port: persistence for calendar events.

use std::future::Future;
use std::sync::Arc;

use growdash_domain::error::GrowdashError;
use growdash_domain::event::{Event, EventStatus};
use growdash_domain::id::EventId;
use growdash_domain::time::Timestamp;

/// Result of [`EventStore::find_due_events`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DueEvents {
    pub events: Vec<Event>,
    /// Due rows that could not be read back into an [`Event`]. The store
    /// logs each one and leaves it out of `events`.
    pub unreadable: usize,
}

impl DueEvents {
    /// Every row the query matched, readable or not.
    #[must_use]
    pub fn matched(&self) -> usize {
        self.events.len() + self.unreadable
    }
}

/// Repository for persisting and querying [`Event`]s.
pub trait EventStore {
    /// Persist a new event.
    fn create(&self, event: Event) -> impl Future<Output = Result<Event, GrowdashError>> + Send;

    /// Get an event by its unique identifier.
    fn get_by_id(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, GrowdashError>> + Send;

    /// Events the scheduler should look at: linked to a device and in a
    /// schedulable status.
    ///
    /// A row that fails to decode does not fail the call; it is counted in
    /// [`DueEvents::unreadable`].
    fn find_due_events(&self) -> impl Future<Output = Result<DueEvents, GrowdashError>> + Send;

    /// Record that the occurrence at `fire_time` fired.
    ///
    /// The write only happens while the stored `last_executed_at` still
    /// equals `expected_last`. Returns `false` when another writer got there
    /// first or the event is gone.
    fn save_execution(
        &self,
        event_id: EventId,
        expected_last: Option<Timestamp>,
        fire_time: Timestamp,
        new_status: EventStatus,
    ) -> impl Future<Output = Result<bool, GrowdashError>> + Send;

    /// Set an event's status to `canceled`.
    ///
    /// Returns [`GrowdashError::NotFound`] when no such event exists.
    fn cancel(&self, id: EventId) -> impl Future<Output = Result<(), GrowdashError>> + Send;
}

impl<T: EventStore + Send + Sync> EventStore for Arc<T> {
    fn create(&self, event: Event) -> impl Future<Output = Result<Event, GrowdashError>> + Send {
        (**self).create(event)
    }

    fn get_by_id(
        &self,
        id: EventId,
    ) -> impl Future<Output = Result<Option<Event>, GrowdashError>> + Send {
        (**self).get_by_id(id)
    }

    fn find_due_events(&self) -> impl Future<Output = Result<DueEvents, GrowdashError>> + Send {
        (**self).find_due_events()
    }

    fn save_execution(
        &self,
        event_id: EventId,
        expected_last: Option<Timestamp>,
        fire_time: Timestamp,
        new_status: EventStatus,
    ) -> impl Future<Output = Result<bool, GrowdashError>> + Send {
        (**self).save_execution(event_id, expected_last, fire_time, new_status)
    }

    fn cancel(&self, id: EventId) -> impl Future<Output = Result<(), GrowdashError>> + Send {
        (**self).cancel(id)
    }
}
