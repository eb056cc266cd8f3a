//! Event: a calendar entry that drives device actions.
//!
//! An event fires at its `start_at` anchor, or at every occurrence of its
//! recurrence rule. Each firing turns the event's [`ActionSet`] into device
//! commands. `last_executed_at` remembers the latest fired occurrence so the
//! same occurrence is never fired twice.

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{GrowdashError, ValidationError};
use crate::id::{DeviceId, EventId};
use crate::recurrence::{self, Occurrence, RecurrenceRule, RuleParseError};
use crate::time::Timestamp;

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Scheduled,
    Active,
    Completed,
    Canceled,
}

impl EventStatus {
    /// Statuses the scheduler picks events up in.
    pub const SCHEDULABLE: [Self; 2] = [Self::Scheduled, Self::Active];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }

    /// Whether the scheduler should consider events in this status.
    #[must_use]
    pub fn is_schedulable(self) -> bool {
        Self::SCHEDULABLE.contains(&self)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "canceled" => Ok(Self::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A stored status string that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status {0:?}")]
pub struct UnknownStatus(pub String);

/// One actuator action attached to an event.
///
/// Only `kind` is interpreted structurally; everything else the UI stored
/// (`state`, `target_liters`, `shelly_id`, …) lands in `params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventAction {
    /// Target device; falls back to the event's linked device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    /// Action kind, e.g. `spray_pump`, `valve`, `turn_on`. The dashboard
    /// stores it as `type`.
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Run time for duration-based actuators. Stored values may be strings
    /// or floats; anything that is not a usable number reads as absent.
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
    #[serde(default, flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl EventAction {
    /// An action of the given kind with no parameters.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    #[must_use]
    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(crate::action::as_millis))
}

/// The actions an event performs: one action or several actuators at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSet {
    Multiple(Vec<EventAction>),
    Single(EventAction),
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::Multiple(Vec::new())
    }
}

impl ActionSet {
    /// View the set as a slice regardless of its shape.
    #[must_use]
    pub fn as_slice(&self) -> &[EventAction] {
        match self {
            Self::Multiple(actions) => actions,
            Self::Single(action) => std::slice::from_ref(action),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl From<EventAction> for ActionSet {
    fn from(action: EventAction) -> Self {
        Self::Single(action)
    }
}

impl From<Vec<EventAction>> for ActionSet {
    fn from(actions: Vec<EventAction>) -> Self {
        Self::Multiple(actions)
    }
}

/// A calendar event linked to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub device_id: Option<DeviceId>,
    pub start_at: Timestamp,
    pub end_at: Option<Timestamp>,
    /// `RRULE` text; `None` for a single-shot event.
    pub recurrence_rule: Option<String>,
    pub last_executed_at: Option<Timestamp>,
    pub status: EventStatus,
    pub action: ActionSet,
}

impl Event {
    /// Create a builder for constructing an [`Event`].
    #[must_use]
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GrowdashError::Validation`] when:
    /// - `title` is empty ([`ValidationError::EmptyTitle`])
    /// - `end_at` precedes `start_at` ([`ValidationError::EndBeforeStart`])
    /// - the recurrence rule does not parse ([`ValidationError::InvalidRecurrence`])
    pub fn validate(&self) -> Result<(), GrowdashError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle.into());
        }
        if self.end_at.is_some_and(|end| end < self.start_at) {
            return Err(ValidationError::EndBeforeStart.into());
        }
        self.recurrence().map_err(ValidationError::from)?;
        Ok(())
    }

    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence_rule.is_some()
    }

    /// Parse the stored recurrence rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleParseError`] when the stored text is not a valid `RRULE`.
    pub fn recurrence(&self) -> Result<Option<RecurrenceRule>, RuleParseError> {
        self.recurrence_rule
            .as_deref()
            .map(str::parse::<RecurrenceRule>)
            .transpose()
    }

    /// Occurrences of this event inside `[window_start, window_end]`, in
    /// ascending order. Already-fired occurrences are included.
    ///
    /// # Errors
    ///
    /// Returns [`RuleParseError`] when the stored rule does not parse.
    pub fn occurrences(
        &self,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> Result<impl Iterator<Item = Occurrence> + use<>, RuleParseError> {
        let rule = self.recurrence()?;
        let event_id = self.id;
        Ok(
            recurrence::expand(self.start_at, rule.as_ref(), window_start, window_end)
                .map(move |fire_time| Occurrence {
                    event_id,
                    fire_time,
                }),
        )
    }

    /// Display duration derived from `end_at`.
    #[must_use]
    pub fn duration(&self) -> Option<TimeDelta> {
        self.end_at.map(|end| end - self.start_at)
    }

    /// Whether the scheduler should look at this event at all.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.device_id.is_some() && self.status.is_schedulable()
    }

    /// Whether `fire_time` is at or before the latest fired occurrence.
    #[must_use]
    pub fn has_fired(&self, fire_time: Timestamp) -> bool {
        self.last_executed_at.is_some_and(|last| fire_time <= last)
    }

    /// Status the event moves to once an occurrence fired.
    ///
    /// Single-shot events complete; recurring events keep their status and
    /// only end through [`cancel`](Self::cancel).
    #[must_use]
    pub fn status_after_firing(&self) -> EventStatus {
        if self.is_recurring() {
            self.status
        } else {
            EventStatus::Completed
        }
    }

    /// Record that the occurrence at `fire_time` fired.
    ///
    /// Returns `false` and leaves the event untouched if `fire_time` would
    /// move `last_executed_at` backwards or repeat it.
    pub fn record_execution(&mut self, fire_time: Timestamp) -> bool {
        if self.has_fired(fire_time) {
            return false;
        }
        self.status = self.status_after_firing();
        self.last_executed_at = Some(fire_time);
        true
    }

    /// Manually end the event.
    pub fn cancel(&mut self) {
        self.status = EventStatus::Canceled;
    }
}

/// Step-by-step builder for [`Event`].
#[derive(Debug, Default)]
pub struct EventBuilder {
    id: Option<EventId>,
    title: Option<String>,
    device_id: Option<DeviceId>,
    start_at: Option<Timestamp>,
    end_at: Option<Timestamp>,
    recurrence_rule: Option<String>,
    last_executed_at: Option<Timestamp>,
    status: Option<EventStatus>,
    actions: Vec<EventAction>,
}

impl EventBuilder {
    #[must_use]
    pub fn id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    #[must_use]
    pub fn start_at(mut self, ts: Timestamp) -> Self {
        self.start_at = Some(ts);
        self
    }

    #[must_use]
    pub fn end_at(mut self, ts: Timestamp) -> Self {
        self.end_at = Some(ts);
        self
    }

    #[must_use]
    pub fn recurrence(mut self, rule: impl Into<String>) -> Self {
        self.recurrence_rule = Some(rule.into());
        self
    }

    #[must_use]
    pub fn last_executed_at(mut self, ts: Timestamp) -> Self {
        self.last_executed_at = Some(ts);
        self
    }

    #[must_use]
    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add an action; one action is stored as [`ActionSet::Single`], more as
    /// [`ActionSet::Multiple`].
    #[must_use]
    pub fn action(mut self, action: EventAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Consume the builder, validate, and return an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns [`GrowdashError::Validation`] if `start_at` was not given or
    /// invariants fail.
    pub fn build(self) -> Result<Event, GrowdashError> {
        let start_at = self.start_at.ok_or(ValidationError::MissingStartAt)?;
        let mut actions = self.actions;
        let action = if actions.len() == 1 {
            ActionSet::Single(actions.remove(0))
        } else {
            ActionSet::Multiple(actions)
        };
        let event = Event {
            id: self.id.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            device_id: self.device_id,
            start_at,
            end_at: self.end_at,
            recurrence_rule: self.recurrence_rule,
            last_executed_at: self.last_executed_at,
            status: self.status.unwrap_or_default(),
            action,
        };
        event.validate()?;
        Ok(event)
    }
}
