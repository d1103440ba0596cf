//! Attendance event model and the append-only event log

use crate::domain::types::EntityId;
use chrono::{DateTime, Local, NaiveDate};
use rustc_hash::FxHashSet;
use serde::Serialize;
use smallvec::SmallVec;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Kind of attendance transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceKind {
    Arrival,
    Departure,
}

impl AttendanceKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceKind::Arrival => "arrival",
            AttendanceKind::Departure => "departure",
        }
    }
}

/// A committed arrival or departure. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Local>,
    pub kind: AttendanceKind,
}

impl AttendanceEvent {
    pub fn new(entity_id: EntityId, timestamp: DateTime<Local>, kind: AttendanceKind) -> Self {
        Self { id: new_uuid_v7(), entity_id, timestamp, kind }
    }

    /// Calendar day of the event in local time
    #[inline]
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Today's events for a single entity. At most an arrival and a departure.
pub type DayEvents<'a> = SmallVec<[&'a AttendanceEvent; 2]>;

/// Attendance counters for one calendar day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayStats {
    /// Distinct entities that arrived
    pub present: usize,
    /// Distinct entities that departed
    pub departed: usize,
    /// Arrived and not yet departed
    pub on_site: usize,
}

/// Insertion-ordered log of attendance events
///
/// Events are kept sorted by timestamp; an event with the same timestamp as
/// existing ones lands after them, so ties keep insertion order.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<AttendanceEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::with_capacity(256) }
    }

    /// Insert an event, returning its position in the log
    pub fn append(&mut self, event: AttendanceEvent) -> usize {
        let idx = self.events.partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(idx, event);
        idx
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttendanceEvent> {
        self.events.iter()
    }

    /// All events on the given local calendar day, in log order
    pub fn on_day(&self, day: NaiveDate) -> impl Iterator<Item = &AttendanceEvent> {
        self.events.iter().filter(move |e| e.day() == day)
    }

    /// One entity's events on the given day, in log order
    pub fn for_entity_on(&self, entity_id: &EntityId, day: NaiveDate) -> DayEvents<'_> {
        self.on_day(day).filter(|e| &e.entity_id == entity_id).collect()
    }

    /// Present/departed/on-site counts for a day
    pub fn day_stats(&self, day: NaiveDate) -> DayStats {
        let mut arrived = FxHashSet::default();
        let mut departed = FxHashSet::default();
        for event in self.on_day(day) {
            match event.kind {
                AttendanceKind::Arrival => arrived.insert(&event.entity_id),
                AttendanceKind::Departure => departed.insert(&event.entity_id),
            };
        }
        DayStats {
            present: arrived.len(),
            departed: departed.len(),
            on_site: arrived.len().saturating_sub(departed.len()),
        }
    }

    /// Most recent events first, optionally filtered by entity id or kind
    pub fn recent(&self, limit: usize, filter: Option<&str>) -> Vec<&AttendanceEvent> {
        let needle = filter.map(|f| f.to_lowercase());
        self.events
            .iter()
            .rev()
            .filter(|e| match &needle {
                Some(n) => {
                    e.entity_id.as_str().to_lowercase().contains(n.as_str())
                        || e.kind.as_str().contains(n.as_str())
                }
                None => true,
            })
            .take(limit)
            .collect()
    }
}
