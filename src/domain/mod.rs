//! Domain models - core attendance types and the event log
//!
//! This module contains the canonical data types used throughout the system:
//! - `Entity` - a registered person looked up by the token on their card
//! - `CandidateReading` - a de-duplicated token read from the camera
//! - `AttendanceEvent` - a committed arrival or departure
//! - `EventLog` - the ordered log that is the only attendance state

pub mod attendance;
pub mod types;

pub use attendance::{AttendanceEvent, AttendanceKind, DayStats, EventLog};
pub use types::{CandidateReading, Entity, EntityId, Point, Quad};
