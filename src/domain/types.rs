//! Shared types for the attendance gateway

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Newtype wrapper for entity identifiers (the opaque token printed on an ID card)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A registered person whose attendance is tracked
///
/// Owned by the directory; the scan pipeline only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    /// Group or classification label (e.g. a class like "10-A")
    pub group: String,
    pub guardian_name: String,
    /// Contact reference used for notifications (phone number)
    pub guardian_phone: String,
}

/// A token read from the camera, before the attendance state machine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateReading {
    pub token: String,
    pub captured_at: DateTime<Local>,
}

impl CandidateReading {
    pub fn new(token: impl Into<String>, captured_at: DateTime<Local>) -> Self {
        Self { token: token.into(), captured_at }
    }
}

/// A point in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Corners of a detected token, clockwise from top-left
pub type Quad = [Point; 4];
