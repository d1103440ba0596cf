//! Services - the scan-to-event pipeline and its workers
//!
//! This module contains the core business logic services:
//! - `scanner` - Decode loop turning frames into de-duplicated readings
//! - `attendance` - State machine turning readings into attendance events
//! - `directory` - Entity lookup used by the state machine
//! - `notification_worker` - Async chime/SMS delivery off the decision path
//! - `summary` - Day report and narrative summary

pub mod attendance;
pub mod directory;
pub mod notification_worker;
pub mod scanner;
pub mod summary;

// Re-export commonly used types
pub use attendance::{AttendanceMachine, ScanOutcome, ScanResult, Severity};
pub use directory::{Directory, InMemoryDirectory};
pub use notification_worker::{
    create_notification_worker, NotificationWorker, NotifyCmd, SideEffect,
};
pub use scanner::{DecodeLoop, ReadingThrottle, ScannerStatus};
pub use summary::{build_day_report, EntityDayStatus, PresenceStatus, SummaryService};
