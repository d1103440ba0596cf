//! Attendance state machine - turns candidate readings into events
//!
//! For each reading the machine resolves the token, looks at the entity's
//! events on the reading's calendar day and applies, in order:
//!
//! | today's events              | event     | outcome               |
//! |-----------------------------|-----------|-----------------------|
//! | no arrival                  | arrival   | `NewEvent`            |
//! | arrival, elapsed >= window  | departure | `NewEvent`            |
//! | arrival, elapsed < window   | -         | `SuppressedTooSoon`   |
//! | arrival and departure       | -         | `AlreadyComplete`     |
//!
//! "Elapsed" is measured from the entity's most recent event that day. The
//! machine owns the event log and is driven by a single worker, so the
//! read-decide-append sequence never interleaves.

use crate::domain::attendance::{AttendanceEvent, AttendanceKind, EventLog};
use crate::domain::types::{CandidateReading, Entity};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::directory::Directory;
use crate::services::notification_worker::{NotifyCmd, SideEffect};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Result class of one processed reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    NewEvent,
    SuppressedTooSoon,
    AlreadyComplete,
    UnknownToken,
}

impl ScanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::NewEvent => "new_event",
            ScanOutcome::SuppressedTooSoon => "suppressed_too_soon",
            ScanOutcome::AlreadyComplete => "already_complete",
            ScanOutcome::UnknownToken => "unknown_token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
}

/// What the operator sees for a processed reading
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub token: String,
    pub captured_at: DateTime<Local>,
    pub outcome: ScanOutcome,
    pub entity: Option<Entity>,
    pub event: Option<AttendanceEvent>,
    pub notice: String,
}

impl ScanResult {
    pub fn severity(&self) -> Severity {
        match self.outcome {
            ScanOutcome::NewEvent => Severity::Success,
            _ => Severity::Info,
        }
    }

    pub fn log(&self) {
        let name = self.entity.as_ref().map(|e| e.name.as_str()).unwrap_or("-");
        match self.severity() {
            Severity::Success => info!(
                token = %self.token,
                name = %name,
                outcome = %self.outcome.as_str(),
                notice = %self.notice,
                "scan_result"
            ),
            Severity::Info => info!(
                token = %self.token,
                outcome = %self.outcome.as_str(),
                notice = %self.notice,
                "scan_notice"
            ),
        }
    }
}

/// Decision over one entity's events for the reading's day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Record(AttendanceKind),
    SuppressTooSoon,
    Complete,
}

/// Apply the decision table to an entity's events for one day
pub fn decide(today: &[&AttendanceEvent], now: DateTime<Local>, window: Duration) -> Decision {
    let has_arrival = today.iter().any(|e| e.kind == AttendanceKind::Arrival);
    if !has_arrival {
        return Decision::Record(AttendanceKind::Arrival);
    }
    if today.iter().any(|e| e.kind == AttendanceKind::Departure) {
        return Decision::Complete;
    }

    // Most recent by log position; the log is ordered by timestamp
    let Some(last) = today.last() else {
        return Decision::Record(AttendanceKind::Arrival);
    };
    // Negative elapsed (clock went backwards) stays inside the window
    let window_elapsed =
        (now - last.timestamp).to_std().map(|elapsed| elapsed >= window).unwrap_or(false);

    if window_elapsed {
        Decision::Record(AttendanceKind::Departure)
    } else {
        Decision::SuppressTooSoon
    }
}

/// Message sent to the guardian for a committed event
pub fn render_guardian_message(
    sender_name: &str,
    facility_name: &str,
    entity: &Entity,
    event: &AttendanceEvent,
) -> String {
    let verb = match event.kind {
        AttendanceKind::Arrival => "arrived at",
        AttendanceKind::Departure => "left",
    };
    format!(
        "Hello {}, this is {}. {} has {} {} safely at {}.",
        entity.guardian_name,
        sender_name,
        entity.name,
        verb,
        facility_name,
        event.timestamp.format("%H:%M:%S")
    )
}

pub const NOTICE_TOO_SOON: &str = "Scanned again too soon; ignored.";
pub const NOTICE_COMPLETE: &str = "Already completed attendance for today.";

pub struct AttendanceMachine {
    log: EventLog,
    directory: Arc<dyn Directory>,
    side_effects: Option<mpsc::Sender<NotifyCmd>>,
    rescan_window: Duration,
    facility_name: String,
    sender_name: String,
    metrics: Arc<Metrics>,
}

impl AttendanceMachine {
    pub fn new(config: &Config, directory: Arc<dyn Directory>, metrics: Arc<Metrics>) -> Self {
        Self {
            log: EventLog::new(),
            directory,
            side_effects: None,
            rescan_window: config.rescan_window(),
            facility_name: config.facility_name().to_string(),
            sender_name: config.sender_name().to_string(),
            metrics,
        }
    }

    /// Start from an existing log instead of an empty one
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Route chime and SMS commands for new events to a notification worker
    pub fn with_side_effects(mut self, tx: mpsc::Sender<NotifyCmd>) -> Self {
        self.side_effects = Some(tx);
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn into_log(self) -> EventLog {
        self.log
    }

    /// Process readings in arrival order until every reading sender is gone
    pub async fn run(
        &mut self,
        mut reading_rx: mpsc::Receiver<CandidateReading>,
        result_tx: Option<mpsc::Sender<ScanResult>>,
    ) {
        info!(
            rescan_window_secs = %self.rescan_window.as_secs(),
            events = %self.log.len(),
            "attendance_worker_started"
        );

        while let Some(reading) = reading_rx.recv().await {
            let result = self.process(&reading);
            if let Some(tx) = &result_tx {
                if tx.send(result).await.is_err() {
                    debug!("scan_result_receiver_closed");
                }
            }
        }

        info!(events = %self.log.len(), "attendance_worker_stopped");
    }

    /// Decide on one reading and commit the resulting event, if any
    pub fn process(&mut self, reading: &CandidateReading) -> ScanResult {
        let start = Instant::now();
        let result = self.evaluate(reading);

        match result.outcome {
            ScanOutcome::NewEvent => self.metrics.record_outcome_new_event(),
            ScanOutcome::SuppressedTooSoon => self.metrics.record_outcome_suppressed(),
            ScanOutcome::AlreadyComplete => self.metrics.record_outcome_complete(),
            ScanOutcome::UnknownToken => self.metrics.record_outcome_unknown(),
        }
        self.metrics.record_decision_latency(start.elapsed().as_micros() as u64);
        result
    }

    fn evaluate(&mut self, reading: &CandidateReading) -> ScanResult {
        let Some(entity) = self.directory.lookup(&reading.token) else {
            info!(token = %reading.token, "scan_unknown_token");
            return ScanResult {
                token: reading.token.clone(),
                captured_at: reading.captured_at,
                outcome: ScanOutcome::UnknownToken,
                entity: None,
                event: None,
                notice: format!("Invalid QR Code: {}", reading.token),
            };
        };

        let day = reading.captured_at.date_naive();
        let decision = {
            let today = self.log.for_entity_on(&entity.id, day);
            decide(&today, reading.captured_at, self.rescan_window)
        };

        let (outcome, event, notice) = match decision {
            Decision::SuppressTooSoon => {
                debug!(id = %entity.id, "scan_suppressed_too_soon");
                (ScanOutcome::SuppressedTooSoon, None, NOTICE_TOO_SOON.to_string())
            }
            Decision::Complete => {
                debug!(id = %entity.id, "scan_already_complete");
                (ScanOutcome::AlreadyComplete, None, NOTICE_COMPLETE.to_string())
            }
            Decision::Record(kind) => {
                let event = AttendanceEvent::new(entity.id.clone(), reading.captured_at, kind);
                let position = self.log.append(event.clone());
                match kind {
                    AttendanceKind::Arrival => self.metrics.record_arrival(),
                    AttendanceKind::Departure => self.metrics.record_departure(),
                }
                info!(
                    event_id = %event.id,
                    id = %entity.id,
                    name = %entity.name,
                    kind = %kind.as_str(),
                    at = %event.timestamp.format("%H:%M:%S"),
                    position = %position,
                    "attendance_recorded"
                );

                self.dispatch(&entity, &event);

                let time = event.timestamp.format("%H:%M:%S");
                let notice = match kind {
                    AttendanceKind::Arrival => format!("Arrived at {}", time),
                    AttendanceKind::Departure => format!("Left at {}", time),
                };
                (ScanOutcome::NewEvent, Some(event), notice)
            }
        };

        ScanResult {
            token: reading.token.clone(),
            captured_at: reading.captured_at,
            outcome,
            entity: Some(entity),
            event,
            notice,
        }
    }

    /// Fire-and-forget chime and guardian SMS for a committed event
    fn dispatch(&self, entity: &Entity, event: &AttendanceEvent) {
        let Some(tx) = &self.side_effects else {
            return;
        };

        let body = render_guardian_message(&self.sender_name, &self.facility_name, entity, event);
        let commands = [
            NotifyCmd::new(event.id.clone(), SideEffect::Chime),
            NotifyCmd::new(
                event.id.clone(),
                SideEffect::Sms { to: entity.guardian_phone.clone(), body },
            ),
        ];

        for cmd in commands {
            let effect = cmd.effect.as_str();
            match tx.try_send(cmd) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.metrics.record_notification_dropped();
                    warn!(event_id = %event.id, effect = %effect, "notification_queue_full");
                }
                Err(TrySendError::Closed(_)) => {
                    self.metrics.record_notification_dropped();
                    warn!(event_id = %event.id, effect = %effect, "notification_worker_gone");
                }
            }
        }
    }
}
