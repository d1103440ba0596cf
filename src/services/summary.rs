//! Day report and narrative summary
//!
//! `build_day_report` projects the event log onto the directory for one
//! calendar day. `SummaryService` sends that report to a text generator and
//! always returns something printable: a generator failure degrades to a
//! fixed message instead of an error.

use crate::domain::attendance::{AttendanceKind, EventLog};
use crate::domain::types::{Entity, EntityId};
use crate::infra::config::Config;
use crate::io::textgen::{HttpTextGenerator, TextGenerator};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

pub const SUMMARY_EMPTY: &str = "Unable to generate summary at this time.";
pub const SUMMARY_FAILED: &str =
    "Error generating attendance summary. Please ensure your API key is configured correctly.";

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PresenceStatus {
    Absent,
    #[serde(rename = "Present (On Campus)")]
    Present,
    #[serde(rename = "Completed Day")]
    CompletedDay,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Absent => "absent",
            PresenceStatus::Present => "present",
            PresenceStatus::CompletedDay => "completed_day",
        }
    }
}

/// One directory entry's standing for a day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDayStatus {
    pub name: String,
    #[serde(rename = "grade")]
    pub group: String,
    pub status: PresenceStatus,
    #[serde(rename = "arrivalTime")]
    pub arrival_time: String,
    #[serde(rename = "departureTime")]
    pub departure_time: String,
    pub late: bool,
}

fn format_time(ts: Option<DateTime<Local>>) -> String {
    ts.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Status row for every entity, in directory order
pub fn build_day_report(
    log: &EventLog,
    entities: &[Entity],
    day: NaiveDate,
    class_start: NaiveTime,
) -> Vec<EntityDayStatus> {
    let mut seen: FxHashMap<&EntityId, (Option<DateTime<Local>>, Option<DateTime<Local>>)> =
        FxHashMap::default();
    for event in log.on_day(day) {
        let slot = seen.entry(&event.entity_id).or_default();
        match event.kind {
            AttendanceKind::Arrival => {
                slot.0.get_or_insert(event.timestamp);
            }
            AttendanceKind::Departure => {
                slot.1.get_or_insert(event.timestamp);
            }
        }
    }

    entities
        .iter()
        .map(|entity| {
            let (arrival, departure) = seen.get(&entity.id).copied().unwrap_or_default();
            let status = match (arrival, departure) {
                (None, _) => PresenceStatus::Absent,
                (Some(_), None) => PresenceStatus::Present,
                (Some(_), Some(_)) => PresenceStatus::CompletedDay,
            };
            EntityDayStatus {
                name: entity.name.clone(),
                group: entity.group.clone(),
                status,
                arrival_time: format_time(arrival),
                departure_time: format_time(departure),
                late: arrival.is_some_and(|t| t.time() > class_start),
            }
        })
        .collect()
}

/// Prompt asking for a short narrative over the report
pub fn build_prompt(
    day: NaiveDate,
    class_start: NaiveTime,
    report: &[EntityDayStatus],
) -> anyhow::Result<String> {
    let data = serde_json::to_string_pretty(report)?;
    Ok(format!(
        "You are a school administrator assistant. Analyze the following attendance data for today ({}).\n\
         Data:\n{}\n\n\
         Please provide a concise summary including:\n\
         1. Overall attendance rate.\n\
         2. Any students who arrived late (assume classes start at {}).\n\
         3. A list of absentees.\n\
         4. Current on-campus status (who is still here).\n\n\
         Format the output in clean Markdown.",
        day.format("%Y-%m-%d"),
        data,
        class_start.format("%H:%M"),
    ))
}

/// Stands in when the HTTP client could not be built
struct UnavailableGenerator {
    reason: String,
}

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("text generator unavailable: {}", self.reason)
    }
}

pub struct SummaryService {
    generator: Arc<dyn TextGenerator>,
    class_start: NaiveTime,
}

impl SummaryService {
    pub fn new(config: &Config, generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator, class_start: config.class_start() }
    }

    /// Service backed by the configured HTTP generator. If the client cannot
    /// be built, every summary degrades to the fixed error text.
    pub fn from_config(config: &Config) -> Self {
        let generator: Arc<dyn TextGenerator> = match HttpTextGenerator::new(config) {
            Ok(generator) => Arc::new(generator),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "summary_client_failed");
                Arc::new(UnavailableGenerator { reason: format!("{:#}", e) })
            }
        };
        Self::new(config, generator)
    }

    /// Narrative for `day`. Never fails.
    pub async fn summarize(&self, log: &EventLog, entities: &[Entity], day: NaiveDate) -> String {
        let report = build_day_report(log, entities, day, self.class_start);
        let prompt = match build_prompt(day, self.class_start, &report) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "summary_prompt_failed");
                return SUMMARY_FAILED.to_string();
            }
        };

        match self.generator.generate(&prompt).await {
            Ok(text) if text.trim().is_empty() => {
                info!("summary_empty");
                SUMMARY_EMPTY.to_string()
            }
            Ok(text) => {
                info!(chars = %text.len(), "summary_generated");
                text
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "summary_failed");
                SUMMARY_FAILED.to_string()
            }
        }
    }
}
