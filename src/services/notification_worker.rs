//! Notification worker - delivers side effects off the decision path
//!
//! The attendance state machine enqueues commands with `try_send` right after
//! committing an event and never waits on delivery. This worker drains the
//! queue and talks to the notifier; a failed delivery is logged and counted,
//! the event stays committed.

use crate::infra::metrics::Metrics;
use crate::io::notifier::Notifier;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Effect of a committed attendance event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Success cue at the scanning station
    Chime,
    /// Text message to a guardian
    Sms { to: String, body: String },
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideEffect::Chime => "chime",
            SideEffect::Sms { .. } => "sms",
        }
    }
}

/// A side effect to be processed by the worker
#[derive(Debug)]
pub struct NotifyCmd {
    /// Event that produced the effect
    pub event_id: String,
    pub effect: SideEffect,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

impl NotifyCmd {
    pub fn new(event_id: impl Into<String>, effect: SideEffect) -> Self {
        Self { event_id: event_id.into(), effect, enqueued_at: Instant::now() }
    }
}

/// Worker that delivers side effects asynchronously
pub struct NotificationWorker {
    notifier: Arc<dyn Notifier>,
    cmd_rx: mpsc::Receiver<NotifyCmd>,
    metrics: Arc<Metrics>,
}

impl NotificationWorker {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        cmd_rx: mpsc::Receiver<NotifyCmd>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { notifier, cmd_rx, metrics }
    }

    /// Run the worker, processing commands until every sender is dropped
    pub async fn run(mut self) {
        info!("notification_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;

            let result = match &cmd.effect {
                SideEffect::Chime => self.notifier.play_chime().await,
                SideEffect::Sms { to, body } => self.notifier.send_sms(to, body).await,
            };

            match result {
                Ok(()) => {
                    self.metrics.record_notification_sent();
                    debug!(
                        event_id = %cmd.event_id,
                        effect = %cmd.effect.as_str(),
                        queue_delay_us = %queue_delay_us,
                        "notification_delivered"
                    );
                }
                Err(e) => {
                    self.metrics.record_notification_failed();
                    warn!(
                        event_id = %cmd.event_id,
                        effect = %cmd.effect.as_str(),
                        error = %format!("{:#}", e),
                        "notification_failed"
                    );
                }
            }
        }

        info!("notification_worker_stopped");
    }
}

/// Create a notification channel and worker
///
/// Returns the sender (for the state machine) and the worker (to be spawned)
pub fn create_notification_worker(
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<NotifyCmd>, NotificationWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size.max(1));
    let worker = NotificationWorker::new(notifier, cmd_rx, metrics);
    (cmd_tx, worker)
}
