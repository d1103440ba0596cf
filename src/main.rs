//! scan-attend - scan-to-event attendance station
//!
//! Reads frames from stdin (one text payload per line), decodes tokens,
//! and turns them into arrival/departure events.
//!
//! Module structure:
//! - `domain/` - Core types (Entity, CandidateReading, AttendanceEvent, EventLog)
//! - `io/` - External interfaces (camera, token extraction, notifier, text generation)
//! - `services/` - Pipeline (DecodeLoop, AttendanceMachine, workers, summary)
//! - `infra/` - Infrastructure (Config, Clock, Metrics)
//!
//! Input lines:
//! - `:on` / `:off` - activate or deactivate the scanner
//! - anything else - a frame carrying that payload

use anyhow::Context;
use clap::Parser;
use scan_attend::infra::{Clock, Config, Metrics, NotifyMode, SystemClock};
use scan_attend::io::{
    FeedCamera, FeedHandle, LogNotifier, Notifier, TextPayloadExtractor, TracingOverlay,
    WebhookNotifier,
};
use scan_attend::services::{
    build_day_report, create_notification_worker, AttendanceMachine, DecodeLoop, Directory,
    InMemoryDirectory, ScannerStatus, SummaryService,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Scan-to-event attendance station
#[derive(Parser, Debug)]
#[command(name = "scan-attend", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Start with the scanner off (send `:on` to activate)
    #[arg(long)]
    inactive: bool,
}

/// Feed stdin lines to the camera until EOF. Owns the activation flag, so
/// returning (or being aborted) stops the decode loop.
async fn feed_stdin(feed: FeedHandle, active_tx: watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.trim() {
                "" => {}
                ":on" => {
                    active_tx.send_replace(true);
                }
                ":off" => {
                    active_tx.send_replace(false);
                }
                payload => {
                    if !feed.push_text(payload) {
                        warn!(payload = %payload, "frame_dropped_scanner_inactive");
                    }
                }
            },
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "stdin_read_failed");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-frame visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("scan-attend starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        facing = %config.facing().as_str(),
        frame_interval_ms = %config.frame_interval().as_millis(),
        cooldown_ms = %config.cooldown().as_millis(),
        rescan_window_secs = %config.rescan_window().as_secs(),
        class_start = %config.class_start().format("%H:%M"),
        entities = %config.entities().len(),
        summary_enabled = %config.summary_enabled(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let directory = Arc::new(InMemoryDirectory::new(config.entities().to_vec()));

    // Side-effect worker
    let notifier: Arc<dyn Notifier> = match config.notify_mode() {
        NotifyMode::Log => Arc::new(LogNotifier),
        NotifyMode::Webhook => {
            Arc::new(WebhookNotifier::new(&config).context("Failed to set up webhook notifier")?)
        }
    };
    let (notify_tx, notify_worker) =
        create_notification_worker(notifier, metrics.clone(), config.notify_queue_size());
    let notify_task = tokio::spawn(notify_worker.run());

    // Metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Decode loop: camera -> readings
    let (reading_tx, reading_rx) = mpsc::channel(64);
    let (active_tx, active_rx) = watch::channel(!args.inactive);
    let (camera, feed) = FeedCamera::new();
    let decode_loop = DecodeLoop::new(
        &config,
        Box::new(camera),
        Arc::new(TextPayloadExtractor),
        clock.clone(),
        reading_tx,
        metrics.clone(),
    )
    .with_overlay(Arc::new(TracingOverlay));

    let mut status_rx = decode_loop.status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            match status {
                ScannerStatus::Failed(e) => {
                    warn!(error = %e, message = %e.user_message(), "scanner_status_failed")
                }
                other => info!(status = %other.as_str(), "scanner_status"),
            }
        }
    });

    let decode_task = tokio::spawn(decode_loop.run(active_rx));

    // Attendance worker: readings -> events -> results
    let (result_tx, mut result_rx) = mpsc::channel(64);
    let mut machine = AttendanceMachine::new(&config, directory.clone(), metrics.clone())
        .with_side_effects(notify_tx);
    let machine_task = tokio::spawn(async move {
        machine.run(reading_rx, Some(result_tx)).await;
        machine
    });

    tokio::spawn(async move {
        while let Some(result) = result_rx.recv().await {
            result.log();
        }
    });

    let mut stdin_task = tokio::spawn(feed_stdin(feed, active_tx));
    info!("scan-attend ready");

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
            stdin_task.abort();
            true
        }
        _ = &mut stdin_task => {
            info!("input_closed");
            false
        }
    };

    // Activation sender is gone: decode loop releases the camera and closes
    // the reading channel, which drains the attendance worker
    decode_task.await.context("decode loop task failed")?;
    let machine = machine_task.await.context("attendance worker task failed")?;
    let log = machine.into_log();
    notify_task.await.context("notification worker task failed")?;

    let today = clock.now().date_naive();
    let stats = log.day_stats(today);
    info!(
        day = %today,
        present = %stats.present,
        departed = %stats.departed,
        on_site = %stats.on_site,
        events = %log.len(),
        "day_stats"
    );

    let entities = directory.entities();
    for row in build_day_report(&log, &entities, today, config.class_start()) {
        info!(
            name = %row.name,
            group = %row.group,
            status = %row.status.as_str(),
            arrival = %row.arrival_time,
            departure = %row.departure_time,
            late = %row.late,
            "day_report_row"
        );
    }

    for event in log.recent(10, None) {
        info!(
            id = %event.entity_id,
            kind = %event.kind.as_str(),
            at = %event.timestamp.format("%H:%M:%S"),
            "recent_activity"
        );
    }

    if config.summary_enabled() {
        let service = SummaryService::from_config(&config);
        let summary = service.summarize(&log, &entities, today).await;
        info!(summary = %summary, "attendance_summary");
    }

    metrics.report().log();
    info!("scan-attend shutdown complete");

    if interrupted {
        // The blocking stdin read cannot be cancelled and would hold runtime shutdown
        std::process::exit(0);
    }
    Ok(())
}
