//! End-to-end tests: feed camera -> decode loop -> attendance worker -> notifier

use async_trait::async_trait;
use chrono::{Local, TimeZone};
use parking_lot::Mutex;
use scan_attend::domain::{AttendanceKind, EventLog};
use scan_attend::infra::{Config, ManualClock, Metrics};
use scan_attend::io::{FeedCamera, FeedHandle, Notifier, TextPayloadExtractor};
use scan_attend::services::{
    create_notification_worker, AttendanceMachine, DecodeLoop, InMemoryDirectory, ScanOutcome,
    ScanResult, ScannerStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Default)]
struct RecordingNotifier {
    sms: Mutex<Vec<(String, String)>>,
    chimes: Mutex<u32>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sms.lock().push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn play_chime(&self) -> anyhow::Result<()> {
        *self.chimes.lock() += 1;
        Ok(())
    }
}

struct Station {
    active_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<ScannerStatus>,
    result_rx: mpsc::Receiver<ScanResult>,
    feed: FeedHandle,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    metrics: Arc<Metrics>,
    machine_task: JoinHandle<EventLog>,
    notify_task: JoinHandle<()>,
}

fn start_station() -> Station {
    let config = Config::default();
    let start = Local.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let metrics = Arc::new(Metrics::new());
    let directory = Arc::new(InMemoryDirectory::new(config.entities().to_vec()));
    let notifier = Arc::new(RecordingNotifier::default());

    let (notify_tx, worker) = create_notification_worker(notifier.clone(), metrics.clone(), 16);
    let notify_task = tokio::spawn(worker.run());

    let (reading_tx, reading_rx) = mpsc::channel(16);
    let (result_tx, result_rx) = mpsc::channel(16);
    let (active_tx, active_rx) = watch::channel(true);
    let (camera, feed) = FeedCamera::new();

    let decode_loop = DecodeLoop::new(
        &config,
        Box::new(camera),
        Arc::new(TextPayloadExtractor),
        clock.clone(),
        reading_tx,
        metrics.clone(),
    );
    let status_rx = decode_loop.status();
    tokio::spawn(decode_loop.run(active_rx));

    let mut machine =
        AttendanceMachine::new(&config, directory, metrics.clone()).with_side_effects(notify_tx);
    let machine_task = tokio::spawn(async move {
        machine.run(reading_rx, Some(result_tx)).await;
        machine.into_log()
    });

    Station {
        active_tx,
        status_rx,
        result_rx,
        feed,
        clock,
        notifier,
        metrics,
        machine_task,
        notify_task,
    }
}

impl Station {
    async fn ready(&mut self) {
        timeout(Duration::from_secs(2), self.status_rx.wait_for(|s| *s == ScannerStatus::Scanning))
            .await
            .expect("scanner did not start")
            .expect("status channel closed");
    }

    async fn scan(&mut self, payload: &str) -> ScanResult {
        assert!(self.feed.push_text(payload));
        timeout(Duration::from_secs(2), self.result_rx.recv())
            .await
            .expect("no scan result")
            .expect("result channel closed")
    }

    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(self.feed.pending_frames(), 0);
        assert!(self.result_rx.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_school_day_through_the_pipeline() {
    let mut station = start_station();
    station.ready().await;

    let r = station.scan("STU-001").await;
    assert_eq!(r.outcome, ScanOutcome::NewEvent);
    assert_eq!(r.event.as_ref().map(|e| e.kind), Some(AttendanceKind::Arrival));

    // Card still in front of the camera: the decode loop swallows it
    assert!(station.feed.push_text("STU-001"));
    station.assert_quiet().await;

    // Past the decode cooldown but inside the re-scan window
    station.clock.advance(Duration::from_secs(30));
    let r = station.scan("STU-001").await;
    assert_eq!(r.outcome, ScanOutcome::SuppressedTooSoon);

    station.clock.advance(Duration::from_secs(270));
    let r = station.scan("STU-001").await;
    assert_eq!(r.event.as_ref().map(|e| e.kind), Some(AttendanceKind::Departure));
    assert_eq!(r.notice, "Left at 08:05:00");

    station.clock.advance(Duration::from_secs(300));
    let r = station.scan("STU-001").await;
    assert_eq!(r.outcome, ScanOutcome::AlreadyComplete);

    let r = station.scan("XYZ").await;
    assert_eq!(r.outcome, ScanOutcome::UnknownToken);
    assert_eq!(r.notice, "Invalid QR Code: XYZ");

    // Shutting the scanner down drains the whole pipeline
    drop(station.active_tx);
    let log = timeout(Duration::from_secs(2), station.machine_task)
        .await
        .expect("attendance worker did not stop")
        .unwrap();
    timeout(Duration::from_secs(2), station.notify_task)
        .await
        .expect("notification worker did not stop")
        .unwrap();

    assert_eq!(log.len(), 2);
    assert!(!station.feed.is_acquired());

    let sms = station.notifier.sms.lock().clone();
    assert_eq!(sms.len(), 2);
    assert!(sms[0].1.contains("Emma Thompson has arrived at school safely at 08:00:00"));
    assert!(sms[1].1.contains("Emma Thompson has left school safely at 08:05:00"));
    assert_eq!(*station.notifier.chimes.lock(), 2);

    let summary = station.metrics.report();
    assert_eq!(summary.readings_emitted, 5);
    assert_eq!(summary.readings_deduplicated, 1);
    assert_eq!(summary.outcome_new_event, 2);
    assert_eq!(summary.outcome_unknown, 1);
}

#[tokio::test]
async fn test_two_entities_interleaved() {
    let mut station = start_station();
    station.ready().await;

    assert_eq!(station.scan("STU-002").await.outcome, ScanOutcome::NewEvent);
    assert_eq!(station.scan("STU-003").await.outcome, ScanOutcome::NewEvent);
    // Different token in between resets the decode cooldown
    let r = station.scan("STU-002").await;
    assert_eq!(r.outcome, ScanOutcome::SuppressedTooSoon);

    station.clock.advance(Duration::from_secs(61));
    let r = station.scan("STU-003").await;
    assert_eq!(r.event.map(|e| e.kind), Some(AttendanceKind::Departure));

    station.active_tx.send(false).unwrap();
    drop(station.active_tx);
    let log = timeout(Duration::from_secs(2), station.machine_task).await.unwrap().unwrap();
    assert_eq!(log.len(), 3);

    let today = Local.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap().date_naive();
    let stats = log.day_stats(today);
    assert_eq!((stats.present, stats.departed, stats.on_site), (2, 1, 1));
}
