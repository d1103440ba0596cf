//! Decode loop - turns a live frame source into candidate readings
//!
//! While the activation flag is on, the loop owns the frame source and runs
//! one decode cycle per frame interval. Each decoded token passes through a
//! per-token cooldown so a card held in front of the camera yields a single
//! reading instead of one per frame.
//!
//! Lifecycle:
//! - flag on: acquire the source, then cycle
//! - flag off: release the source, stop cycling, wait for the flag again
//! - acquisition error: report `ScannerStatus::Failed` once, wait for the
//!   caller to set the flag again (no automatic retry)
//! - flag sender dropped, reading receiver dropped, or loop dropped:
//!   release the source and stop

use crate::domain::types::CandidateReading;
use crate::infra::clock::Clock;
use crate::infra::config::{Config, Facing};
use crate::infra::metrics::Metrics;
use crate::io::extractor::TokenExtractor;
use crate::io::frame_source::{AcquisitionError, FrameSource};
use crate::io::overlay::{NullOverlay, Overlay};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Scanner state as shown to the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannerStatus {
    Idle,
    Starting,
    Scanning,
    Failed(AcquisitionError),
    Stopped,
}

impl ScannerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerStatus::Idle => "idle",
            ScannerStatus::Starting => "starting",
            ScannerStatus::Scanning => "scanning",
            ScannerStatus::Failed(_) => "failed",
            ScannerStatus::Stopped => "stopped",
        }
    }
}

/// Per-token cooldown applied to decoded tokens
///
/// A token is admitted when it differs from the last admitted token, or
/// when at least `cooldown` has passed since that token was admitted.
#[derive(Debug)]
pub struct ReadingThrottle {
    cooldown: Duration,
    last: Option<(String, DateTime<Local>)>,
}

impl ReadingThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown, last: None }
    }

    /// Decide whether to emit `token` seen at `now`, remembering it if so
    pub fn admit(&mut self, token: &str, now: DateTime<Local>) -> bool {
        let admitted = match &self.last {
            // A clock that went backwards counts as "not yet elapsed"
            Some((last_token, last_at)) if last_token == token => {
                (now - *last_at).to_std().map(|elapsed| elapsed >= self.cooldown).unwrap_or(false)
            }
            _ => true,
        };
        if admitted {
            self.last = Some((token.to_string(), now));
        }
        admitted
    }
}

enum SessionEnd {
    /// Flag went off; wait for it to come back on
    Deactivated,
    /// Acquisition failed; wait for a fresh activation
    Failed,
    /// Flag sender or reading receiver is gone
    Closed,
}

/// Resolves once the flag is off. Errors when the flag sender is dropped.
async fn until_deactivated(active: &mut watch::Receiver<bool>) -> Result<(), watch::error::RecvError> {
    active.wait_for(|on| !*on).await.map(|_| ())
}

/// Cooperative frame-decode loop
pub struct DecodeLoop {
    source: Box<dyn FrameSource>,
    extractor: Arc<dyn TokenExtractor>,
    overlay: Arc<dyn Overlay>,
    clock: Arc<dyn Clock>,
    throttle: ReadingThrottle,
    frame_interval: Duration,
    facing: Facing,
    reading_tx: mpsc::Sender<CandidateReading>,
    status_tx: watch::Sender<ScannerStatus>,
    metrics: Arc<Metrics>,
}

impl DecodeLoop {
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource>,
        extractor: Arc<dyn TokenExtractor>,
        clock: Arc<dyn Clock>,
        reading_tx: mpsc::Sender<CandidateReading>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ScannerStatus::Idle);
        Self {
            source,
            extractor,
            overlay: Arc::new(NullOverlay),
            clock,
            throttle: ReadingThrottle::new(config.cooldown()),
            frame_interval: config.frame_interval(),
            facing: config.facing(),
            reading_tx,
            status_tx,
            metrics,
        }
    }

    /// Set the overlay used to outline detected tokens
    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = overlay;
        self
    }

    /// Subscribe to scanner status changes
    pub fn status(&self) -> watch::Receiver<ScannerStatus> {
        self.status_tx.subscribe()
    }

    /// Run until the activation sender or the reading receiver goes away
    pub async fn run(mut self, mut active: watch::Receiver<bool>) {
        info!(
            facing = %self.facing.as_str(),
            frame_interval_ms = %self.frame_interval.as_millis(),
            cooldown_ms = %self.throttle.cooldown.as_millis(),
            "decode_loop_started"
        );

        loop {
            let activated = active.wait_for(|on| *on).await.is_ok();
            if !activated {
                break;
            }

            match self.scan_session(&mut active).await {
                SessionEnd::Deactivated => {}
                SessionEnd::Failed => {
                    // No automatic retry: the next flag update re-triggers acquisition
                    if active.changed().await.is_err() {
                        break;
                    }
                }
                SessionEnd::Closed => break,
            }
        }

        self.source.release();
        self.status_tx.send_replace(ScannerStatus::Stopped);
        info!("decode_loop_stopped");
    }

    /// One activation: acquire, cycle until deactivated, release
    async fn scan_session(&mut self, active: &mut watch::Receiver<bool>) -> SessionEnd {
        self.status_tx.send_replace(ScannerStatus::Starting);

        let facing = self.facing;
        let acquisition = tokio::select! {
            result = self.source.acquire(facing) => Ok(result),
            res = until_deactivated(active) => Err(res.is_err()),
        };

        match acquisition {
            Ok(Ok(())) => {
                info!(facing = %facing.as_str(), "scanner_activated");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "scanner_acquisition_failed");
                self.metrics.record_acquisition_failure();
                self.status_tx.send_replace(ScannerStatus::Failed(e));
                return SessionEnd::Failed;
            }
            Err(closed) => {
                // Deactivated while acquiring; the source may be half open
                self.source.release();
                self.status_tx.send_replace(ScannerStatus::Idle);
                return if closed { SessionEnd::Closed } else { SessionEnd::Deactivated };
            }
        }

        self.status_tx.send_replace(ScannerStatus::Scanning);

        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                biased;
                res = until_deactivated(active) => {
                    break if res.is_err() { SessionEnd::Closed } else { SessionEnd::Deactivated };
                }
                _ = ticker.tick() => {
                    if !self.cycle(active).await {
                        break SessionEnd::Closed;
                    }
                }
            }
        };

        self.source.release();
        self.status_tx.send_replace(ScannerStatus::Idle);
        info!("scanner_deactivated");
        end
    }

    /// One decode cycle. Returns false once readings can no longer be delivered.
    async fn cycle(&mut self, active: &mut watch::Receiver<bool>) -> bool {
        if !self.source.frame_ready() {
            return true;
        }
        let Some(frame) = self.source.read_frame() else {
            return true;
        };
        self.metrics.record_frame_sampled();

        let Some(detection) = self.extractor.extract(&frame) else {
            trace!("frame_no_token");
            return true;
        };
        self.metrics.record_token_decoded();

        // Deactivated while decoding: the result belongs to a stopped scanner
        let still_active = *active.borrow();
        if !still_active {
            debug!(token = %detection.token, "reading_discarded_inactive");
            self.metrics.record_reading_discarded();
            return true;
        }

        let now = self.clock.now();
        if !self.throttle.admit(&detection.token, now) {
            trace!(token = %detection.token, "reading_deduplicated");
            self.metrics.record_reading_deduplicated();
            return true;
        }

        if let Err(e) = self.overlay.outline(&frame, &detection.corners) {
            debug!(error = %e, "overlay_failed");
        }

        // A full queue must not hold the camera past deactivation
        let permit = tokio::select! {
            biased;
            res = until_deactivated(active) => {
                debug!(token = %detection.token, "reading_discarded_inactive");
                self.metrics.record_reading_discarded();
                return res.is_ok();
            }
            permit = self.reading_tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("reading_receiver_closed");
                    return false;
                }
            },
        };

        info!(token = %detection.token, captured_at = %now.format("%H:%M:%S"), "reading_emitted");
        self.metrics.record_reading_emitted();
        permit.send(CandidateReading::new(detection.token, now));
        true
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.source.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use crate::io::extractor::TextPayloadExtractor;
    use crate::io::frame_source::{FeedCamera, FeedHandle, Frame};
    use chrono::TimeZone;
    use tokio::time::timeout;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_throttle_same_token_within_cooldown() {
        let mut throttle = ReadingThrottle::new(Duration::from_secs(3));
        assert!(throttle.admit("STU-001", t0()));
        assert!(!throttle.admit("STU-001", t0() + chrono::Duration::milliseconds(2999)));
        assert!(throttle.admit("STU-001", t0() + chrono::Duration::milliseconds(3000)));
    }

    #[test]
    fn test_throttle_different_token_always_admitted() {
        let mut throttle = ReadingThrottle::new(Duration::from_secs(3));
        assert!(throttle.admit("STU-001", t0()));
        assert!(throttle.admit("STU-002", t0()));
        // The cooldown tracks the last admitted token only
        assert!(throttle.admit("STU-001", t0()));
    }

    #[test]
    fn test_throttle_rejection_does_not_extend_cooldown() {
        let mut throttle = ReadingThrottle::new(Duration::from_secs(3));
        assert!(throttle.admit("STU-001", t0()));
        assert!(!throttle.admit("STU-001", t0() + chrono::Duration::seconds(2)));
        assert!(throttle.admit("STU-001", t0() + chrono::Duration::seconds(3)));
    }

    #[test]
    fn test_throttle_clock_backwards() {
        let mut throttle = ReadingThrottle::new(Duration::from_secs(3));
        assert!(throttle.admit("STU-001", t0()));
        assert!(!throttle.admit("STU-001", t0() - chrono::Duration::seconds(10)));
    }

    struct Harness {
        active_tx: watch::Sender<bool>,
        status_rx: watch::Receiver<ScannerStatus>,
        reading_rx: mpsc::Receiver<CandidateReading>,
        feed: FeedHandle,
        clock: Arc<ManualClock>,
        metrics: Arc<Metrics>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_loop(overlay: Option<Arc<dyn Overlay>>) -> Harness {
        spawn_loop_with_capacity(overlay, 16)
    }

    fn spawn_loop_with_capacity(overlay: Option<Arc<dyn Overlay>>, capacity: usize) -> Harness {
        let config = Config::default();
        let (camera, feed) = FeedCamera::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let metrics = Arc::new(Metrics::new());
        let (reading_tx, reading_rx) = mpsc::channel(capacity);
        let (active_tx, active_rx) = watch::channel(false);

        let mut decode_loop = DecodeLoop::new(
            &config,
            Box::new(camera),
            Arc::new(TextPayloadExtractor),
            clock.clone(),
            reading_tx,
            metrics.clone(),
        );
        if let Some(overlay) = overlay {
            decode_loop = decode_loop.with_overlay(overlay);
        }
        let status_rx = decode_loop.status();
        let task = tokio::spawn(decode_loop.run(active_rx));

        Harness { active_tx, status_rx, reading_rx, feed, clock, metrics, task }
    }

    async fn wait_status(status_rx: &mut watch::Receiver<ScannerStatus>, want: ScannerStatus) {
        timeout(Duration::from_secs(2), status_rx.wait_for(|s| *s == want))
            .await
            .expect("status timeout")
            .expect("status channel closed");
    }

    async fn next_reading(rx: &mut mpsc::Receiver<CandidateReading>) -> CandidateReading {
        timeout(Duration::from_secs(2), rx.recv()).await.expect("reading timeout").expect("closed")
    }

    /// Give the loop enough cycles to drain the feed
    async fn settle(feed: &FeedHandle) {
        for _ in 0..100 {
            if feed.pending_frames() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_inactive_loop_does_not_acquire() {
        let h = spawn_loop(None);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.feed.acquire_count(), 0);
        assert_eq!(*h.status_rx.borrow(), ScannerStatus::Idle);
    }

    #[tokio::test]
    async fn test_same_token_deduplicated_within_cooldown() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.feed.push_text("STU-001");
        let first = next_reading(&mut h.reading_rx).await;
        assert_eq!(first.token, "STU-001");
        assert_eq!(first.captured_at, t0());

        // Held steadily in front of the camera for another second
        h.clock.advance(Duration::from_secs(1));
        h.feed.push_text("STU-001");
        h.feed.push_text("STU-001");
        settle(&h.feed).await;
        assert!(h.reading_rx.try_recv().is_err());

        h.clock.advance(Duration::from_secs(2));
        h.feed.push_text("STU-001");
        let second = next_reading(&mut h.reading_rx).await;
        assert_eq!(second.captured_at, t0() + chrono::Duration::seconds(3));

        let summary = h.metrics.report();
        assert_eq!(summary.readings_emitted, 2);
        assert_eq!(summary.readings_deduplicated, 2);
    }

    #[tokio::test]
    async fn test_blank_frames_produce_nothing() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.feed.push_frame(Frame::new(4, 1, vec![b' '; 4]));
        settle(&h.feed).await;
        assert!(h.reading_rx.try_recv().is_err());
        assert_eq!(h.metrics.report().frames_sampled, 1);
    }

    #[tokio::test]
    async fn test_deactivation_releases_camera() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;
        assert!(h.feed.is_acquired());

        h.active_tx.send(false).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Idle).await;
        assert!(!h.feed.is_acquired());
        assert_eq!(h.feed.release_count(), 1);

        // Frames offered while inactive never reach the loop
        assert!(!h.feed.push_text("STU-001"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.reading_rx.try_recv().is_err());

        // Reactivation acquires again
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;
        assert_eq!(h.feed.acquire_count(), 2);
        h.feed.push_text("STU-002");
        assert_eq!(next_reading(&mut h.reading_rx).await.token, "STU-002");
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_terminal_until_reactivated() {
        let mut h = spawn_loop(None);
        h.feed.set_deny_access(true);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Failed(AcquisitionError::PermissionDenied))
            .await;

        // No automatic retry
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.feed.acquire_count(), 1);
        assert!(!h.task.is_finished());

        // Operator fixes permissions and re-triggers activation
        h.feed.set_deny_access(false);
        h.active_tx.send(false).unwrap();
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;
        assert_eq!(h.feed.acquire_count(), 2);
        assert_eq!(h.metrics.report().acquisition_failures, 1);
    }

    #[tokio::test]
    async fn test_dropping_activation_sender_stops_loop() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        drop(h.active_tx);
        timeout(Duration::from_secs(2), h.task).await.expect("loop did not stop").unwrap();
        assert!(!h.feed.is_acquired());
        assert_eq!(*h.status_rx.borrow(), ScannerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_aborted_loop_releases_camera() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.task.abort();
        let _ = h.task.await;
        assert!(!h.feed.is_acquired());
        assert_eq!(h.feed.release_count(), 1);
    }

    struct FailingOverlay;

    impl Overlay for FailingOverlay {
        fn outline(&self, _frame: &Frame, _corners: &crate::domain::types::Quad) -> anyhow::Result<()> {
            anyhow::bail!("no canvas")
        }
    }

    #[tokio::test]
    async fn test_overlay_failure_does_not_block_emission() {
        let mut h = spawn_loop(Some(Arc::new(FailingOverlay)));
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.feed.push_text("STU-003");
        assert_eq!(next_reading(&mut h.reading_rx).await.token, "STU-003");
    }

    #[tokio::test]
    async fn test_closed_reading_channel_stops_loop() {
        let mut h = spawn_loop(None);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.reading_rx.close();
        h.feed.push_text("STU-001");
        timeout(Duration::from_secs(2), h.task).await.expect("loop did not stop").unwrap();
        assert!(!h.feed.is_acquired());
    }

    #[tokio::test]
    async fn test_deactivation_with_full_reading_queue_releases_camera() {
        // Nobody drains the queue, so the second reading has nowhere to go
        let mut h = spawn_loop_with_capacity(None, 1);
        h.active_tx.send(true).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Scanning).await;

        h.feed.push_text("STU-001");
        settle(&h.feed).await;
        assert_eq!(h.metrics.readings_emitted(), 1);

        h.feed.push_text("STU-002");
        settle(&h.feed).await;
        assert_eq!(h.metrics.readings_emitted(), 1);
        assert_eq!(h.metrics.report().readings_discarded, 0);

        h.active_tx.send(false).unwrap();
        wait_status(&mut h.status_rx, ScannerStatus::Idle).await;
        assert!(!h.feed.is_acquired());
        assert_eq!(h.feed.release_count(), 1);

        // The pending reading was dropped, not delivered late
        assert_eq!(next_reading(&mut h.reading_rx).await.token, "STU-001");
        assert!(h.reading_rx.try_recv().is_err());
        let report = h.metrics.report();
        assert_eq!(report.readings_emitted, 1);
        assert_eq!(report.readings_discarded, 1);
    }
}
