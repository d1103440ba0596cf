//! Frame sources - the camera boundary of the decode loop
//!
//! A `FrameSource` is acquired exclusively when scanning starts and
//! released when it stops. `FeedCamera` is an in-process source whose frames
//! are pushed through a `FeedHandle`; the binary feeds it from stdin and the
//! tests feed it directly.

use crate::infra::config::Facing;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Raw visual buffer captured from the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }

    /// A single-row frame carrying a text payload, used by the feed camera
    pub fn from_text(payload: &str) -> Self {
        let pixels = payload.as_bytes().to_vec();
        Self { width: pixels.len() as u32, height: 1, pixels }
    }
}

/// Failure to acquire the frame source
///
/// Terminal for the current activation: the scanner reports it once and
/// waits for the caller to re-activate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("camera already in use")]
    Busy,
}

impl AcquisitionError {
    /// Message shown to the operator
    pub fn user_message(&self) -> &'static str {
        match self {
            AcquisitionError::PermissionDenied => {
                "Could not access camera. Please ensure permissions are granted."
            }
            AcquisitionError::Unavailable(_) => "Could not access camera. No camera is available.",
            AcquisitionError::Busy => "Could not access camera. It is in use by another scanner.",
        }
    }
}

/// A camera, as seen by the decode loop
#[async_trait]
pub trait FrameSource: Send {
    /// Start the feed. Must be awaited before the first decode cycle.
    async fn acquire(&mut self, facing: Facing) -> Result<(), AcquisitionError>;

    /// Stop the feed and give the device back
    fn release(&mut self);

    /// Whether a frame not yet read is available
    fn frame_ready(&self) -> bool;

    /// Take the current frame
    fn read_frame(&mut self) -> Option<Frame>;
}

#[derive(Debug, Default)]
struct FeedState {
    acquired: bool,
    deny_access: bool,
    facing: Option<Facing>,
    frames: VecDeque<Frame>,
    acquire_count: u64,
    release_count: u64,
}

/// In-process camera fed through a `FeedHandle`
#[derive(Debug)]
pub struct FeedCamera {
    state: Arc<Mutex<FeedState>>,
}

/// Producer/inspection side of a `FeedCamera`
#[derive(Debug, Clone)]
pub struct FeedHandle {
    state: Arc<Mutex<FeedState>>,
}

impl FeedCamera {
    pub fn new() -> (Self, FeedHandle) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (Self { state: state.clone() }, FeedHandle { state })
    }
}

#[async_trait]
impl FrameSource for FeedCamera {
    async fn acquire(&mut self, facing: Facing) -> Result<(), AcquisitionError> {
        let mut state = self.state.lock();
        state.acquire_count += 1;
        if state.deny_access {
            return Err(AcquisitionError::PermissionDenied);
        }
        if state.acquired {
            return Err(AcquisitionError::Busy);
        }
        state.acquired = true;
        state.facing = Some(facing);
        info!(facing = %facing.as_str(), "feed_camera_acquired");
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        if state.acquired {
            state.acquired = false;
            state.release_count += 1;
            state.frames.clear();
            info!("feed_camera_released");
        }
    }

    fn frame_ready(&self) -> bool {
        !self.state.lock().frames.is_empty()
    }

    fn read_frame(&mut self) -> Option<Frame> {
        self.state.lock().frames.pop_front()
    }
}

impl FeedHandle {
    /// Queue a frame. Frames pushed while the camera is released are lost.
    pub fn push_frame(&self, frame: Frame) -> bool {
        let mut state = self.state.lock();
        if !state.acquired {
            debug!("feed_camera_frame_dropped_inactive");
            return false;
        }
        state.frames.push_back(frame);
        true
    }

    pub fn push_text(&self, payload: &str) -> bool {
        self.push_frame(Frame::from_text(payload))
    }

    /// Make subsequent acquisitions fail with `PermissionDenied`
    pub fn set_deny_access(&self, deny: bool) {
        self.state.lock().deny_access = deny;
    }

    pub fn is_acquired(&self) -> bool {
        self.state.lock().acquired
    }

    pub fn facing(&self) -> Option<Facing> {
        self.state.lock().facing
    }

    pub fn acquire_count(&self) -> u64 {
        self.state.lock().acquire_count
    }

    pub fn release_count(&self) -> u64 {
        self.state.lock().release_count
    }

    pub fn pending_frames(&self) -> usize {
        self.state.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (mut camera, handle) = FeedCamera::new();

        assert!(!handle.push_text("STU-001"));
        camera.acquire(Facing::Environment).await.unwrap();
        assert!(handle.is_acquired());
        assert_eq!(handle.facing(), Some(Facing::Environment));

        assert!(handle.push_text("STU-001"));
        assert!(camera.frame_ready());
        assert_eq!(camera.read_frame(), Some(Frame::from_text("STU-001")));
        assert!(!camera.frame_ready());

        handle.push_text("STU-002");
        camera.release();
        assert!(!handle.is_acquired());
        assert_eq!(handle.release_count(), 1);
        assert_eq!(handle.pending_frames(), 0);

        // Releasing twice is harmless
        camera.release();
        assert_eq!(handle.release_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_denied() {
        let (mut camera, handle) = FeedCamera::new();
        handle.set_deny_access(true);

        let err = camera.acquire(Facing::User).await.unwrap_err();
        assert_eq!(err, AcquisitionError::PermissionDenied);
        assert!(!handle.is_acquired());
        assert_eq!(handle.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_twice_is_busy() {
        let (mut camera, _handle) = FeedCamera::new();
        camera.acquire(Facing::Environment).await.unwrap();
        assert_eq!(camera.acquire(Facing::Environment).await, Err(AcquisitionError::Busy));
    }

    #[test]
    fn test_frame_from_text() {
        let frame = Frame::from_text("abc");
        assert_eq!(frame.width, 3);
        assert_eq!(frame.height, 1);
        assert_eq!(frame.pixels, b"abc".to_vec());
    }

    #[test]
    fn test_user_message() {
        assert!(AcquisitionError::PermissionDenied.user_message().contains("permissions"));
        assert_eq!(AcquisitionError::Busy.to_string(), "camera already in use");
    }
}
