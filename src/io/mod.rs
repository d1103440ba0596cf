//! IO modules - external system interfaces
//!
//! This module contains the boundaries the scan pipeline talks to:
//! - `frame_source` - Camera acquisition and frame reads
//! - `extractor` - Token extraction from a frame
//! - `overlay` - Best-effort bounding indicator over a detected token
//! - `notifier` - Guardian SMS and station chime delivery
//! - `textgen` - External text-generation service for daily summaries

pub mod extractor;
pub mod frame_source;
pub mod notifier;
pub mod overlay;
pub mod textgen;

// Re-export commonly used types
pub use extractor::{Detection, TextPayloadExtractor, TokenExtractor};
pub use frame_source::{AcquisitionError, FeedCamera, FeedHandle, Frame, FrameSource};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use overlay::{NullOverlay, Overlay, TracingOverlay};
pub use textgen::{HttpTextGenerator, TextGenerator};
