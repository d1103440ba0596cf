//! Token extraction from frames

use crate::domain::types::{Point, Quad};
use crate::io::frame_source::Frame;

/// A token found in a frame and where it was found
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub token: String,
    pub corners: Quad,
}

/// Finds an identity token in a pixel buffer
pub trait TokenExtractor: Send + Sync {
    fn extract(&self, frame: &Frame) -> Option<Detection>;
}

/// Reads the frame buffer as a UTF-8 text payload
///
/// Used with the feed camera, where each frame carries the token directly.
/// Blank or non-UTF-8 payloads decode to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextPayloadExtractor;

impl TokenExtractor for TextPayloadExtractor {
    fn extract(&self, frame: &Frame) -> Option<Detection> {
        let text = std::str::from_utf8(&frame.pixels).ok()?.trim();
        if text.is_empty() {
            return None;
        }

        let (w, h) = (frame.width as f32, frame.height as f32);
        Some(Detection {
            token: text.to_string(),
            corners: [Point::new(0.0, 0.0), Point::new(w, 0.0), Point::new(w, h), Point::new(0.0, h)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_trimmed_text() {
        let detection = TextPayloadExtractor.extract(&Frame::from_text("  STU-001\n")).unwrap();
        assert_eq!(detection.token, "STU-001");
        assert_eq!(detection.corners[2], Point::new(10.0, 1.0));
    }

    #[test]
    fn test_blank_frame_has_no_token() {
        assert!(TextPayloadExtractor.extract(&Frame::from_text("   ")).is_none());
        assert!(TextPayloadExtractor.extract(&Frame::from_text("")).is_none());
    }

    #[test]
    fn test_binary_frame_has_no_token() {
        let frame = Frame::new(2, 1, vec![0xff, 0xfe]);
        assert!(TextPayloadExtractor.extract(&frame).is_none());
    }
}
