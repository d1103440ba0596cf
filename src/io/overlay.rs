//! Bounding indicator drawn over a detected token
//!
//! Rendering is best effort: the decode loop logs and ignores any error.

use crate::domain::types::Quad;
use crate::io::frame_source::Frame;
use tracing::debug;

pub trait Overlay: Send + Sync {
    fn outline(&self, frame: &Frame, corners: &Quad) -> anyhow::Result<()>;
}

/// Draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl Overlay for NullOverlay {
    fn outline(&self, _frame: &Frame, _corners: &Quad) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes the outline to the debug log instead of a screen
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOverlay;

impl Overlay for TracingOverlay {
    fn outline(&self, frame: &Frame, corners: &Quad) -> anyhow::Result<()> {
        let in_bounds = corners.iter().all(|p| {
            p.x >= 0.0 && p.y >= 0.0 && p.x <= frame.width as f32 && p.y <= frame.height as f32
        });
        anyhow::ensure!(in_bounds, "outline outside {}x{} frame", frame.width, frame.height);

        debug!(
            width = %frame.width,
            height = %frame.height,
            tl = ?(corners[0].x, corners[0].y),
            tr = ?(corners[1].x, corners[1].y),
            br = ?(corners[2].x, corners[2].y),
            bl = ?(corners[3].x, corners[3].y),
            "overlay_outline"
        );
        Ok(())
    }
}
