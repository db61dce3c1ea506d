//! XComposite window capture for Overglass
//!
//! Binds one redirected X11 window and reads its off-screen pixel
//! storage once per frame.

pub mod focus;
pub mod snapshot;
pub mod source;

pub use focus::focused_toplevel;
pub use snapshot::Snapshot;
pub use source::CaptureSource;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("X11 connection error: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X11 request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("X11 id allocation failed: {0}")]
    Id(#[from] x11rb::errors::ReplyOrIdError),

    #[error("Composite extension not available")]
    CompositeUnavailable,

    #[error("no focused top-level window to capture")]
    NoFocusedWindow,

    #[error("capture target window is gone")]
    WindowGone,

    #[error("unsupported pixel layout: {0} bits per pixel")]
    UnsupportedFormat(u8),

    #[error("snapshot geometry mismatch: got {got} bytes, need {need}")]
    SnapshotMismatch { got: usize, need: usize },
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A frame must never be processed against a zero extent.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Size in bytes at 4 bytes per pixel, tightly packed.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_extent() {
        assert!(Extent::new(0, 480).is_degenerate());
        assert!(Extent::new(640, 0).is_degenerate());
        assert!(!Extent::new(640, 480).is_degenerate());
    }

    #[test]
    fn byte_size_is_four_bytes_per_pixel() {
        assert_eq!(Extent::new(800, 600).byte_size(), 800 * 600 * 4);
    }
}
