//! Window-system shell for Overglass
//!
//! Owns the display connection, the persistent control window, the
//! global toggle hotkey, and the per-session click-through overlay
//! window that Vulkan presents into.

pub mod hotkey;
pub mod shell;
pub mod window;

pub use hotkey::Hotkey;
pub use shell::{Shell, ShellEvent};
pub use window::OverlayWindow;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("failed to open X11 display: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("X11 connection error: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X11 request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("X11 id allocation failed: {0}")]
    Id(#[from] x11rb::errors::ReplyOrIdError),

    #[error("{0} extension not available")]
    MissingExtension(&'static str),

    #[error("no keycode maps to the configured hotkey keysym")]
    HotkeyUnavailable,
}

pub type OverlayResult<T> = Result<T, OverlayError>;
