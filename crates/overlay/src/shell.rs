//! Persistent window-system state shared by all sessions

use crate::{Hotkey, OverlayResult};
use capture_x11::Extent;
use log::info;
use std::ffi::c_void;
use std::sync::Arc;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, ModMask, PropMode, Screen, Window,
    WindowClass,
};
use x11rb::protocol::Event;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::xcb_ffi::XCBConnection;

/// Window-system event, already filtered down to what the session and
/// the idle loop care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellEvent {
    /// The global hotkey was pressed.
    Toggle,
    /// A window we listen on was resized or moved.
    Configured { window: Window, extent: Extent },
    /// A window we listen on was destroyed.
    Destroyed { window: Window },
}

/// The display connection, control window, and hotkey grab.
///
/// Lives for the whole process; session teardown never touches it.
pub struct Shell {
    conn: Arc<XCBConnection>,
    screen: Screen,
    control_window: Window,
    hotkey: Hotkey,
    atom_wm_state: u32,
    atom_wm_state_fullscreen: u32,
}

impl Shell {
    /// Open the display, create the control window, and grab the
    /// toggle hotkey.
    pub fn connect(toggle_keysym: u32, toggle_modifiers: ModMask) -> OverlayResult<Self> {
        let (conn, screen_num) = XCBConnection::connect(None)?;
        let conn = Arc::new(conn);
        let screen = conn.setup().roots[screen_num].clone();

        let atom_wm_state = conn.intern_atom(false, b"_NET_WM_STATE")?.reply()?.atom;
        let atom_wm_state_fullscreen = conn
            .intern_atom(false, b"_NET_WM_STATE_FULLSCREEN")?
            .reply()?
            .atom;

        let control_window = conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(screen.white_pixel)
            .event_mask(EventMask::EXPOSURE | EventMask::STRUCTURE_NOTIFY);
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            control_window,
            screen.root,
            0,
            0,
            400,
            300,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &aux,
        )?
        .check()?;
        conn.change_property8(
            PropMode::REPLACE,
            control_window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            b"Overglass",
        )?;
        conn.map_window(control_window)?.check()?;
        conn.flush()?;

        let hotkey = Hotkey::grab(conn.as_ref(), screen.root, toggle_keysym, toggle_modifiers)?;

        info!(
            "shell ready on screen {screen_num} ({}x{})",
            screen.width_in_pixels, screen.height_in_pixels
        );
        Ok(Self {
            conn,
            screen,
            control_window,
            hotkey,
            atom_wm_state,
            atom_wm_state_fullscreen,
        })
    }

    pub fn connection(&self) -> &Arc<XCBConnection> {
        &self.conn
    }

    /// Raw xcb connection pointer for Vulkan surface creation.
    pub fn raw_connection(&self) -> *mut c_void {
        self.conn.get_raw_xcb_connection()
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn root(&self) -> Window {
        self.screen.root
    }

    pub fn control_window(&self) -> Window {
        self.control_window
    }

    /// Full size of the screen the overlay covers.
    pub fn screen_extent(&self) -> Extent {
        Extent::new(
            self.screen.width_in_pixels as u32,
            self.screen.height_in_pixels as u32,
        )
    }

    pub(crate) fn atom_wm_state(&self) -> u32 {
        self.atom_wm_state
    }

    pub(crate) fn atom_wm_state_fullscreen(&self) -> u32 {
        self.atom_wm_state_fullscreen
    }

    /// Block until the next event of interest.
    pub fn wait_event(&self) -> OverlayResult<ShellEvent> {
        loop {
            let event = self.conn.wait_for_event()?;
            if let Some(translated) = self.translate(&event) {
                return Ok(translated);
            }
        }
    }

    /// Drain one pending event of interest, without blocking.
    pub fn poll_event(&self) -> OverlayResult<Option<ShellEvent>> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(translated) = self.translate(&event) {
                return Ok(Some(translated));
            }
        }
        Ok(None)
    }

    fn translate(&self, event: &Event) -> Option<ShellEvent> {
        match event {
            Event::KeyPress(key) if self.hotkey.matches(key.detail, u16::from(key.state)) => {
                Some(ShellEvent::Toggle)
            }
            Event::ConfigureNotify(cfg) => Some(ShellEvent::Configured {
                window: cfg.window,
                extent: Extent::new(cfg.width as u32, cfg.height as u32),
            }),
            Event::DestroyNotify(destroyed) => Some(ShellEvent::Destroyed {
                window: destroyed.window,
            }),
            _ => None,
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.hotkey.ungrab(self.conn.as_ref(), self.screen.root);
        let _ = self.conn.destroy_window(self.control_window);
        let _ = self.conn.flush();
    }
}
