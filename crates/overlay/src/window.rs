//! Overlay window implementation

use crate::{OverlayError, OverlayResult, Shell};
use capture_x11::Extent;
use log::{debug, info};
use std::sync::Arc;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::shape;
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    ClientMessageEvent, ConfigureWindowAux, ConnectionExt as _, CreateWindowAux, EventMask,
    InputFocus, Window, WindowClass,
};
use x11rb::xcb_ffi::XCBConnection;
use x11rb::CURRENT_TIME;

// _NET_WM_STATE client message action: add the property.
const NET_WM_STATE_ADD: u32 = 1;

/// Borderless, click-through, fullscreen presentation window.
///
/// Created override-redirect so the window manager never maps, focuses
/// or decorates it, with an empty XFixes input region so every input
/// event passes through to whatever is underneath.
pub struct OverlayWindow {
    conn: Arc<XCBConnection>,
    window: Window,
    extent: Extent,
    destroyed: bool,
}

impl OverlayWindow {
    /// Create and map the overlay covering the whole screen, then hand
    /// input focus back to the capture target.
    pub fn create(shell: &Shell, focus_target: Window) -> OverlayResult<Self> {
        let conn = Arc::clone(shell.connection());
        let screen = shell.screen();
        let extent = shell.screen_extent();

        let window = conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .override_redirect(1)
            .background_pixel(screen.black_pixel)
            .border_pixel(0)
            .event_mask(EventMask::EXPOSURE | EventMask::STRUCTURE_NOTIFY);
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            screen.root,
            0,
            0,
            extent.width as u16,
            extent.height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &aux,
        )?
        .check()?;

        // Empty input region: clicks and keys fall through the overlay.
        if conn
            .extension_information(xfixes::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(OverlayError::MissingExtension("XFIXES"));
        }
        conn.xfixes_query_version(5, 0)?.reply()?;
        let region = conn.generate_id()?;
        conn.xfixes_create_region(region, &[])?.check()?;
        conn.xfixes_set_window_shape_region(window, shape::SK::INPUT, 0, 0, region)?
            .check()?;
        conn.xfixes_destroy_region(region)?.check()?;

        conn.map_window(window)?.check()?;
        request_fullscreen(&conn, shell, window)?;

        // The overlay must never hold focus; the captured application
        // keeps receiving input directly.
        conn.set_input_focus(InputFocus::PARENT, focus_target, CURRENT_TIME)?
            .check()?;
        conn.flush()?;

        info!("overlay window {window:#x} mapped at {extent}");
        Ok(Self {
            conn,
            window,
            extent,
            destroyed: false,
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Re-query the server for the overlay's live size. The platform
    /// answer is authoritative during surface rebuilds.
    pub fn current_extent(&self) -> OverlayResult<Extent> {
        if self.destroyed {
            return Ok(self.extent);
        }
        let geometry = self.conn.get_geometry(self.window)?.reply()?;
        Ok(Extent::new(geometry.width as u32, geometry.height as u32))
    }

    pub fn note_configured(&mut self, extent: Extent) {
        self.extent = extent;
    }

    /// Destroy the overlay window. Idempotent; never touches the
    /// shared connection.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            let _ = self.conn.destroy_window(self.window);
            let _ = self.conn.flush();
            debug!("overlay window {:#x} destroyed", self.window);
        }
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Ask for the fullscreen state through the EWMH protocol: a
/// `_NET_WM_STATE` client message sent to the root window.
fn request_fullscreen(conn: &XCBConnection, shell: &Shell, window: Window) -> OverlayResult<()> {
    let extent = shell.screen_extent();
    let geometry = ConfigureWindowAux::new()
        .x(0)
        .y(0)
        .width(extent.width)
        .height(extent.height);
    conn.configure_window(window, &geometry)?.check()?;

    let message = ClientMessageEvent::new(
        32,
        window,
        shell.atom_wm_state(),
        [NET_WM_STATE_ADD, shell.atom_wm_state_fullscreen(), 0, 1, 0],
    );
    conn.send_event(
        false,
        shell.root(),
        EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
        message,
    )?
    .check()?;
    Ok(())
}
