//! Capture source binding

use crate::{CaptureError, CaptureResult, Extent, Snapshot};
use log::{debug, info};
use std::sync::Arc;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, Pixmap, Window};
use x11rb::protocol::ErrorKind;
use x11rb::xcb_ffi::XCBConnection;

/// One redirected source window and its named backing pixmap.
///
/// The pixmap names the compositor's off-screen storage for the window;
/// it must be re-named after every source resize because the server
/// allocates fresh storage and stops updating the old pixmap.
pub struct CaptureSource {
    conn: Arc<XCBConnection>,
    window: Window,
    pixmap: Option<Pixmap>,
    extent: Extent,
}

impl CaptureSource {
    /// Redirect `window` and name its backing pixmap.
    pub fn bind(conn: Arc<XCBConnection>, window: Window) -> CaptureResult<Self> {
        if conn
            .extension_information(composite::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(CaptureError::CompositeUnavailable);
        }
        let version = conn.composite_query_version(0, 4)?.reply()?;
        debug!(
            "Composite version {}.{}",
            version.major_version, version.minor_version
        );

        let geometry = conn
            .get_geometry(window)?
            .reply()
            .map_err(map_window_error)?;
        let extent = Extent::new(geometry.width as u32, geometry.height as u32);

        conn.composite_redirect_window(window, composite::Redirect::AUTOMATIC)?
            .check()
            .map_err(map_window_error)?;

        let pixmap = conn.generate_id()?;
        conn.composite_name_window_pixmap(window, pixmap)?
            .check()
            .map_err(map_window_error)?;

        info!("bound capture source window {window:#x} at {extent}");
        Ok(Self {
            conn,
            window,
            pixmap: Some(pixmap),
            extent,
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// The extent the backing pixmap was named at.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Re-query the source window's live geometry. Polled every frame;
    /// source resizes are not delivered as events here.
    pub fn current_extent(&self) -> CaptureResult<Extent> {
        let geometry = self
            .conn
            .get_geometry(self.window)?
            .reply()
            .map_err(map_window_error)?;
        Ok(Extent::new(geometry.width as u32, geometry.height as u32))
    }

    /// Drop the stale pixmap and name the resized window's new backing
    /// storage.
    pub fn rebind(&mut self, extent: Extent) -> CaptureResult<()> {
        if let Some(old) = self.pixmap.take() {
            let _ = self.conn.free_pixmap(old);
        }

        let pixmap = self.conn.generate_id()?;
        self.conn
            .composite_name_window_pixmap(self.window, pixmap)?
            .check()
            .map_err(map_window_error)?;

        info!("capture source resized: {} -> {extent}", self.extent);
        self.pixmap = Some(pixmap);
        self.extent = extent;
        Ok(())
    }

    /// Read the current pixel contents of the backing pixmap.
    pub fn read_snapshot(&self) -> CaptureResult<Snapshot> {
        let pixmap = self.pixmap.ok_or(CaptureError::WindowGone)?;
        if self.extent.is_degenerate() {
            return Err(CaptureError::WindowGone);
        }

        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                pixmap,
                0,
                0,
                self.extent.width as u16,
                self.extent.height as u16,
                !0,
            )?
            .reply()
            .map_err(map_window_error)?;

        let bpp = self.bits_per_pixel(reply.depth);
        if bpp != 32 {
            return Err(CaptureError::UnsupportedFormat(bpp));
        }

        Snapshot::from_reply(reply.data, self.extent.width, self.extent.height)
    }

    /// Release the pixmap and the composite redirect. Idempotent.
    pub fn release(&mut self) {
        if let Some(pixmap) = self.pixmap.take() {
            let _ = self.conn.free_pixmap(pixmap);
            let _ = self
                .conn
                .composite_unredirect_window(self.window, composite::Redirect::AUTOMATIC);
            let _ = self.conn.flush();
            debug!("released capture source window {:#x}", self.window);
        }
    }

    /// Server-reported bits per pixel for pixmaps of `depth`.
    fn bits_per_pixel(&self, depth: u8) -> u8 {
        self.conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|format| format.depth == depth)
            .map(|format| format.bits_per_pixel)
            .unwrap_or(0)
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// X errors naming a dead window or drawable mean the capture target
/// disappeared; everything else is surfaced as-is.
fn map_window_error(err: ReplyError) -> CaptureError {
    match &err {
        ReplyError::X11Error(x11) if matches!(x11.error_kind, ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Pixmap) => {
            CaptureError::WindowGone
        }
        _ => CaptureError::Reply(err),
    }
}
