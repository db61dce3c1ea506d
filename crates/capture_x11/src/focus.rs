//! Focused top-level window discovery

use crate::{CaptureError, CaptureResult};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, Window};

// Input focus replies may name the pseudo-window PointerRoot.
const POINTER_ROOT: Window = 1;

/// Find the top-level window that currently has input focus.
///
/// Falls back to the EWMH `_NET_ACTIVE_WINDOW` property when the focus
/// reply names no usable window, then climbs the window tree until the
/// parent is the root.
pub fn focused_toplevel(conn: &impl Connection, root: Window) -> CaptureResult<Window> {
    let reply = conn.get_input_focus()?.reply()?;
    let mut focus = reply.focus;

    if focus == x11rb::NONE || focus == POINTER_ROOT {
        focus = active_window(conn, root)?.ok_or(CaptureError::NoFocusedWindow)?;
    }

    Ok(toplevel_of(conn, root, focus))
}

/// Read `_NET_ACTIVE_WINDOW` from the root window, if the atom exists.
fn active_window(conn: &impl Connection, root: Window) -> CaptureResult<Option<Window>> {
    let atom = conn.intern_atom(true, b"_NET_ACTIVE_WINDOW")?.reply()?.atom;
    if atom == x11rb::NONE {
        return Ok(None);
    }

    let prop = conn
        .get_property(false, root, atom, AtomEnum::WINDOW, 0, 1)?
        .reply()?;

    Ok(prop
        .value32()
        .and_then(|mut values| values.next())
        .filter(|w| *w != x11rb::NONE))
}

/// Climb to the top-level ancestor of `window`. A failed tree query
/// stops the climb and yields the last window reached.
fn toplevel_of(conn: &impl Connection, root: Window, window: Window) -> Window {
    let mut current = window;
    loop {
        let tree = match conn.query_tree(current) {
            Ok(cookie) => match cookie.reply() {
                Ok(tree) => tree,
                Err(_) => return current,
            },
            Err(_) => return current,
        };
        if tree.parent == root || tree.parent == x11rb::NONE {
            return current;
        }
        current = tree.parent;
    }
}
