//! Global toggle hotkey

use crate::{OverlayError, OverlayResult};
use log::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, GrabMode, Keycode, ModMask, Window};

// Keyboard modifier bits of an event state word; the upper bits carry
// pointer-button state and never participate in hotkey matching.
const MODIFIER_BITS: u16 = 0x00ff;

/// One globally grabbed key combination.
///
/// The grab is registered once per lock-modifier permutation so that
/// Caps Lock and Num Lock state never swallows the toggle.
pub struct Hotkey {
    keycode: Keycode,
    modifiers: ModMask,
}

impl Hotkey {
    /// Grab `keysym` + `modifiers` on the root window.
    pub fn grab(
        conn: &impl Connection,
        root: Window,
        keysym: u32,
        modifiers: ModMask,
    ) -> OverlayResult<Self> {
        let keycode = keycode_for(conn, keysym)?.ok_or(OverlayError::HotkeyUnavailable)?;

        for locks in lock_permutations() {
            conn.grab_key(
                false,
                root,
                modifiers | locks,
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )?
            .check()?;
        }

        debug!("grabbed hotkey keycode {keycode} modifiers {modifiers:?}");
        Ok(Self { keycode, modifiers })
    }

    /// Does a key press event match this hotkey, ignoring lock state?
    pub fn matches(&self, keycode: Keycode, state: u16) -> bool {
        keycode == self.keycode && strip_locks(state) == strip_locks(u16::from(self.modifiers))
    }

    pub fn ungrab(&self, conn: &impl Connection, root: Window) {
        let _ = conn.ungrab_key(self.keycode, root, ModMask::ANY);
        let _ = conn.flush();
    }
}

/// Every Caps/Num lock combination the grab must cover.
fn lock_permutations() -> [ModMask; 4] {
    [
        ModMask::from(0u16),
        ModMask::LOCK,
        ModMask::M2,
        ModMask::LOCK | ModMask::M2,
    ]
}

/// Drop the lock-modifier and button bits from an event state word.
fn strip_locks(state: u16) -> u16 {
    state & MODIFIER_BITS & !(u16::from(ModMask::LOCK) | u16::from(ModMask::M2))
}

/// Resolve a keysym to the first keycode producing it, via the
/// server's keyboard mapping.
pub fn keycode_for(conn: &impl Connection, keysym: u32) -> OverlayResult<Option<Keycode>> {
    let setup = conn.setup();
    let min = setup.min_keycode;
    let count = setup.max_keycode - min + 1;

    let mapping = conn.get_keyboard_mapping(min, count)?.reply()?;
    let per_keycode = mapping.keysyms_per_keycode as usize;
    if per_keycode == 0 {
        return Ok(None);
    }

    for (index, syms) in mapping.keysyms.chunks(per_keycode).enumerate() {
        if syms.contains(&keysym) {
            return Ok(Some(min + index as Keycode));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotkey() -> Hotkey {
        Hotkey {
            keycode: 76,
            modifiers: ModMask::M4,
        }
    }

    #[test]
    fn matches_ignores_lock_modifiers() {
        let hk = hotkey();
        let base = u16::from(ModMask::M4);
        assert!(hk.matches(76, base));
        assert!(hk.matches(76, base | u16::from(ModMask::LOCK)));
        assert!(hk.matches(76, base | u16::from(ModMask::M2)));
        assert!(hk.matches(76, base | u16::from(ModMask::LOCK) | u16::from(ModMask::M2)));
    }

    #[test]
    fn matches_rejects_other_keys_and_modifiers() {
        let hk = hotkey();
        assert!(!hk.matches(77, u16::from(ModMask::M4)));
        assert!(!hk.matches(76, 0));
        assert!(!hk.matches(76, u16::from(ModMask::M4) | u16::from(ModMask::CONTROL)));
    }

    #[test]
    fn strip_locks_keeps_real_modifiers() {
        let state = u16::from(ModMask::M4) | u16::from(ModMask::LOCK) | u16::from(ModMask::M2);
        assert_eq!(strip_locks(state), u16::from(ModMask::M4));
    }
}
