//! Overglass - live window upscaling overlay for X11

use anyhow::Context;
use log::info;
use overlay::{Shell, ShellEvent};
use pipeline::{PassthroughUpscaler, Session};
use x11rb::protocol::xproto::ModMask;

// XK_F10, toggled with Super held.
const TOGGLE_KEYSYM: u32 = 0xffc7;
const TOGGLE_MODIFIERS: ModMask = ModMask::M4;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let shell =
        Shell::connect(TOGGLE_KEYSYM, TOGGLE_MODIFIERS).context("window-system setup failed")?;
    info!("idle; press Super+F10 to mirror the focused window");

    loop {
        match shell.wait_event()? {
            ShellEvent::Toggle => {
                if run_session(&shell)? {
                    break;
                }
                info!("idle; press Super+F10 to start a new session");
            }
            ShellEvent::Destroyed { window } if window == shell.control_window() => {
                info!("control window closed; exiting");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Run one session to completion. Returns true when the whole process
/// should exit.
fn run_session(shell: &Shell) -> anyhow::Result<bool> {
    let mut session = Session::begin(shell, Box::new(PassthroughUpscaler))
        .context("session bootstrap failed")?;

    let result = session.run();
    session.end();

    match result {
        Ok(reason) => {
            info!("session ended: {reason:?}");
            Ok(reason.should_exit())
        }
        Err(err) => Err(err).context("frame loop failed"),
    }
}
