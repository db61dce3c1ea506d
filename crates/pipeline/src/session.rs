//! Session lifecycle and frame loop
//!
//! A session binds one capture source, builds the GPU pipeline in
//! dependency order, and runs the per-frame loop until toggled off or
//! a window it depends on disappears. The shell's display connection
//! is shared state and survives every session.

use crate::frame_buffer::FrameBufferStage;
use crate::surface::{AcquireOutcome, PresentOutcome, SurfaceManager};
use crate::upscale::{UpscaleStage, UpscalerBackend};
use crate::{PipelineResult, VulkanContext};
use capture_x11::{focused_toplevel, CaptureError, CaptureSource, Extent};
use log::{debug, info, warn};
use overlay::{OverlayWindow, Shell, ShellEvent};
use std::sync::Arc;
use std::time::Instant;

/// Why a session's frame loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The hotkey was pressed again; the process stays up.
    Toggled,
    /// The captured window disappeared; back to idle.
    SourceLost,
    /// The presentation window was destroyed; the process must exit.
    OverlayDestroyed,
    /// The control window or connection went away; process exit.
    ShellClosed,
}

impl SessionEnd {
    pub fn should_exit(self) -> bool {
        matches!(self, SessionEnd::OverlayDestroyed | SessionEnd::ShellClosed)
    }
}

/// All three extents must be positive before a frame may be processed.
fn geometry_ready(capture: Extent, render: Extent, display: Extent) -> bool {
    !capture.is_degenerate() && !render.is_degenerate() && !display.is_degenerate()
}

pub struct Session<'shell> {
    shell: &'shell Shell,
    source: CaptureSource,
    overlay: OverlayWindow,
    ctx: VulkanContext,
    surface: SurfaceManager,
    frames: FrameBufferStage,
    upscaler: UpscaleStage,
    frame_index: u64,
    last_frame: Instant,
}

impl<'shell> Session<'shell> {
    /// Bind the currently focused top-level window and build every
    /// pipeline component in dependency order.
    pub fn begin(
        shell: &'shell Shell,
        backend: Box<dyn UpscalerBackend>,
    ) -> PipelineResult<Self> {
        let target = focused_toplevel(shell.connection().as_ref(), shell.root())?;
        info!("starting session capturing window {target:#x}");

        let source = CaptureSource::bind(Arc::clone(shell.connection()), target)?;
        let overlay = OverlayWindow::create(shell, target)?;

        let ctx = VulkanContext::new(shell.raw_connection(), overlay.window())?;
        let surface = SurfaceManager::create(&ctx, overlay.extent())?;
        let frames = FrameBufferStage::new(&ctx, source.extent(), surface.extent())?;
        let upscaler = UpscaleStage::new(
            backend,
            &ctx.device,
            frames.render_extent(),
            surface.extent(),
        )?;

        Ok(Self {
            shell,
            source,
            overlay,
            ctx,
            surface,
            frames,
            upscaler,
            frame_index: 0,
            last_frame: Instant::now(),
        })
    }

    /// Run the frame loop until something ends the session.
    pub fn run(&mut self) -> PipelineResult<SessionEnd> {
        loop {
            if let Some(end) = self.frame()? {
                return Ok(end);
            }
        }
    }

    /// One loop iteration. `None` means the frame was processed or
    /// deliberately skipped; `Some` ends the session.
    fn frame(&mut self) -> PipelineResult<Option<SessionEnd>> {
        while let Some(event) = self.shell.poll_event()? {
            match event {
                ShellEvent::Toggle => {
                    info!("hotkey toggle after {} frames", self.frame_index);
                    return Ok(Some(SessionEnd::Toggled));
                }
                ShellEvent::Destroyed { window } if window == self.overlay.window() => {
                    return Ok(Some(SessionEnd::OverlayDestroyed));
                }
                ShellEvent::Destroyed { window } if window == self.shell.control_window() => {
                    return Ok(Some(SessionEnd::ShellClosed));
                }
                ShellEvent::Configured { window, extent } if window == self.overlay.window() => {
                    debug!("overlay configured to {extent}");
                    self.overlay.note_configured(extent);
                    self.rebuild_presentation(extent)?;
                }
                _ => {}
            }
        }

        // Source resizes are detected by polling the live geometry.
        let live = match self.source.current_extent() {
            Ok(extent) => extent,
            Err(CaptureError::WindowGone) => {
                info!("capture source window gone");
                return Ok(Some(SessionEnd::SourceLost));
            }
            Err(err) => {
                warn!("capture geometry query failed: {err}; skipping frame");
                return Ok(None);
            }
        };
        if live != self.frames.capture_extent() {
            if live.is_degenerate() {
                return Ok(None);
            }
            self.source.rebind(live)?;
            self.frames.rebuild_capture(&self.ctx, live)?;
            let render = self.frames.render_extent();
            let display = self.surface.extent();
            if self.upscaler.needs_recreate(render, display) {
                self.upscaler.recreate(&self.ctx.device, render, display)?;
            }
        }

        if !geometry_ready(
            self.frames.capture_extent(),
            self.frames.render_extent(),
            self.surface.extent(),
        ) {
            return Ok(None);
        }

        let snapshot = match self.source.read_snapshot() {
            Ok(snapshot) => snapshot,
            Err(CaptureError::WindowGone) => return Ok(Some(SessionEnd::SourceLost)),
            Err(err) => {
                warn!("capture failed: {err}; skipping frame");
                return Ok(None);
            }
        };

        // One frame in flight: the previous frame's GPU work must be
        // done before the transfer buffer is touched.
        self.surface.wait_frame_fence(&self.ctx.device)?;
        self.frames.ingest(&snapshot);

        let index = match self.surface.acquire_next()? {
            AcquireOutcome::Ready { index, suboptimal } => {
                if suboptimal {
                    debug!("suboptimal acquire; rebuilding after present");
                }
                index
            }
            AcquireOutcome::OutOfDate => {
                self.rebuild_presentation(self.overlay.extent())?;
                return Ok(None);
            }
        };

        let delta = self.frame_delta();
        let Some((output_image, output_extent)) = self.frames.output_handle() else {
            return Ok(None);
        };

        let device = &self.ctx.device;
        let frames = &mut self.frames;
        let upscaler = &mut self.upscaler;
        self.surface.record_and_submit(
            device,
            self.ctx.queue,
            index,
            output_image,
            output_extent,
            |cmd| {
                frames.stage(device, cmd)?;
                if let Some(images) = frames.dispatch_images() {
                    if let Err(err) = upscaler.dispatch(
                        device,
                        cmd,
                        &images.input_color,
                        &images.motion_hint,
                        &images.depth_hint,
                        &images.output,
                        delta,
                    ) {
                        warn!("upscale dispatch failed: {err}; presenting previous output");
                    }
                }
                Ok(())
            },
        )?;

        match self.surface.present(self.ctx.queue, index)? {
            PresentOutcome::Presented { suboptimal } => {
                if suboptimal {
                    debug!("suboptimal present");
                }
            }
            PresentOutcome::OutOfDate => debug!("out-of-date present"),
        }
        if self.surface.is_invalidated() {
            self.rebuild_presentation(self.overlay.extent())?;
        }

        self.frame_index += 1;
        Ok(None)
    }

    /// Rebuild everything coupled to the display extent: swapchain,
    /// output image, and the accelerator context (whose buffers are
    /// sized to it). The next dispatch asserts the reset flag.
    fn rebuild_presentation(&mut self, hint: Extent) -> PipelineResult<()> {
        let hint = self.overlay.current_extent().unwrap_or(hint);
        self.surface.rebuild(&self.ctx, hint)?;
        let display = self.surface.extent();
        self.frames.rebuild_output(&self.ctx, display)?;
        self.upscaler
            .recreate(&self.ctx.device, self.frames.render_extent(), display)?;
        Ok(())
    }

    fn frame_delta(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        delta.clamp(0.0001, 0.25)
    }

    /// Tear down session-owned resources in reverse dependency order.
    /// The shell's connection and control window are left alone.
    pub fn end(mut self) {
        info!("session ended after {} frames", self.frame_index);
        self.ctx.wait_idle();
        self.upscaler.destroy(&self.ctx.device);
        self.frames.destroy(&self.ctx.device);
        self.surface.destroy(&self.ctx.device);
        self.source.release();
        self.overlay.destroy();
        // VulkanContext drops last: device, surface, instance.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_presentation_loss_exits_the_process() {
        assert!(!SessionEnd::Toggled.should_exit());
        assert!(!SessionEnd::SourceLost.should_exit());
        assert!(SessionEnd::OverlayDestroyed.should_exit());
        assert!(SessionEnd::ShellClosed.should_exit());
    }

    #[test]
    fn frames_are_skipped_while_any_extent_is_degenerate() {
        let good = Extent::new(800, 600);
        let zero = Extent::new(0, 0);
        assert!(geometry_ready(good, good, good));
        assert!(!geometry_ready(zero, good, good));
        assert!(!geometry_ready(good, zero, good));
        assert!(!geometry_ready(good, good, zero));
    }
}
