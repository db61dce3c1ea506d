//! Upscale stage adapter
//!
//! Translates the frame buffer stage's images into the accelerator's
//! resource/dispatch contract and owns the accelerator context
//! lifecycle. The accelerator itself is opaque behind two traits; the
//! in-tree backend is a plain blit.

pub mod descriptor;
pub mod lifecycle;
pub mod passthrough;

pub use descriptor::{describe_image, ResourceAccess, ResourceDescriptor};
pub use lifecycle::UpscaleLifecycle;
pub use passthrough::PassthroughUpscaler;

use ash::vk;
use capture_x11::Extent;
use log::{debug, info};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpscaleError {
    #[error("accelerator context creation failed: {0}")]
    Init(String),

    #[error("accelerator dispatch failed: {0}")]
    Dispatch(String),
}

/// Per-dispatch inputs handed to the accelerator.
///
/// Contract: `input_color`, `motion_hint` and `depth_hint` arrive
/// shader-readable; `output` arrives writable (general) and is left in
/// that state. Callers transition the output to a readable state
/// before consuming it.
pub struct DispatchParams<'a> {
    pub input_color: &'a ResourceDescriptor,
    pub motion_hint: &'a ResourceDescriptor,
    pub depth_hint: &'a ResourceDescriptor,
    pub output: &'a ResourceDescriptor,
    pub frame_delta_seconds: f32,
    pub jitter_offset: [f32; 2],
    pub reset: bool,
}

/// Opaque accelerator state: temporal history and internal buffers
/// sized to one (render, display) extent pair.
pub trait UpscaleContext {
    fn dispatch(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        params: &DispatchParams<'_>,
    ) -> Result<(), UpscaleError>;

    fn destroy(&mut self, device: &ash::Device);
}

/// The vendor library boundary: creates contexts for a geometry pair.
pub trait UpscalerBackend {
    fn name(&self) -> &'static str;

    fn create_context(
        &self,
        device: &ash::Device,
        render_extent: Extent,
        display_extent: Extent,
    ) -> Result<Box<dyn UpscaleContext>, UpscaleError>;
}

/// Adapter owning one context and its lifecycle bookkeeping.
pub struct UpscaleStage {
    backend: Box<dyn UpscalerBackend>,
    context: Option<Box<dyn UpscaleContext>>,
    lifecycle: UpscaleLifecycle,
}

impl UpscaleStage {
    /// Create the stage and its first accelerator context.
    pub fn new(
        backend: Box<dyn UpscalerBackend>,
        device: &ash::Device,
        render_extent: Extent,
        display_extent: Extent,
    ) -> Result<Self, UpscaleError> {
        let context = backend.create_context(device, render_extent, display_extent)?;
        info!(
            "upscaler '{}' ready: {render_extent} -> {display_extent}",
            backend.name()
        );
        Ok(Self {
            backend,
            context: Some(context),
            lifecycle: UpscaleLifecycle::new(render_extent, display_extent),
        })
    }

    /// Whether the context must be rebuilt for the observed geometry.
    pub fn needs_recreate(&self, render_extent: Extent, display_extent: Extent) -> bool {
        self.lifecycle.needs_recreate(render_extent, display_extent)
    }

    /// Destroy the old context and build a fresh one. The next
    /// dispatch will assert the reset flag.
    pub fn recreate(
        &mut self,
        device: &ash::Device,
        render_extent: Extent,
        display_extent: Extent,
    ) -> Result<(), UpscaleError> {
        if let Some(mut old) = self.context.take() {
            old.destroy(device);
        }
        let context = self
            .backend
            .create_context(device, render_extent, display_extent)?;
        self.context = Some(context);
        self.lifecycle.on_recreated(render_extent, display_extent);
        info!(
            "upscaler '{}' recreated (generation {}): {render_extent} -> {display_extent}",
            self.backend.name(),
            self.lifecycle.generation()
        );
        Ok(())
    }

    /// Record one dispatch. Failures are reported to the caller, who
    /// logs and presents the previous output; the reset flag stays
    /// armed until a dispatch succeeds.
    pub fn dispatch(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        input_color: &ResourceDescriptor,
        motion_hint: &ResourceDescriptor,
        depth_hint: &ResourceDescriptor,
        output: &ResourceDescriptor,
        frame_delta_seconds: f32,
    ) -> Result<(), UpscaleError> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| UpscaleError::Dispatch("no accelerator context".into()))?;

        let params = DispatchParams {
            input_color,
            motion_hint,
            depth_hint,
            output,
            frame_delta_seconds,
            jitter_offset: self.lifecycle.jitter_offset(),
            reset: self.lifecycle.reset_flag(),
        };
        if params.reset {
            debug!("upscale dispatch with reset asserted");
        }

        context.dispatch(device, cmd, &params)?;
        self.lifecycle.on_dispatched();
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.lifecycle.generation()
    }

    /// Destroy the context. Idempotent.
    pub fn destroy(&mut self, device: &ash::Device) {
        if let Some(mut context) = self.context.take() {
            context.destroy(device);
        }
    }
}
