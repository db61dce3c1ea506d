//! Frame buffer stage
//!
//! Owns the CPU-visible transfer buffer and the GPU image chain behind
//! it: capture-resolution color, render-resolution color, the two
//! render-resolution hint surfaces the accelerator contract requires,
//! and the display-resolution output.

use crate::image::GpuImage;
use crate::staging::TransferBuffer;
use crate::upscale::{describe_image, ResourceAccess, ResourceDescriptor};
use crate::ImageState;
use crate::{PipelineResult, VulkanContext};
use ash::vk;
use capture_x11::{Extent, Snapshot};
use log::info;

pub const COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;
pub const MOTION_FORMAT: vk::Format = vk::Format::R16G16_SFLOAT;
pub const DEPTH_HINT_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

/// Render-extent policy: lossless, the upscaler input is the capture
/// itself. The model allows a smaller render extent; this is the one
/// place to change the policy.
pub fn render_extent_for(capture_extent: Extent) -> Extent {
    capture_extent
}

/// How the capture image reaches the render image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescaleOp {
    /// Equal extents: byte-identical image copy.
    Copy,
    /// Differing extents: nearest-neighbor blit.
    Blit,
}

pub fn plan_rescale(capture_extent: Extent, render_extent: Extent) -> RescaleOp {
    if capture_extent == render_extent {
        RescaleOp::Copy
    } else {
        RescaleOp::Blit
    }
}

/// Descriptors for one upscale dispatch, all built by `describe_image`.
#[derive(Debug, Clone, Copy)]
pub struct DispatchImages {
    pub input_color: ResourceDescriptor,
    pub motion_hint: ResourceDescriptor,
    pub depth_hint: ResourceDescriptor,
    pub output: ResourceDescriptor,
}

pub struct FrameBufferStage {
    transfer: Option<TransferBuffer>,
    capture_image: Option<GpuImage>,
    render_image: Option<GpuImage>,
    motion_image: Option<GpuImage>,
    depth_image: Option<GpuImage>,
    output_image: Option<GpuImage>,
    capture_extent: Extent,
    render_extent: Extent,
    display_extent: Extent,
    aux_initialized: bool,
    output_initialized: bool,
}

impl FrameBufferStage {
    pub fn new(
        ctx: &VulkanContext,
        capture_extent: Extent,
        display_extent: Extent,
    ) -> PipelineResult<Self> {
        let render_extent = render_extent_for(capture_extent);
        let mut stage = Self {
            transfer: None,
            capture_image: None,
            render_image: None,
            motion_image: None,
            depth_image: None,
            output_image: None,
            capture_extent,
            render_extent,
            display_extent,
            aux_initialized: false,
            output_initialized: false,
        };
        stage.create_capture_chain(ctx)?;
        stage.create_output(ctx)?;
        Ok(stage)
    }

    pub fn capture_extent(&self) -> Extent {
        self.capture_extent
    }

    pub fn render_extent(&self) -> Extent {
        self.render_extent
    }

    pub fn display_extent(&self) -> Extent {
        self.display_extent
    }

    /// The accelerator output image handle and size, for the
    /// presentation copy.
    pub fn output_handle(&self) -> Option<(vk::Image, Extent)> {
        self.output_image
            .as_ref()
            .map(|image| (image.image, image.extent))
    }

    /// Copy one snapshot into the transfer buffer, clamped and
    /// zero-filled against the capture extent.
    pub fn ingest(&mut self, snapshot: &Snapshot) {
        if let Some(transfer) = self.transfer.as_mut() {
            transfer.write(snapshot);
        }
    }

    /// Record this frame's staging work: transfer buffer into the
    /// capture image, capture image into the render image, plus the
    /// one-time clears for freshly created images.
    pub fn stage(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) -> PipelineResult<()> {
        self.initialize_fresh_images(device, cmd)?;

        let (Some(transfer), Some(capture), Some(render)) = (
            self.transfer.as_ref(),
            self.capture_image.as_mut(),
            self.render_image.as_mut(),
        ) else {
            return Ok(());
        };

        capture.transition(device, cmd, ImageState::TransferDst)?;
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(color_layers())
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: self.capture_extent.width,
                height: self.capture_extent.height,
                depth: 1,
            });
        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                transfer.buffer(),
                capture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        capture.transition(device, cmd, ImageState::TransferSrc)?;
        render.transition(device, cmd, ImageState::TransferDst)?;

        match plan_rescale(self.capture_extent, self.render_extent) {
            RescaleOp::Copy => {
                let copy = vk::ImageCopy::default()
                    .src_subresource(color_layers())
                    .dst_subresource(color_layers())
                    .extent(vk::Extent3D {
                        width: self.capture_extent.width,
                        height: self.capture_extent.height,
                        depth: 1,
                    });
                unsafe {
                    device.cmd_copy_image(
                        cmd,
                        capture.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        render.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    );
                }
            }
            RescaleOp::Blit => {
                let blit = vk::ImageBlit::default()
                    .src_subresource(color_layers())
                    .src_offsets(extent_offsets(self.capture_extent))
                    .dst_subresource(color_layers())
                    .dst_offsets(extent_offsets(self.render_extent));
                unsafe {
                    device.cmd_blit_image(
                        cmd,
                        capture.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        render.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::NEAREST,
                    );
                }
            }
        }

        render.transition(device, cmd, ImageState::ShaderRead)?;
        Ok(())
    }

    /// Descriptors for the upscale dispatch, in their contract states.
    pub fn dispatch_images(&self) -> Option<DispatchImages> {
        let render = self.render_image.as_ref()?;
        let motion = self.motion_image.as_ref()?;
        let depth = self.depth_image.as_ref()?;
        let output = self.output_image.as_ref()?;
        Some(DispatchImages {
            input_color: describe_image(
                render.image,
                render.view,
                render.format,
                render.extent,
                ResourceAccess::Read,
            ),
            motion_hint: describe_image(
                motion.image,
                motion.view,
                motion.format,
                motion.extent,
                ResourceAccess::Read,
            ),
            depth_hint: describe_image(
                depth.image,
                depth.view,
                depth.format,
                depth.extent,
                ResourceAccess::Read,
            ),
            output: describe_image(
                output.image,
                output.view,
                output.format,
                output.extent,
                ResourceAccess::Write,
            ),
        })
    }

    /// Recreate the capture-coupled resources for a resized source.
    /// The presentation surface and the output image are not touched.
    pub fn rebuild_capture(
        &mut self,
        ctx: &VulkanContext,
        capture_extent: Extent,
    ) -> PipelineResult<()> {
        ctx.wait_idle();
        self.destroy_capture_chain(&ctx.device);
        info!(
            "frame buffers rebuilt for capture {} -> {capture_extent}",
            self.capture_extent
        );
        self.capture_extent = capture_extent;
        self.render_extent = render_extent_for(capture_extent);
        self.create_capture_chain(ctx)
    }

    /// Recreate the display-coupled output image after a surface
    /// rebuild.
    pub fn rebuild_output(
        &mut self,
        ctx: &VulkanContext,
        display_extent: Extent,
    ) -> PipelineResult<()> {
        ctx.wait_idle();
        if let Some(output) = self.output_image.take() {
            output.destroy(&ctx.device);
        }
        self.display_extent = display_extent;
        self.create_output(ctx)
    }

    /// Destroy everything. Idempotent and tolerant of partial state.
    pub fn destroy(&mut self, device: &ash::Device) {
        self.destroy_capture_chain(device);
        if let Some(output) = self.output_image.take() {
            output.destroy(device);
        }
    }

    fn create_capture_chain(&mut self, ctx: &VulkanContext) -> PipelineResult<()> {
        self.transfer = Some(TransferBuffer::new(ctx, self.capture_extent)?);
        self.capture_image = Some(GpuImage::new(
            ctx,
            COLOR_FORMAT,
            self.capture_extent,
            vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED,
        )?);
        self.render_image = Some(GpuImage::new(
            ctx,
            COLOR_FORMAT,
            self.render_extent,
            vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::STORAGE,
        )?);
        self.motion_image = Some(GpuImage::new(
            ctx,
            MOTION_FORMAT,
            self.render_extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?);
        self.depth_image = Some(GpuImage::new(
            ctx,
            DEPTH_HINT_FORMAT,
            self.render_extent,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?);
        self.aux_initialized = false;
        Ok(())
    }

    fn create_output(&mut self, ctx: &VulkanContext) -> PipelineResult<()> {
        self.output_image = Some(GpuImage::new(
            ctx,
            COLOR_FORMAT,
            self.display_extent,
            vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED,
        )?);
        self.output_initialized = false;
        Ok(())
    }

    fn destroy_capture_chain(&mut self, device: &ash::Device) {
        if let Some(transfer) = self.transfer.take() {
            transfer.destroy(device);
        }
        for image in [
            self.capture_image.take(),
            self.render_image.take(),
            self.motion_image.take(),
            self.depth_image.take(),
        ]
        .into_iter()
        .flatten()
        {
            image.destroy(device);
        }
    }

    /// Clear freshly created hint/output images once. The motion hint
    /// is all-zero (no motion), the synthetic depth a constant 1.0,
    /// the output black so the dispatch-failure fallback is defined
    /// from the first frame on.
    fn initialize_fresh_images(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
    ) -> PipelineResult<()> {
        if !self.aux_initialized {
            if let Some(motion) = self.motion_image.as_mut() {
                clear_image(device, cmd, motion, [0.0, 0.0, 0.0, 0.0])?;
                motion.transition(device, cmd, ImageState::ShaderRead)?;
            }
            if let Some(depth) = self.depth_image.as_mut() {
                clear_image(device, cmd, depth, [1.0, 0.0, 0.0, 0.0])?;
                depth.transition(device, cmd, ImageState::ShaderRead)?;
            }
            self.aux_initialized = true;
        }
        if !self.output_initialized {
            if let Some(output) = self.output_image.as_mut() {
                clear_image(device, cmd, output, [0.0, 0.0, 0.0, 1.0])?;
                output.transition(device, cmd, ImageState::General)?;
            }
            self.output_initialized = true;
        }
        Ok(())
    }
}

fn clear_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: &mut GpuImage,
    color: [f32; 4],
) -> PipelineResult<()> {
    image.transition(device, cmd, ImageState::TransferDst)?;
    let value = vk::ClearColorValue { float32: color };
    unsafe {
        device.cmd_clear_color_image(
            cmd,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &value,
            &[crate::barrier::color_range()],
        );
    }
    Ok(())
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}

fn extent_offsets(extent: Extent) -> [vk::Offset3D; 2] {
    [
        vk::Offset3D::default(),
        vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_policy_keeps_the_capture_extent() {
        let capture = Extent::new(800, 600);
        assert_eq!(render_extent_for(capture), capture);
    }

    #[test]
    fn equal_extents_plan_a_byte_identical_copy() {
        let e = Extent::new(800, 600);
        assert_eq!(plan_rescale(e, e), RescaleOp::Copy);
    }

    #[test]
    fn differing_extents_plan_a_blit() {
        assert_eq!(
            plan_rescale(Extent::new(800, 600), Extent::new(640, 480)),
            RescaleOp::Blit
        );
        assert_eq!(
            plan_rescale(Extent::new(640, 480), Extent::new(800, 600)),
            RescaleOp::Blit
        );
    }
}
