//! Blit-based fallback backend
//!
//! Stands in for a vendor accelerator: a linear-filter blit from the
//! render-resolution input to the display-resolution output. Spatial
//! only; the jitter and hint surfaces are accepted and ignored.

use super::{DispatchParams, UpscaleContext, UpscaleError, UpscalerBackend};
use crate::barrier::{self, ImageState};
use ash::vk;
use capture_x11::Extent;
use log::debug;

pub struct PassthroughUpscaler;

impl UpscalerBackend for PassthroughUpscaler {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn create_context(
        &self,
        _device: &ash::Device,
        render_extent: Extent,
        display_extent: Extent,
    ) -> Result<Box<dyn UpscaleContext>, UpscaleError> {
        if render_extent.is_degenerate() || display_extent.is_degenerate() {
            return Err(UpscaleError::Init(format!(
                "degenerate geometry {render_extent} -> {display_extent}"
            )));
        }
        Ok(Box::new(PassthroughContext {
            render_extent,
            display_extent,
        }))
    }
}

struct PassthroughContext {
    render_extent: Extent,
    display_extent: Extent,
}

impl UpscaleContext for PassthroughContext {
    fn dispatch(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        params: &DispatchParams<'_>,
    ) -> Result<(), UpscaleError> {
        if params.input_color.extent != self.render_extent
            || params.output.extent != self.display_extent
        {
            return Err(UpscaleError::Dispatch(format!(
                "geometry mismatch: got {} -> {}, context sized {} -> {}",
                params.input_color.extent,
                params.output.extent,
                self.render_extent,
                self.display_extent
            )));
        }

        // Blit wants transfer layouts; restore the contract states
        // (input shader-read, output general) before returning.
        let to_transfer = |image, from, to| {
            barrier::record(device, cmd, image, from, to)
                .map_err(|e| UpscaleError::Dispatch(e.to_string()))
        };
        to_transfer(
            params.input_color.image,
            ImageState::ShaderRead,
            ImageState::TransferSrc,
        )?;
        to_transfer(
            params.output.image,
            ImageState::General,
            ImageState::TransferDst,
        )?;

        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageBlit::default()
            .src_subresource(subresource)
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: self.render_extent.width as i32,
                    y: self.render_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(subresource)
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: self.display_extent.width as i32,
                    y: self.display_extent.height as i32,
                    z: 1,
                },
            ]);
        unsafe {
            device.cmd_blit_image(
                cmd,
                params.input_color.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                params.output.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }

        to_transfer(
            params.input_color.image,
            ImageState::TransferSrc,
            ImageState::ShaderRead,
        )?;
        to_transfer(
            params.output.image,
            ImageState::TransferDst,
            ImageState::General,
        )?;

        if params.reset {
            debug!("passthrough upscaler: reset acknowledged (stateless)");
        }
        Ok(())
    }

    fn destroy(&mut self, _device: &ash::Device) {}
}
