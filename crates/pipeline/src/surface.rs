//! Presentation surface manager
//!
//! Owns the swapchain, its images, the per-image command buffers, and
//! the acquire/submit/present protocol with its single frame-in-flight
//! fence. Invalidation (out-of-date or suboptimal) is recovered by a
//! full teardown/rebuild against the platform's authoritative extent.

use crate::barrier::{self, ImageState};
use crate::{PipelineError, PipelineResult, VulkanContext};
use ash::vk;
use capture_x11::Extent;
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceLifecycle {
    Uninitialized,
    Ready,
    Invalidated,
    Destroyed,
}

/// Result of asking the platform for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image acquired; `suboptimal` additionally marks the surface
    /// invalidated, to be rebuilt after this frame presents.
    Ready { index: u32, suboptimal: bool },
    /// Nothing acquired; the frame is dropped and the surface rebuilt.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented { suboptimal: bool },
    OutOfDate,
}

pub struct SurfaceManager {
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: Extent,
    images: Vec<vk::Image>,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    state: SurfaceLifecycle,
}

impl SurfaceManager {
    /// Build the swapchain and its per-image command buffers. The
    /// extent hint is advisory; the surface capabilities win.
    pub fn create(ctx: &VulkanContext, extent_hint: Extent) -> PipelineResult<Self> {
        let loader = ash::khr::swapchain::Device::new(&ctx.instance, &ctx.device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { ctx.device.create_command_pool(&pool_info, None)? };

        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight = unsafe { ctx.device.create_fence(&fence_info, None)? };

        let mut manager = Self {
            loader,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: Extent::default(),
            images: Vec::new(),
            command_pool,
            command_buffers: Vec::new(),
            image_available: create_semaphore(&ctx.device)?,
            render_finished: create_semaphore(&ctx.device)?,
            in_flight,
            state: SurfaceLifecycle::Uninitialized,
        };
        manager.build_swapchain(ctx, extent_hint)?;
        manager.state = SurfaceLifecycle::Ready;
        Ok(manager)
    }

    pub fn lifecycle(&self) -> SurfaceLifecycle {
        self.state
    }

    pub fn is_invalidated(&self) -> bool {
        self.state == SurfaceLifecycle::Invalidated
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Block until the previous frame's GPU work is confirmed done.
    /// Called at the top of every loop iteration, before the transfer
    /// buffer is touched.
    pub fn wait_frame_fence(&self, device: &ash::Device) -> PipelineResult<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX)? };
        Ok(())
    }

    /// Acquire the next presentable image, unbounded wait.
    pub fn acquire_next(&mut self) -> PipelineResult<AcquireOutcome> {
        let acquired = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, false)) => Ok(AcquireOutcome::Ready {
                index,
                suboptimal: false,
            }),
            Ok((index, true)) => {
                self.state = SurfaceLifecycle::Invalidated;
                Ok(AcquireOutcome::Ready {
                    index,
                    suboptimal: true,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SurfaceLifecycle::Invalidated;
                Ok(AcquireOutcome::OutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record this frame's commands and submit them on the graphics
    /// queue, gated on image-available and signaling render-finished
    /// plus the frame fence.
    ///
    /// `render_work` records the pipeline's own staging and dispatch;
    /// the manager then copies the upscaler output into the acquired
    /// swap image with its two layout transitions.
    pub fn record_and_submit<F>(
        &mut self,
        device: &ash::Device,
        queue: vk::Queue,
        index: u32,
        output_image: vk::Image,
        output_extent: Extent,
        render_work: F,
    ) -> PipelineResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> PipelineResult<()>,
    {
        let cmd = self.command_buffers[index as usize];
        let swap_image = self.images[index as usize];

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin)?;
        }

        render_work(cmd)?;

        // Output leaves the upscaler writable; read it out, then put
        // it back for the next dispatch.
        barrier::record(
            device,
            cmd,
            output_image,
            ImageState::General,
            ImageState::TransferSrc,
        )?;
        // The swap image's previous contents are fully overwritten, so
        // its old layout does not matter.
        barrier::record(
            device,
            cmd,
            swap_image,
            ImageState::Undefined,
            ImageState::TransferDst,
        )?;

        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let blit = vk::ImageBlit::default()
            .src_subresource(subresource)
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: output_extent.width as i32,
                    y: output_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(subresource)
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: self.extent.width as i32,
                    y: self.extent.height as i32,
                    z: 1,
                },
            ]);
        unsafe {
            device.cmd_blit_image(
                cmd,
                output_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        barrier::record(
            device,
            cmd,
            swap_image,
            ImageState::TransferDst,
            ImageState::PresentSrc,
        )?;
        barrier::record(
            device,
            cmd,
            output_image,
            ImageState::TransferSrc,
            ImageState::General,
        )?;

        unsafe { device.end_command_buffer(cmd)? };

        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [cmd];
        let signal_semaphores = [self.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            // Reset only now that a submit is certain; a fence reset
            // with no matching submit would deadlock the next wait.
            device.reset_fences(&[self.in_flight])?;
            device.queue_submit(queue, &[submit], self.in_flight)?;
        }
        Ok(())
    }

    pub fn present(&mut self, queue: vk::Queue, index: u32) -> PipelineResult<PresentOutcome> {
        let wait_semaphores = [self.render_finished];
        let swapchains = [self.swapchain];
        let indices = [index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented { suboptimal: false }),
            Ok(true) => {
                self.state = SurfaceLifecycle::Invalidated;
                Ok(PresentOutcome::Presented { suboptimal: true })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SurfaceLifecycle::Invalidated;
                Ok(PresentOutcome::OutOfDate)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Tear down and recreate the swapchain-coupled resources.
    ///
    /// Waits for all in-flight work, then re-queries the surface for
    /// its current size; the hint only matters where the platform
    /// leaves the extent to us. Safe to call repeatedly.
    pub fn rebuild(&mut self, ctx: &VulkanContext, extent_hint: Extent) -> PipelineResult<()> {
        if self.state == SurfaceLifecycle::Destroyed {
            return Ok(());
        }
        ctx.wait_idle();

        unsafe {
            if !self.command_buffers.is_empty() {
                ctx.device
                    .free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
            // Fresh semaphores: an acquire signal from a dropped frame
            // must not leak into the rebuilt chain.
            ctx.device.destroy_semaphore(self.image_available, None);
            ctx.device.destroy_semaphore(self.render_finished, None);
        }
        self.image_available = create_semaphore(&ctx.device)?;
        self.render_finished = create_semaphore(&ctx.device)?;

        self.build_swapchain(ctx, extent_hint)?;
        self.state = SurfaceLifecycle::Ready;
        info!("presentation surface rebuilt at {}", self.extent);
        Ok(())
    }

    /// Full teardown. Idempotent and tolerant of partial construction.
    pub fn destroy(&mut self, device: &ash::Device) {
        if self.state == SurfaceLifecycle::Destroyed {
            return;
        }
        self.state = SurfaceLifecycle::Destroyed;
        unsafe {
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &self.command_buffers);
                self.command_buffers.clear();
            }
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    fn build_swapchain(&mut self, ctx: &VulkanContext, extent_hint: Extent) -> PipelineResult<()> {
        let caps = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)?
        };
        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)?
        };
        let modes = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)?
        };

        let surface_format =
            choose_surface_format(&formats).ok_or(PipelineError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&modes);
        let extent = clamp_swap_extent(&caps, extent_hint);
        let image_count = swap_image_count(&caps);

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(vk::Extent2D {
                width: extent.width,
                height: extent.height,
            })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        let swapchain = unsafe { self.loader.create_swapchain(&info, None)? };
        let images = unsafe { self.loader.get_swapchain_images(swapchain)? };

        let alloc = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(images.len() as u32);
        let command_buffers = unsafe { ctx.device.allocate_command_buffers(&alloc)? };

        debug!(
            "swapchain: {} images, {:?}/{:?}, {present_mode:?}, {extent}",
            images.len(),
            surface_format.format,
            surface_format.color_space,
        );

        self.swapchain = swapchain;
        self.surface_format = surface_format;
        self.extent = extent;
        self.images = images;
        self.command_buffers = command_buffers;
        Ok(())
    }
}

fn create_semaphore(device: &ash::Device) -> PipelineResult<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo::default();
    Ok(unsafe { device.create_semaphore(&info, None)? })
}

/// Prefer 32-bit BGRA with the standard color space; a lone legacy
/// `UNDEFINED` entry means the surface takes anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(preferred),
        _ => Some(
            formats
                .iter()
                .copied()
                .find(|f| {
                    f.format == preferred.format && f.color_space == preferred.color_space
                })
                .unwrap_or(formats[0]),
        ),
    }
}

/// Lowest-latency mode available: mailbox when offered, otherwise the
/// always-present FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The platform's current extent is authoritative; the hint only
/// applies when the platform reports the "window decides" sentinel.
pub fn clamp_swap_extent(caps: &vk::SurfaceCapabilitiesKHR, hint: Extent) -> Extent {
    if caps.current_extent.width != u32::MAX {
        return Extent::new(caps.current_extent.width, caps.current_extent.height);
    }
    Extent::new(
        hint.width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        hint.height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    )
}

/// One more image than the minimum, clamped to the platform maximum
/// (zero means unbounded).
pub fn swap_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_format_wins_when_offered() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn lone_undefined_format_maps_to_preferred() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn no_formats_is_an_error_signal() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_fifo_fallback() {
        assert_eq!(
            choose_present_mode(&[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn platform_extent_is_authoritative() {
        let caps = caps(2, 8, (1920, 1080));
        assert_eq!(
            clamp_swap_extent(&caps, Extent::new(640, 480)),
            Extent::new(1920, 1080)
        );
    }

    #[test]
    fn hint_is_clamped_when_platform_defers() {
        let caps = caps(2, 8, (u32::MAX, u32::MAX));
        assert_eq!(
            clamp_swap_extent(&caps, Extent::new(10000, 5)),
            Extent::new(4096, 5)
        );
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        assert_eq!(swap_image_count(&caps(2, 3, (1, 1))), 3);
        assert_eq!(swap_image_count(&caps(2, 2, (1, 1))), 2);
        // zero max means unbounded
        assert_eq!(swap_image_count(&caps(3, 0, (1, 1))), 4);
    }
}
