//! Device-resident 2D images

use crate::barrier::{self, ImageState};
use crate::{PipelineResult, VulkanContext};
use ash::vk;
use capture_x11::Extent;

/// One GPU image plus its backing memory and tracked access state.
///
/// The state starts `Undefined` and is advanced by `transition`; the
/// single-threaded, one-frame-in-flight model makes host-side tracking
/// exact.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: Extent,
    memory: vk::DeviceMemory,
    state: ImageState,
}

impl GpuImage {
    pub fn new(
        ctx: &VulkanContext,
        format: vk::Format,
        extent: Extent,
        usage: vk::ImageUsageFlags,
    ) -> PipelineResult<Self> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { ctx.device.create_image(&info, None)? };

        let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };
        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(
                ctx.find_memory_type(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
            );
        let memory = unsafe { ctx.device.allocate_memory(&alloc, None)? };
        unsafe { ctx.device.bind_image_memory(image, memory, 0)? };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(barrier::color_range());
        let view = unsafe { ctx.device.create_image_view(&view_info, None)? };

        Ok(Self {
            image,
            view,
            format,
            extent,
            memory,
            state: ImageState::Undefined,
        })
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Record a barrier moving this image into `to` and update the
    /// tracked state. A no-op when already there.
    pub fn transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        to: ImageState,
    ) -> PipelineResult<()> {
        if self.state == to {
            return Ok(());
        }
        barrier::record(device, cmd, self.image, self.state, to)?;
        self.state = to;
        Ok(())
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}
