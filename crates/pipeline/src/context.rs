//! Vulkan instance, surface, and device bootstrap

use crate::{PipelineError, PipelineResult};
use ash::vk;
use log::{debug, info};
use std::ffi::c_void;

/// Instance, xcb surface, and the one graphics+present queue.
///
/// Built once per session; every bootstrap failure here is fatal for
/// the process (they can only happen at session start).
pub struct VulkanContext {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,
    pub device: ash::Device,
    pub queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanContext {
    /// Bring up Vulkan against an xcb window.
    ///
    /// `connection` is the raw xcb connection pointer of the shell's
    /// display connection; `window` the overlay window id.
    pub fn new(connection: *mut c_void, window: u32) -> PipelineResult<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_name = c"overglass";
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(app_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let instance_extensions = [
            ash::khr::surface::NAME.as_ptr(),
            ash::khr::xcb_surface::NAME.as_ptr(),
        ];
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let xcb_loader = ash::khr::xcb_surface::Instance::new(&entry, &instance);
        let surface_info = vk::XcbSurfaceCreateInfoKHR::default()
            .connection(connection.cast())
            .window(window);
        let surface = unsafe { xcb_loader.create_xcb_surface(&surface_info, None)? };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let (physical_device, queue_family_index) =
            pick_device(&instance, &surface_loader, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        info!(
            "using device {:?} (queue family {queue_family_index})",
            properties.device_name_as_c_str().unwrap_or(c"unknown")
        );

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)];
        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions);
        let device = unsafe { instance.create_device(physical_device, &device_info, None)? };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            physical_device,
            queue_family_index,
            device,
            queue,
            memory_properties,
        })
    }

    /// Memory type index matching the requirements and property flags.
    pub fn find_memory_type(
        &self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> PipelineResult<u32> {
        for index in 0..self.memory_properties.memory_type_count {
            let supported = requirements.memory_type_bits & (1 << index) != 0;
            let matches = self.memory_properties.memory_types[index as usize]
                .property_flags
                .contains(flags);
            if supported && matches {
                return Ok(index);
            }
        }
        Err(PipelineError::NoSuitableMemory {
            type_bits: requirements.memory_type_bits,
            flags,
        })
    }

    /// Block until the device is idle. Precedes every destructive
    /// rebuild and the session teardown.
    pub fn wait_idle(&self) {
        let _ = unsafe { self.device.device_wait_idle() };
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        debug!("destroying Vulkan context");
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

/// First physical device exposing a queue family that can both render
/// and present to the surface.
fn pick_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> PipelineResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    for device in devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        for (index, family) in families.iter().enumerate() {
            if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                continue;
            }
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index as u32, surface)?
            };
            if present {
                return Ok((device, index as u32));
            }
        }
    }

    Err(PipelineError::NoSuitableDevice)
}
