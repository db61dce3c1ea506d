//! Accelerator resource descriptors

use ash::vk;
use capture_x11::Extent;

/// How the accelerator accesses a resource during one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAccess {
    /// Sampled input (color, motion hint, depth hint).
    Read,
    /// Storage output, left writable after the dispatch.
    Write,
}

/// Everything a backend needs to know about one image per dispatch:
/// explicit handle, view, format, extent, and access tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: Extent,
    pub access: ResourceAccess,
}

/// The one constructor every call site uses; keeps the accelerator
/// boundary narrow and checkable without a live context.
pub fn describe_image(
    image: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: Extent,
    access: ResourceAccess,
) -> ResourceDescriptor {
    ResourceDescriptor {
        image,
        view,
        format,
        extent,
        access,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_preserves_every_field() {
        let descriptor = describe_image(
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::B8G8R8A8_UNORM,
            Extent::new(1280, 720),
            ResourceAccess::Read,
        );
        assert_eq!(descriptor.image, vk::Image::null());
        assert_eq!(descriptor.view, vk::ImageView::null());
        assert_eq!(descriptor.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(descriptor.extent, Extent::new(1280, 720));
        assert_eq!(descriptor.access, ResourceAccess::Read);
    }

    #[test]
    fn read_and_write_tags_are_distinct() {
        let read = describe_image(
            vk::Image::null(),
            vk::ImageView::null(),
            vk::Format::R16G16_SFLOAT,
            Extent::new(64, 64),
            ResourceAccess::Read,
        );
        let write = ResourceDescriptor {
            access: ResourceAccess::Write,
            ..read
        };
        assert_ne!(read, write);
    }
}
