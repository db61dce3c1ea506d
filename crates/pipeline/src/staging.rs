//! Host-visible transfer buffer

use crate::{PipelineResult, VulkanContext};
use ash::vk;
use capture_x11::{Extent, Snapshot};

/// CPU-visible staging buffer receiving one capture per frame.
///
/// Sized and strided by the capture extent; the capture extent is the
/// single authority for all destination math here, never the
/// snapshot's own stride.
pub struct TransferBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    extent: Extent,
    size: usize,
}

impl TransferBuffer {
    pub fn new(ctx: &VulkanContext, extent: Extent) -> PipelineResult<Self> {
        let size = extent.byte_size();

        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.create_buffer(&info, None)? };

        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };
        let alloc = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.find_memory_type(
                requirements,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?);
        let memory = unsafe { ctx.device.allocate_memory(&alloc, None)? };
        unsafe { ctx.device.bind_buffer_memory(buffer, memory, 0)? };

        let mapped = unsafe {
            ctx.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
        } as *mut u8;

        Ok(Self {
            buffer,
            memory,
            mapped,
            extent,
            size: size as usize,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Copy one snapshot into the mapped buffer.
    ///
    /// Only valid while no GPU read of the buffer is in flight; the
    /// frame loop guarantees that with its fence wait.
    pub fn write(&mut self, snapshot: &Snapshot) {
        let dst = unsafe { std::slice::from_raw_parts_mut(self.mapped, self.size) };
        copy_snapshot_rows(dst, self.extent, snapshot);
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.unmap_memory(self.memory);
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Copy snapshot pixels into a tightly packed buffer of `dst_extent`.
///
/// Writes exactly `min(dst, snapshot)` rows and columns of real pixel
/// data; when the snapshot does not cover the whole destination, the
/// entire buffer is zeroed first so no stale bytes survive a shrink.
pub fn copy_snapshot_rows(dst: &mut [u8], dst_extent: Extent, snapshot: &Snapshot) {
    let dst_stride = dst_extent.width as usize * 4;
    let rows = dst_extent.height.min(snapshot.height) as usize;
    let row_bytes = dst_extent.width.min(snapshot.width) as usize * 4;

    if snapshot.width < dst_extent.width || snapshot.height < dst_extent.height {
        dst.fill(0);
    }

    for y in 0..rows {
        let src_start = y * snapshot.stride;
        let dst_start = y * dst_stride;
        dst[dst_start..dst_start + row_bytes]
            .copy_from_slice(&snapshot.data[src_start..src_start + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(width: u32, height: u32, stride: usize, fill: u8) -> Snapshot {
        Snapshot {
            data: vec![fill; stride * height as usize],
            width,
            height,
            stride,
        }
    }

    fn buffer(extent: Extent, fill: u8) -> Vec<u8> {
        vec![fill; extent.byte_size() as usize]
    }

    #[test]
    fn equal_extents_copy_every_byte() {
        let extent = Extent::new(4, 3);
        let snap = snapshot(4, 3, 16, 0xab);
        let mut dst = buffer(extent, 0);
        copy_snapshot_rows(&mut dst, extent, &snap);
        assert!(dst.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn smaller_snapshot_zero_fills_the_remainder() {
        let extent = Extent::new(4, 4);
        let snap = snapshot(2, 2, 8, 0xff);
        let mut dst = buffer(extent, 0xcc); // stale bytes from a prior frame
        copy_snapshot_rows(&mut dst, extent, &snap);

        for y in 0..4usize {
            for x in 0..4usize {
                let offset = (y * 4 + x) * 4;
                let expected = if x < 2 && y < 2 { 0xff } else { 0x00 };
                assert_eq!(&dst[offset..offset + 4], &[expected; 4], "pixel {x},{y}");
            }
        }
    }

    #[test]
    fn larger_snapshot_is_clamped_to_the_buffer() {
        let extent = Extent::new(2, 2);
        let snap = snapshot(5, 7, 20, 0x11);
        let mut dst = buffer(extent, 0);
        copy_snapshot_rows(&mut dst, extent, &snap);
        assert!(dst.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn padded_snapshot_rows_never_leak_into_the_buffer() {
        let extent = Extent::new(2, 2);
        // rows are 8 real bytes + 8 bytes padding
        let mut snap = snapshot(2, 2, 16, 0x22);
        for y in 0..2 {
            for pad in 8..16 {
                snap.data[y * 16 + pad] = 0xee;
            }
        }
        let mut dst = buffer(extent, 0);
        copy_snapshot_rows(&mut dst, extent, &snap);
        assert!(dst.iter().all(|&b| b == 0x22));
    }

    #[test]
    fn mixed_shrink_one_axis_only() {
        // snapshot narrower but taller than the buffer
        let extent = Extent::new(4, 2);
        let snap = snapshot(2, 5, 8, 0x33);
        let mut dst = buffer(extent, 0xcc);
        copy_snapshot_rows(&mut dst, extent, &snap);
        for y in 0..2usize {
            for x in 0..4usize {
                let offset = (y * 4 + x) * 4;
                let expected = if x < 2 { 0x33 } else { 0x00 };
                assert_eq!(&dst[offset..offset + 4], &[expected; 4], "pixel {x},{y}");
            }
        }
    }
}
