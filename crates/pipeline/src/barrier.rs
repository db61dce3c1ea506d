//! Image layout transitions
//!
//! Every pipeline barrier in the crate goes through one table keyed by
//! the (old, new) state pair. An unsupported pair is a hard error, not
//! a silent default.

use crate::{PipelineError, PipelineResult};
use ash::vk;

/// Access category an image is currently prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Freshly created, contents undefined. Initial state of every
    /// image; never transitioned back into.
    Undefined,
    TransferDst,
    TransferSrc,
    ShaderRead,
    /// Storage-writable; the state the upscaler reads and leaves its
    /// output in.
    General,
    PresentSrc,
}

impl ImageState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageState::General => vk::ImageLayout::GENERAL,
            ImageState::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

/// Access/stage mask tuple for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up the mask tuple for a transition.
pub fn transition_masks(from: ImageState, to: ImageState) -> PipelineResult<BarrierMasks> {
    use ImageState::*;

    let masks = match (from, to) {
        (Undefined, TransferDst) => BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (Undefined, General) => BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        (TransferDst, TransferSrc) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (TransferSrc, TransferDst) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (TransferDst, ShaderRead) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        (ShaderRead, TransferDst) => BarrierMasks {
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (ShaderRead, TransferSrc) => BarrierMasks {
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (TransferSrc, ShaderRead) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        (General, TransferSrc) => BarrierMasks {
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (TransferSrc, General) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        (General, TransferDst) => BarrierMasks {
            src_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (TransferDst, General) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        },
        (TransferDst, PresentSrc) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        },
        (from, to) => return Err(PipelineError::UnsupportedTransition { from, to }),
    };

    Ok(masks)
}

/// Record one full-image transition barrier on `cmd`.
pub fn record(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: ImageState,
    to: ImageState,
) -> PipelineResult<()> {
    let masks = transition_masks(from, to)?;
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(from.layout())
        .new_layout(to.layout())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range())
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// The single-mip, single-layer color range every pipeline image uses.
pub fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ImageState::*;

    #[test]
    fn first_use_has_no_source_access() {
        let masks = transition_masks(Undefined, TransferDst).unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn present_handoff_flushes_transfer_writes() {
        let masks = transition_masks(TransferDst, PresentSrc).unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn transfer_round_trip_pairs_are_symmetric() {
        let down = transition_masks(TransferDst, TransferSrc).unwrap();
        let up = transition_masks(TransferSrc, TransferDst).unwrap();
        assert_eq!(down.src_access, up.dst_access);
        assert_eq!(down.dst_access, up.src_access);
    }

    #[test]
    fn unsupported_transition_is_an_error() {
        let err = transition_masks(PresentSrc, ShaderRead).unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::UnsupportedTransition {
                from: PresentSrc,
                to: ShaderRead
            }
        ));
        assert!(transition_masks(General, PresentSrc).is_err());
        assert!(transition_masks(Undefined, PresentSrc).is_err());
    }

    #[test]
    fn every_staging_chain_transition_is_supported() {
        // capture image: write from buffer, read into render image
        assert!(transition_masks(Undefined, TransferDst).is_ok());
        assert!(transition_masks(TransferDst, TransferSrc).is_ok());
        assert!(transition_masks(TransferSrc, TransferDst).is_ok());
        // render image: written, then sampled by the upscaler
        assert!(transition_masks(TransferDst, ShaderRead).is_ok());
        assert!(transition_masks(ShaderRead, TransferDst).is_ok());
        // output image: storage write, copy out, back to storage
        assert!(transition_masks(Undefined, General).is_ok());
        assert!(transition_masks(General, TransferSrc).is_ok());
        assert!(transition_masks(TransferSrc, General).is_ok());
    }
}
