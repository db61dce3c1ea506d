//! Frame pipeline and session lifecycle for Overglass
//!
//! Per frame: read the source window's pixels, move them onto the GPU,
//! run them through the upscale stage, and copy the result into the
//! next presentable image. Owns every GPU resource whose lifetime is
//! coupled to the capture, render, or display extent.

pub mod barrier;
pub mod context;
pub mod frame_buffer;
pub mod image;
pub mod session;
pub mod staging;
pub mod surface;
pub mod upscale;

pub use barrier::ImageState;
pub use context::VulkanContext;
pub use frame_buffer::FrameBufferStage;
pub use session::{Session, SessionEnd};
pub use surface::SurfaceManager;
pub use upscale::{PassthroughUpscaler, UpscaleStage, UpscalerBackend};

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Vulkan loader unavailable: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Vulkan error: {0}")]
    Vk(#[from] vk::Result),

    #[error("no Vulkan device offers a graphics+present queue")]
    NoSuitableDevice,

    #[error("surface reports no pixel formats")]
    NoSurfaceFormat,

    #[error("no memory type matches bits {type_bits:#x} with {flags:?}")]
    NoSuitableMemory {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("unsupported image state transition {from:?} -> {to:?}")]
    UnsupportedTransition { from: ImageState, to: ImageState },

    #[error("capture error: {0}")]
    Capture(#[from] capture_x11::CaptureError),

    #[error("shell error: {0}")]
    Shell(#[from] overlay::OverlayError),

    #[error("upscale error: {0}")]
    Upscale(#[from] upscale::UpscaleError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
