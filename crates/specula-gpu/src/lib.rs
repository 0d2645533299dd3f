//! GPU seam of the Specula probe cache.
//!
//! This crate provides:
//! - The command recording interface the cache records its bake work through
//! - The device interface used to create and release owned textures
//! - The convolution filter interface
//! - A Vulkan backend implementing the recording and device interfaces

pub mod descriptors;
pub mod device;
pub mod error;
pub mod filter;
pub mod memory;
pub mod pipeline;
pub mod recorder;
pub mod vulkan;

pub use device::{CubeArrayDesc, CubeTargetDesc, GpuDevice, MaterialKind};
pub use error::{GpuError, Result};
pub use filter::ConvolutionFilter;
pub use memory::{GpuAllocator, GpuImage};
pub use pipeline::{BlitShaders, FaceBlitPipeline, FaceBlitPushConstants};
pub use recorder::{BlockEncodeParams, CommandRecorder, FullscreenParams};
pub use vulkan::{BlockEncoder, VulkanDevice, VulkanDeviceBuilder, VulkanRecorder, VulkanTexture};
