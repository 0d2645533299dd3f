//! Errors raised at the GPU seam.

use ash::vk;
use thiserror::Error;

/// Failures of resource creation or command recording.
#[derive(Error, Debug)]
pub enum GpuError {
    /// A Vulkan call returned an error code.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No memory for an image.
    #[error("Image allocation failed: {0}")]
    AllocationFailed(String),

    /// SPIR-V was rejected by the driver.
    #[error("Shader module creation failed: {0}")]
    ShaderCompilation(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A handle does not name a live texture or material.
    #[error("Unknown GPU resource: {0}")]
    ResourceNotFound(String),

    /// A command was recorded against resources that cannot take it.
    #[error("Invalid command: {0}")]
    InvalidState(String),

    /// The backend lacks what the command needs (e.g. a block encoder).
    #[error("Unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
