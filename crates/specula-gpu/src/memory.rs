//! Device-local image memory for cube targets and cube arrays.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocatorDebugSettings, MemoryLocation};

use crate::error::{GpuError, Result};

/// Image allocator shared by every texture the backend owns.
///
/// Only GPU-only images are handed out; probe data never round-trips
/// through host memory.
pub struct GpuAllocator {
    inner: Option<Allocator>,
    device: Arc<ash::Device>,
    live_images: usize,
    live_bytes: u64,
}

impl GpuAllocator {
    /// Create an allocator for `device`.
    ///
    /// # Safety
    /// `instance`, `device` and `physical_device` must be valid and belong together.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let debug_settings = AllocatorDebugSettings {
            log_memory_information: cfg!(debug_assertions),
            log_leaks_on_shutdown: true,
            ..AllocatorDebugSettings::default()
        };
        let inner = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            inner: Some(inner),
            device,
            live_images: 0,
            live_bytes: 0,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.inner
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("image allocator was shut down".to_string()))
    }

    /// Create an image and bind fresh device-local memory to it.
    ///
    /// On failure nothing stays allocated.
    pub fn create_image(&mut self, create_info: &vk::ImageCreateInfo, name: &str) -> Result<GpuImage> {
        let device = Arc::clone(&self.device);
        let image = unsafe { device.create_image(create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = self.inner().and_then(|inner| {
            inner
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            unsafe { device.destroy_image(image, None) };
            if let Ok(inner) = self.inner() {
                let _ = inner.free(allocation);
            }
            return Err(e.into());
        }

        self.live_images += 1;
        self.live_bytes += requirements.size;
        tracing::trace!("Allocated image '{name}' ({} KiB)", requirements.size / 1024);

        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            size: create_info.extent.width,
            mip_levels: create_info.mip_levels,
            array_layers: create_info.array_layers,
            bytes: requirements.size,
        })
    }

    /// Destroy an image and return its memory. Freeing twice is a no-op.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        let Some(allocation) = image.allocation.take() else {
            return Ok(());
        };
        unsafe { self.device.destroy_image(image.image, None) };
        image.image = vk::Image::null();
        self.live_images = self.live_images.saturating_sub(1);
        self.live_bytes = self.live_bytes.saturating_sub(image.bytes);

        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Images currently alive.
    pub fn live_images(&self) -> usize {
        self.live_images
    }

    /// Bytes of device memory held by live images.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Drop the underlying allocator. Must happen before the device is destroyed.
    pub fn shutdown(&mut self) {
        if self.inner.take().is_some() && self.live_images > 0 {
            tracing::warn!(
                "Image allocator shut down with {} live images ({} KiB)",
                self.live_images,
                self.live_bytes / 1024
            );
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A device-local image with its memory.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    /// Edge length at mip 0.
    pub size: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Size of the backing allocation.
    pub bytes: u64,
}
