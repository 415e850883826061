use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use derivative::Derivative;
use gpu_allocator::vulkan as vma;

use crate::HeliosError;

/// Where an allocation should live
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device local only
    GpuOnly,
    /// Host visible, upload friendly. Also covers ReBAR memory which is
    /// device local and host visible at once.
    CpuToGpu,
    /// Host visible readback
    GpuToCpu,
}

impl From<MemoryLocation> for gpu_allocator::MemoryLocation {
    fn from(value: MemoryLocation) -> Self {
        match value {
            MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
            MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
            MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}

/// Maps the memory property flags a bucket folded together onto an allocation
/// location understood by the allocator.
pub fn location_for_properties(flags: vk::MemoryPropertyFlags) -> MemoryLocation {
    if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// A single memory allocation
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MemoryAllocation {
    #[derivative(Debug = "ignore")]
    inner: Option<vma::Allocation>,
}

impl MemoryAllocation {
    pub fn memory(&self) -> Result<vk::DeviceMemory> {
        let inner = self
            .inner
            .as_ref()
            .ok_or(HeliosError::UninitializedResource)?;
        Ok(unsafe { inner.memory() })
    }

    /// Offset of this allocation inside its backing [`vk::DeviceMemory`].
    /// Aliased resources bind at `offset() + bucket_local_offset`.
    pub fn offset(&self) -> Result<u64> {
        Ok(self
            .inner
            .as_ref()
            .ok_or(HeliosError::UninitializedResource)?
            .offset())
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.inner.as_ref().and_then(|inner| inner.mapped_ptr())
    }
}

/// Shared handle over the underlying gpu-allocator instance.
///
/// Cheap to clone, the same allocator is handed to every resource and the
/// memory aliaser.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ArcAllocator {
    #[derivative(Debug = "ignore")]
    inner: Arc<Mutex<vma::Allocator>>,
}

impl ArcAllocator {
    pub fn new(allocator: vma::Allocator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(allocator)),
        }
    }

    pub fn allocate(
        &self,
        name: &str,
        requirements: &vk::MemoryRequirements,
        location: MemoryLocation,
    ) -> Result<MemoryAllocation> {
        let allocation = self
            .inner
            .lock()
            .map_err(HeliosError::from)?
            .allocate(&vma::AllocationCreateDesc {
                name,
                requirements: *requirements,
                location: location.into(),
                linear: false,
                allocation_scheme: vma::AllocationScheme::GpuAllocatorManaged,
            })?;

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Allocated {} bytes for {}", requirements.size, name);

        Ok(MemoryAllocation {
            inner: Some(allocation),
        })
    }

    /// Must be safe to call from a deferred deletion closure.
    pub fn free(&self, mut allocation: MemoryAllocation) -> Result<()> {
        if let Some(inner) = allocation.inner.take() {
            self.inner
                .lock()
                .map_err(HeliosError::from)?
                .free(inner)?;
        }
        Ok(())
    }
}
