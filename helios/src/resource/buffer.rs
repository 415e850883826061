use std::ffi::c_void;
use std::ptr;

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::allocators::{ArcAllocator, MemoryAllocation, MemoryLocation};
use crate::resource::{ExtraBufferFlags, ResourceCreateFlags};
use crate::traits::Destructible;
use crate::HeliosError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescription {
    pub capacity: vk::DeviceSize,
    pub element_size: vk::DeviceSize,
    pub usage_flags: vk::BufferUsageFlags,
    pub extra_flags: ExtraBufferFlags,
    pub create_flags: ResourceCreateFlags,
}

impl BufferDescription {
    pub fn new(
        capacity: vk::DeviceSize,
        element_size: vk::DeviceSize,
        usage_flags: vk::BufferUsageFlags,
        extra_flags: ExtraBufferFlags,
        create_flags: ResourceCreateFlags,
    ) -> Self {
        let mut usage_flags = usage_flags;
        if extra_flags.contains(ExtraBufferFlags::ADDRESSABLE) {
            usage_flags |=
                vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | vk::BufferUsageFlags::TRANSFER_DST;
        }
        if extra_flags.contains(ExtraBufferFlags::HOST) {
            usage_flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        Self {
            capacity,
            element_size,
            usage_flags,
            extra_flags,
            create_flags,
        }
    }

    /// Pool reuse equivalence. Capacity and element size are ignored since a
    /// pooled buffer can be resized in place.
    pub fn reuse_compatible(&self, other: &Self) -> bool {
        self.usage_flags == other.usage_flags
            && self.extra_flags == other.extra_flags
            && self.create_flags == other.create_flags
    }

    pub fn element_count(&self) -> u64 {
        debug_assert!(self.element_size > 0, "division by zero");
        self.capacity / self.element_size
    }

    pub fn memory_location(&self) -> MemoryLocation {
        if self.extra_flags.contains(ExtraBufferFlags::HOST) {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        }
    }
}

/// A buffer plus its device address and mapped pointer.
///
/// Graph-memory-controlled buffers are created raw; the aliaser binds them
/// into a bucket and calls [`Buffer::rg_finalize`] with the bucket allocation
/// and the chosen offset.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Buffer {
    device: crate::device::LogicalDevice,
    #[derivative(Debug = "ignore")]
    allocator: ArcAllocator,
    description: BufferDescription,
    handle: Option<vk::Buffer>,
    #[derivative(Debug = "ignore")]
    allocation: Option<MemoryAllocation>,
    address: Option<vk::DeviceAddress>,
    #[derivative(Debug = "ignore")]
    mapped: Option<*mut c_void>,
    name: Option<String>,
}

// The mapped pointer is only dereferenced through &self writes guarded by the
// graph's single-threaded execute phase.
unsafe impl Send for Buffer {}

impl Buffer {
    pub fn new(
        device: crate::device::LogicalDevice,
        allocator: ArcAllocator,
        description: BufferDescription,
        name: Option<String>,
    ) -> Result<Self> {
        debug_assert!(
            !description.extra_flags.is_empty(),
            "buffer needs a memory class"
        );
        let mut buffer = Self {
            device,
            allocator,
            description,
            handle: None,
            allocation: None,
            address: None,
            mapped: None,
            name,
        };
        buffer.invalidate()?;
        Ok(buffer)
    }

    /// Recreates the underlying [`VkBuffer`](vk::Buffer), pushing the old
    /// handle through deferred deletion.
    pub fn invalidate(&mut self) -> Result<()> {
        self.destroy_handle()?;

        let buffer_ci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::BufferCreateFlags::empty(),
            size: self.description.capacity,
            usage: self.description.usage_flags,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: ptr::null(),
            _marker: Default::default(),
        };
        let handle = unsafe { self.device.get_handle().create_buffer(&buffer_ci, None)? };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkBuffer {:p}", handle);

        self.handle = Some(handle);
        self.apply_debug_name();

        if self.description.create_flags.graph_bound() {
            return Ok(());
        }

        let requirements = unsafe {
            self.device
                .get_handle()
                .get_buffer_memory_requirements(handle)
        };
        let allocation = self.allocator.allocate(
            self.name.as_deref().unwrap_or("buffer"),
            &requirements,
            self.description.memory_location(),
        )?;
        unsafe {
            self.device.get_handle().bind_buffer_memory(
                handle,
                allocation.memory()?,
                allocation.offset()?,
            )?
        };

        if self
            .description
            .extra_flags
            .contains(ExtraBufferFlags::ADDRESSABLE)
        {
            self.address = Some(unsafe {
                self.device
                    .get_handle()
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo {
                        s_type: vk::StructureType::BUFFER_DEVICE_ADDRESS_INFO,
                        p_next: ptr::null(),
                        buffer: handle,
                        _marker: Default::default(),
                    })
            });
        }
        if self.description.extra_flags.contains(ExtraBufferFlags::HOST) {
            self.mapped = allocation.mapped_ptr().map(|ptr| ptr.as_ptr());
        }
        self.allocation = Some(allocation);
        Ok(())
    }

    /// Post-bind finalizer invoked by the memory aliaser. `bucket_offset` is
    /// the byte offset this buffer was bound at inside `allocation`.
    pub fn rg_finalize(
        &mut self,
        allocation: &MemoryAllocation,
        bucket_offset: u64,
    ) -> Result<()> {
        let handle = self.handle()?;
        if self
            .description
            .extra_flags
            .contains(ExtraBufferFlags::ADDRESSABLE)
        {
            self.address = Some(unsafe {
                self.device
                    .get_handle()
                    .get_buffer_device_address(&vk::BufferDeviceAddressInfo {
                        s_type: vk::StructureType::BUFFER_DEVICE_ADDRESS_INFO,
                        p_next: ptr::null(),
                        buffer: handle,
                        _marker: Default::default(),
                    })
            });
        }
        if self.description.extra_flags.contains(ExtraBufferFlags::HOST) {
            self.mapped = allocation
                .mapped_ptr()
                .map(|ptr| unsafe { ptr.as_ptr().add(bucket_offset as usize) });
        }
        Ok(())
    }

    /// Recreates the buffer when capacity or element size changed. Returns
    /// whether an invalidation happened so the pool can mark for rebind.
    pub fn resize(
        &mut self,
        new_capacity: vk::DeviceSize,
        new_element_size: vk::DeviceSize,
    ) -> Result<bool> {
        if new_capacity == self.description.capacity
            && new_element_size == self.description.element_size
        {
            return Ok(false);
        }
        self.description.capacity = new_capacity;
        self.description.element_size = new_element_size;
        self.invalidate()?;
        Ok(true)
    }

    pub fn handle(&self) -> Result<vk::Buffer> {
        self.handle
            .ok_or_else(|| anyhow::Error::from(HeliosError::UninitializedResource))
    }

    pub fn get_description(&self) -> &BufferDescription {
        &self.description
    }

    /// If the buffer is addressable, its [`VkDeviceAddress`](vk::DeviceAddress)
    pub fn address(&self) -> Result<vk::DeviceAddress> {
        self.address
            .ok_or_else(|| anyhow::Error::from(HeliosError::NoShaderDeviceAddress))
    }

    /// Write to the mapped pointer if one exists
    ///
    /// Offset is in bytes
    pub fn write<T: Copy>(&self, offset_bytes: vk::DeviceSize, data: &[T]) -> Result<()> {
        if offset_bytes + std::mem::size_of_val(data) as vk::DeviceSize > self.description.capacity
        {
            return Err(anyhow::Error::from(HeliosError::InsufficientSpace));
        }
        let mapped = self.mapped.ok_or(HeliosError::NoMappedPointer)?;
        // SAFETY: bounds checked above, mapped memory outlives self
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr() as *const c_void,
                mapped.add(offset_bytes as usize),
                std::mem::size_of_val(data),
            );
        }
        Ok(())
    }

    pub fn memory_requirements(&self) -> Result<vk::MemoryRequirements> {
        let handle = self.handle()?;
        Ok(unsafe {
            self.device
                .get_handle()
                .get_buffer_memory_requirements(handle)
        })
    }

    /// Binds the buffer into bucket memory at the aliaser-chosen offset
    pub fn bind_memory(&self, memory: vk::DeviceMemory, offset: u64) -> Result<()> {
        let handle = self.handle()?;
        unsafe {
            self.device
                .get_handle()
                .bind_buffer_memory(handle, memory, offset)?
        };
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
        self.apply_debug_name();
    }

    fn apply_debug_name(&self) {
        let (Some(debug_utils), Some(handle), Some(name)) = (
            self.device.get_debug_utils(),
            self.handle,
            self.name.as_deref(),
        ) else {
            return;
        };
        if let Ok(name) = std::ffi::CString::new(name) {
            let info = vk::DebugUtilsObjectNameInfoEXT::default()
                .object_handle(handle)
                .object_name(&name);
            unsafe {
                debug_utils.set_debug_utils_object_name(&info).ok();
            }
        }
    }

    fn destroy_handle(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.mapped = None;
        self.address = None;
        let allocation = self.allocation.take();
        let device = self.device.clone();
        let allocator = self.allocator.clone();
        self.device.defer_deletion(move || {
            #[cfg(feature = "log-lifetimes")]
            tracing::trace!("Destroying VkBuffer {:p}", handle);

            unsafe { device.get_handle().destroy_buffer(handle, None) };
            if let Some(allocation) = allocation {
                allocator.free(allocation).ok();
            }
        })
    }
}

impl Destructible for Buffer {
    fn destroy(&mut self) {
        self.destroy_handle().ok();
    }
}

#[cfg(feature = "raii")]
impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addressable_widens_usage() {
        let description = BufferDescription::new(
            1024,
            4,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            ExtraBufferFlags::DEVICE_LOCAL,
            ResourceCreateFlags::empty(),
        );
        assert!(description
            .usage_flags
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert_eq!(description.element_count(), 256);
    }

    #[test]
    fn reuse_ignores_capacity() {
        let a = BufferDescription::new(
            1024,
            4,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            ExtraBufferFlags::HOST,
            ResourceCreateFlags::empty(),
        );
        let mut b = a;
        b.capacity = 4096;
        b.element_size = 16;
        assert!(a.reuse_compatible(&b));

        b.extra_flags = ExtraBufferFlags::RESIZABLE_BAR;
        assert!(!a.reuse_compatible(&b));
    }
}
