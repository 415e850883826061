use std::ptr;

use anyhow::Result;
use ash::vk;

use crate::traits::Destructible;

#[derive(Debug, Clone)]
pub struct CommandPool {
    handle: vk::CommandPool,
    device: crate::device::LogicalDevice,
}

impl CommandPool {
    pub fn new(
        device: crate::device::LogicalDevice,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let handle = unsafe {
            device.get_handle().create_command_pool(
                &vk::CommandPoolCreateInfo {
                    s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                    p_next: ptr::null(),
                    flags,
                    queue_family_index,
                    _marker: Default::default(),
                },
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkCommandPool {:p}", handle);

        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<crate::command::CommandBuffer>> {
        let handles = unsafe {
            self.device
                .get_handle()
                .allocate_command_buffers(&vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    p_next: ptr::null(),
                    command_pool: self.handle,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: count,
                    _marker: Default::default(),
                })?
        };
        Ok(handles
            .into_iter()
            .map(|handle| crate::command::CommandBuffer::new(handle, self.device.clone()))
            .collect())
    }

    /// Recycles every command buffer allocated from this pool
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .get_handle()
                .reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }
}

impl Destructible for CommandPool {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkCommandPool {:p}", self.handle);

        unsafe {
            self.device
                .get_handle()
                .destroy_command_pool(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
