//! Command buffers are divided into [`CommandBuffer`], [`CommandBufferRecording`]
//! and [`CommandBufferExecutable`]. The typestate ensures commands are only
//! recorded into a buffer that has actually begun.
use std::ops::Deref;
use std::ptr;

use anyhow::Result;
use ash::vk;

#[derive(Debug, Clone)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    device: crate::device::LogicalDevice,
}

impl CommandBuffer {
    pub fn new(handle: vk::CommandBuffer, device: crate::device::LogicalDevice) -> Self {
        Self { handle, device }
    }

    pub fn begin(self, flags: vk::CommandBufferUsageFlags) -> Result<CommandBufferRecording> {
        unsafe {
            self.device.get_handle().begin_command_buffer(
                self.handle,
                &vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    p_next: ptr::null(),
                    flags,
                    p_inheritance_info: ptr::null(),
                    _marker: Default::default(),
                },
            )?
        };
        Ok(CommandBufferRecording {
            handle: self.handle,
            device: self.device,
        })
    }
}

#[derive(Debug)]
pub struct CommandBufferRecording {
    handle: vk::CommandBuffer,
    device: crate::device::LogicalDevice,
}

impl CommandBufferRecording {
    /// Ends recording into the command buffer
    pub fn end(self) -> Result<CommandBufferExecutable> {
        unsafe { self.device.get_handle().end_command_buffer(self.handle)? }
        Ok(CommandBufferExecutable {
            handle: self.handle,
            device: self.device,
        })
    }
}

/// Command buffer in its executable state, ready for queue submission
#[derive(Debug)]
pub struct CommandBufferExecutable {
    handle: vk::CommandBuffer,
    device: crate::device::LogicalDevice,
}

impl CommandBufferExecutable {
    /// Quickly acquire a [`VkCommandBufferSubmitInfo`](vk::CommandBufferSubmitInfo)
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            p_next: ptr::null(),
            command_buffer: self.handle,
            device_mask: 0,
            _marker: Default::default(),
        }
    }

    /// Submits to the queue, handing the buffer back in its ready state
    pub fn submit(
        self,
        queue: vk::Queue,
        submit_infos: &[vk::SubmitInfo2],
        fence: vk::Fence,
    ) -> Result<CommandBuffer> {
        unsafe {
            self.device
                .get_handle()
                .queue_submit2(queue, submit_infos, fence)?
        };
        Ok(CommandBuffer {
            handle: self.handle,
            device: self.device,
        })
    }
}

/// Traits that all command buffer states are expected to have
pub trait CmdBuffer: Deref<Target = vk::CommandBuffer> {
    fn get_device(&self) -> &crate::device::LogicalDevice;
    fn handle(&self) -> vk::CommandBuffer;
}

macro_rules! impl_cmd_buffer {
    ($state:ty) => {
        impl CmdBuffer for $state {
            fn get_device(&self) -> &crate::device::LogicalDevice {
                &self.device
            }

            fn handle(&self) -> vk::CommandBuffer {
                self.handle
            }
        }

        impl Deref for $state {
            type Target = vk::CommandBuffer;

            fn deref(&self) -> &Self::Target {
                &self.handle
            }
        }
    };
}

impl_cmd_buffer!(CommandBuffer);
impl_cmd_buffer!(CommandBufferRecording);
impl_cmd_buffer!(CommandBufferExecutable);
