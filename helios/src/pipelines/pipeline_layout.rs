use std::ptr;

use anyhow::Result;
use ash::vk;

use crate::traits::Destructible;

/// Push-constant block size shared by every shader stage
pub const PUSH_CONSTANT_SIZE: u32 = 128;

/// The single pipeline layout every pipeline uses: one bindless descriptor
/// set plus a 128-byte push-constant block visible to all stages.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    handle: vk::PipelineLayout,
    device: crate::device::LogicalDevice,
}

impl PipelineLayout {
    pub fn new(
        device: crate::device::LogicalDevice,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::ALL,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        };
        let handle = unsafe {
            device.get_handle().create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo {
                    s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::PipelineLayoutCreateFlags::empty(),
                    set_layout_count: 1,
                    p_set_layouts: &set_layout,
                    push_constant_range_count: 1,
                    p_push_constant_ranges: &push_constant_range,
                    _marker: Default::default(),
                },
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkPipelineLayout {:p}", handle);

        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Destructible for PipelineLayout {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkPipelineLayout {:p}", self.handle);

        unsafe {
            self.device
                .get_handle()
                .destroy_pipeline_layout(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}
