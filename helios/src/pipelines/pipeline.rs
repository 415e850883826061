use std::ffi::CStr;
use std::ptr;

use anyhow::Result;
use ash::vk;

use crate::pipelines::{PipelineCache, PipelineLayout};
use crate::traits::Destructible;

const SHADER_ENTRY: &CStr = c"main";

/// Graphics pipeline creation options. Attachment formats feed dynamic
/// rendering; viewport and scissor are always dynamic.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineOptions {
    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: Option<vk::ShaderModule>,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub blend_enable: bool,
    pub samples: vk::SampleCountFlags,
}

impl Default for GraphicsPipelineOptions {
    fn default() -> Self {
        Self {
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: None,
            color_formats: Vec::new(),
            depth_format: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare_op: vk::CompareOp::GREATER_OR_EQUAL,
            blend_enable: false,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputePipelineOptions {
    pub shader: vk::ShaderModule,
}

/// Creation options as a sum type; compilation is one exhaustive match
#[derive(Debug, Clone)]
pub enum PipelineVariant {
    Graphics(GraphicsPipelineOptions),
    Compute(ComputePipelineOptions),
}

pub struct Pipeline {
    handle: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    device: crate::device::LogicalDevice,
}

impl Pipeline {
    pub fn new(
        device: crate::device::LogicalDevice,
        layout: &PipelineLayout,
        cache: &PipelineCache,
        variant: PipelineVariant,
    ) -> Result<Self> {
        match variant {
            PipelineVariant::Graphics(options) => {
                Self::new_graphics(device, layout, cache, options)
            }
            PipelineVariant::Compute(options) => Self::new_compute(device, layout, cache, options),
        }
    }

    fn new_compute(
        device: crate::device::LogicalDevice,
        layout: &PipelineLayout,
        cache: &PipelineCache,
        options: ComputePipelineOptions,
    ) -> Result<Self> {
        let stage = vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::PipelineShaderStageCreateFlags::empty(),
            stage: vk::ShaderStageFlags::COMPUTE,
            module: options.shader,
            p_name: SHADER_ENTRY.as_ptr(),
            p_specialization_info: ptr::null(),
            _marker: Default::default(),
        };
        let create_info = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::PipelineCreateFlags::empty(),
            stage,
            layout: layout.handle(),
            base_pipeline_handle: vk::Pipeline::null(),
            base_pipeline_index: -1,
            _marker: Default::default(),
        };
        let handle = unsafe {
            device
                .get_handle()
                .create_compute_pipelines(cache.handle(), &[create_info], None)
                .map_err(|(_, error)| error)?[0]
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkPipeline (compute) {:p}", handle);

        Ok(Self {
            handle,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            device,
        })
    }

    fn new_graphics(
        device: crate::device::LogicalDevice,
        layout: &PipelineLayout,
        cache: &PipelineCache,
        options: GraphicsPipelineOptions,
    ) -> Result<Self> {
        let mut stages = vec![vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::PipelineShaderStageCreateFlags::empty(),
            stage: vk::ShaderStageFlags::VERTEX,
            module: options.vertex_shader,
            p_name: SHADER_ENTRY.as_ptr(),
            p_specialization_info: ptr::null(),
            _marker: Default::default(),
        }];
        if let Some(fragment_shader) = options.fragment_shader {
            stages.push(vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                p_next: ptr::null(),
                flags: vk::PipelineShaderStageCreateFlags::empty(),
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fragment_shader,
                p_name: SHADER_ENTRY.as_ptr(),
                p_specialization_info: ptr::null(),
                _marker: Default::default(),
            });
        }

        // Geometry is pulled from bindless buffers, so no vertex input state
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(options.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default();
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(options.polygon_mode)
            .cull_mode(options.cull_mode)
            .front_face(options.front_face)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(options.samples);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(options.depth_test)
            .depth_write_enable(options.depth_write)
            .depth_compare_op(options.depth_compare_op);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = options
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(options.blend_enable)
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT_WITH_COUNT,
            vk::DynamicState::SCISSOR_WITH_COUNT,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&options.color_formats)
            .depth_attachment_format(options.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        let handle = unsafe {
            device
                .get_handle()
                .create_graphics_pipelines(cache.handle(), &[create_info], None)
                .map_err(|(_, error)| error)?[0]
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkPipeline (graphics) {:p}", handle);

        Ok(Self {
            handle,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            device,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .get_handle()
                .cmd_bind_pipeline(cmd, self.bind_point, self.handle)
        };
    }
}

impl Destructible for Pipeline {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkPipeline {:p}", self.handle);

        unsafe {
            self.device.get_handle().destroy_pipeline(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}
