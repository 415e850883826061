//! Translation of accumulated [`ResourceState`] transitions into pipeline
//! barriers.
//!
//! Per-resource barriers are reserved for image layout transitions; buffer
//! transitions collapse into deduplicated global memory barriers.

use std::collections::HashSet;
use std::ptr;

use ash::vk;

use crate::render_graph::error::RenderGraphError;
use crate::render_graph::resource::ResourceState;

/// Hashable stand-in for a [`vk::MemoryBarrier2`]:
/// `(src_stage, src_access, dst_stage, dst_access)`
pub type MemoryBarrierKey = (
    vk::PipelineStageFlags2,
    vk::AccessFlags2,
    vk::PipelineStageFlags2,
    vk::AccessFlags2,
);

/// Barriers accumulated for one dependency level, emitted as a single
/// `vkCmdPipelineBarrier2`.
#[derive(Default)]
pub struct BarrierBatch {
    pub memory: HashSet<MemoryBarrierKey>,
    pub image: Vec<vk::ImageMemoryBarrier2<'static>>,
    pub buffer: Vec<vk::BufferMemoryBarrier2<'static>>,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.image.is_empty() && self.buffer.is_empty()
    }

    pub fn barrier_count(&self) -> usize {
        self.memory.len() + self.image.len() + self.buffer.len()
    }

    /// Records the batched barrier; returns whether anything was emitted
    pub fn emit(&self, device: &crate::device::LogicalDevice, cmd: vk::CommandBuffer) -> bool {
        if self.is_empty() {
            return false;
        }
        let memory_barriers: Vec<vk::MemoryBarrier2> = self
            .memory
            .iter()
            .map(
                |&(src_stage_mask, src_access_mask, dst_stage_mask, dst_access_mask)| {
                    vk::MemoryBarrier2 {
                        s_type: vk::StructureType::MEMORY_BARRIER_2,
                        p_next: ptr::null(),
                        src_stage_mask,
                        src_access_mask,
                        dst_stage_mask,
                        dst_access_mask,
                        _marker: Default::default(),
                    }
                },
            )
            .collect();
        let dependency_info = vk::DependencyInfo {
            s_type: vk::StructureType::DEPENDENCY_INFO,
            p_next: ptr::null(),
            dependency_flags: vk::DependencyFlags::empty(),
            memory_barrier_count: memory_barriers.len() as u32,
            p_memory_barriers: memory_barriers.as_ptr(),
            buffer_memory_barrier_count: self.buffer.len() as u32,
            p_buffer_memory_barriers: self.buffer.as_ptr(),
            image_memory_barrier_count: self.image.len() as u32,
            p_image_memory_barriers: self.image.as_ptr(),
            _marker: Default::default(),
        };
        unsafe {
            device
                .get_handle()
                .cmd_pipeline_barrier2(cmd, &dependency_info)
        };
        true
    }
}

fn has_write_access(mask: vk::AccessFlags2) -> bool {
    mask.intersects(
        vk::AccessFlags2::SHADER_WRITE
            | vk::AccessFlags2::TRANSFER_WRITE
            | vk::AccessFlags2::HOST_WRITE
            | vk::AccessFlags2::MEMORY_WRITE
            | vk::AccessFlags2::SHADER_STORAGE_WRITE
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
    )
}

const SHADER_RESOURCE_STATES: ResourceState = ResourceState::VERTEX_SHADER_RESOURCE
    .union(ResourceState::FRAGMENT_SHADER_RESOURCE)
    .union(ResourceState::COMPUTE_SHADER_RESOURCE);

/// Derives a buffer transition and merges it into the batch. Read-to-read
/// chains need no synchronization at all.
pub fn fill_buffer_barrier(batch: &mut BarrierBatch, current: ResourceState, next: ResourceState) {
    let mut src_stage = vk::PipelineStageFlags2::NONE;
    let mut src_access = vk::AccessFlags2::NONE;
    let mut dst_stage = vk::PipelineStageFlags2::NONE;
    let mut dst_access = vk::AccessFlags2::NONE;

    if current.is_undefined() {
        src_stage |= vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
    }

    let current_shader_resource = current.intersects(SHADER_RESOURCE_STATES);
    if current_shader_resource && current.contains(ResourceState::READ) {
        // SHADER_READ implies both storage and sampled reads
        src_access |= vk::AccessFlags2::SHADER_READ;
    }
    if current_shader_resource && current.contains(ResourceState::WRITE) {
        src_access |= vk::AccessFlags2::SHADER_WRITE;
    }

    let next_shader_resource = next.intersects(SHADER_RESOURCE_STATES);
    if next_shader_resource && next.contains(ResourceState::READ) {
        dst_access |= vk::AccessFlags2::SHADER_READ;
    }
    if next_shader_resource && next.contains(ResourceState::WRITE) {
        dst_access |= vk::AccessFlags2::SHADER_WRITE;
    }

    // CURRENT STATE
    if current.contains(ResourceState::COMPUTE_SHADER_RESOURCE) {
        src_stage |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    if current.contains(ResourceState::FRAGMENT_SHADER_RESOURCE) {
        src_stage |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if current.contains(ResourceState::COPY_SOURCE) {
        // Copy sources want TRANSFER_READ, not the shader read bits
        src_access |= vk::AccessFlags2::TRANSFER_READ;
        src_access &= !vk::AccessFlags2::SHADER_READ;
        src_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if current.contains(ResourceState::COPY_DESTINATION) {
        src_access |= vk::AccessFlags2::TRANSFER_WRITE;
        src_access &= !vk::AccessFlags2::SHADER_WRITE;
        src_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if current.contains(ResourceState::INDEX_BUFFER) {
        src_access |= vk::AccessFlags2::INDEX_READ;
        src_stage |= vk::PipelineStageFlags2::INDEX_INPUT;
    }
    if current.intersects(ResourceState::VERTEX_BUFFER | ResourceState::VERTEX_SHADER_RESOURCE) {
        src_access |= vk::AccessFlags2::MEMORY_READ;
        src_stage |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if current.contains(ResourceState::UNIFORM_BUFFER) {
        src_access |= vk::AccessFlags2::UNIFORM_READ;
        src_access &= !vk::AccessFlags2::SHADER_READ;
    }
    if current.contains(ResourceState::INDIRECT_ARGUMENT) {
        src_access |= vk::AccessFlags2::INDIRECT_COMMAND_READ;
        src_access &= !vk::AccessFlags2::SHADER_READ;
        src_stage |= vk::PipelineStageFlags2::DRAW_INDIRECT;
    }
    if current.contains(ResourceState::STORAGE_BUFFER) && current.contains(ResourceState::READ) {
        src_access |= vk::AccessFlags2::SHADER_READ;
    }
    if current.contains(ResourceState::STORAGE_BUFFER) && current.contains(ResourceState::WRITE) {
        src_access |= vk::AccessFlags2::SHADER_WRITE;
    }

    // NEXT STATE
    if next.contains(ResourceState::COMPUTE_SHADER_RESOURCE) {
        dst_stage |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    if next.contains(ResourceState::INDEX_BUFFER) {
        dst_access |= vk::AccessFlags2::INDEX_READ;
        dst_stage |= vk::PipelineStageFlags2::INDEX_INPUT;
    }
    if next.intersects(ResourceState::VERTEX_BUFFER | ResourceState::VERTEX_SHADER_RESOURCE) {
        dst_access |= vk::AccessFlags2::MEMORY_READ;
        dst_stage |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if next.contains(ResourceState::COPY_SOURCE) {
        dst_access |= vk::AccessFlags2::TRANSFER_READ;
        dst_access &= !vk::AccessFlags2::SHADER_READ;
        dst_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if next.contains(ResourceState::COPY_DESTINATION) {
        dst_access |= vk::AccessFlags2::TRANSFER_WRITE;
        dst_access &= !vk::AccessFlags2::SHADER_WRITE;
        dst_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if next.contains(ResourceState::UNIFORM_BUFFER) {
        dst_access |= vk::AccessFlags2::UNIFORM_READ;
        dst_access &= !vk::AccessFlags2::SHADER_READ;
    }
    if next.contains(ResourceState::INDIRECT_ARGUMENT) {
        dst_access |= vk::AccessFlags2::INDIRECT_COMMAND_READ;
        dst_access &= !vk::AccessFlags2::SHADER_READ;
        dst_stage |= vk::PipelineStageFlags2::DRAW_INDIRECT;
    }
    if next.contains(ResourceState::FRAGMENT_SHADER_RESOURCE) {
        dst_stage |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if next.contains(ResourceState::STORAGE_BUFFER) && next.contains(ResourceState::READ) {
        dst_access |= vk::AccessFlags2::SHADER_READ;
    }
    if next.contains(ResourceState::STORAGE_BUFFER) && next.contains(ResourceState::WRITE) {
        dst_access |= vk::AccessFlags2::SHADER_WRITE;
    }

    if !has_write_access(src_access) && !has_write_access(dst_access) {
        return;
    }
    batch
        .memory
        .insert((src_stage, src_access, dst_stage, dst_access));
}

/// Derives an image transition and merges it into the batch. A read-to-read
/// transition with identical layouts emits nothing; a layout change is always
/// emitted as an image barrier even without a write.
pub fn fill_image_barrier(
    batch: &mut BarrierBatch,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    subresource_index: u32,
    current: ResourceState,
    next: ResourceState,
) -> Result<vk::ImageLayout, RenderGraphError> {
    let mut src_stage = vk::PipelineStageFlags2::NONE;
    let mut src_access = vk::AccessFlags2::NONE;
    let mut old_layout = vk::ImageLayout::UNDEFINED;
    let mut dst_stage = vk::PipelineStageFlags2::NONE;
    let mut dst_access = vk::AccessFlags2::NONE;
    let mut new_layout = vk::ImageLayout::UNDEFINED;

    if current.is_undefined() {
        src_stage |= vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
    }

    // CURRENT STATE
    if current.contains(ResourceState::COMPUTE_SHADER_RESOURCE) {
        // Written-to storage images sit in GENERAL, read-only in
        // SHADER_READ_ONLY_OPTIMAL
        if current.contains(ResourceState::READ) {
            old_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            src_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if current.contains(ResourceState::WRITE) {
            old_layout = vk::ImageLayout::GENERAL;
            src_access |=
                vk::AccessFlags2::SHADER_STORAGE_WRITE | vk::AccessFlags2::SHADER_STORAGE_READ;
            src_access &= !vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        src_stage |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    if current.contains(ResourceState::FRAGMENT_SHADER_RESOURCE) {
        if current.contains(ResourceState::READ) {
            old_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            src_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if current.contains(ResourceState::WRITE) {
            old_layout = vk::ImageLayout::GENERAL;
            src_access |=
                vk::AccessFlags2::SHADER_STORAGE_WRITE | vk::AccessFlags2::SHADER_STORAGE_READ;
        }
        src_stage |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if current.contains(ResourceState::VERTEX_SHADER_RESOURCE) {
        old_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        src_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        src_stage |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if current.contains(ResourceState::RENDER_TARGET) {
        old_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        if current.contains(ResourceState::READ) {
            src_access |= vk::AccessFlags2::COLOR_ATTACHMENT_READ;
        }
        if current.contains(ResourceState::WRITE) {
            src_access |=
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE | vk::AccessFlags2::COLOR_ATTACHMENT_READ;
        }
        src_stage |= vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
    }
    if current.contains(ResourceState::DEPTH_READ) {
        old_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        src_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
        src_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
    }
    if current.contains(ResourceState::DEPTH_WRITE) {
        old_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        src_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
        src_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
    }
    if current.contains(ResourceState::COPY_SOURCE) {
        old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        src_access |= vk::AccessFlags2::TRANSFER_READ;
        src_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if current.contains(ResourceState::COPY_DESTINATION) {
        old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        src_access |= vk::AccessFlags2::TRANSFER_WRITE;
        src_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }

    // NEXT STATE
    if next.contains(ResourceState::COMPUTE_SHADER_RESOURCE) {
        if next.contains(ResourceState::READ)
            && current.intersects(
                ResourceState::RENDER_TARGET | ResourceState::DEPTH_READ | ResourceState::DEPTH_WRITE,
            )
        {
            new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            dst_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if next.contains(ResourceState::WRITE) {
            new_layout = vk::ImageLayout::GENERAL;
            dst_access |=
                vk::AccessFlags2::SHADER_STORAGE_WRITE | vk::AccessFlags2::SHADER_STORAGE_READ;
        }
        // A storage image that is only read can be sampled directly, so the
        // fallback layout is SHADER_READ_ONLY_OPTIMAL.
        if new_layout == vk::ImageLayout::UNDEFINED {
            new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            dst_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        dst_stage |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    if next.contains(ResourceState::FRAGMENT_SHADER_RESOURCE) {
        if next.contains(ResourceState::READ) {
            new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            dst_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        }
        if next.contains(ResourceState::WRITE) {
            new_layout = vk::ImageLayout::GENERAL;
            dst_access |=
                vk::AccessFlags2::SHADER_STORAGE_WRITE | vk::AccessFlags2::SHADER_STORAGE_READ;
        }
        dst_stage |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if next.contains(ResourceState::DEPTH_READ) {
        new_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        dst_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
        dst_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;

        // Wait for previous depth ops on this resource
        if old_layout == vk::ImageLayout::UNDEFINED {
            src_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
            src_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
        }
    }
    if next.contains(ResourceState::DEPTH_WRITE) {
        new_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        dst_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
        dst_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;

        if old_layout == vk::ImageLayout::UNDEFINED {
            src_access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
            src_stage |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
        }
    }
    if next.contains(ResourceState::RENDER_TARGET) {
        new_layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
        if next.contains(ResourceState::READ) {
            dst_access |= vk::AccessFlags2::COLOR_ATTACHMENT_READ;
        }
        if next.contains(ResourceState::WRITE) {
            dst_access |= vk::AccessFlags2::COLOR_ATTACHMENT_WRITE;
        }
        dst_stage |= vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
    }
    if next.contains(ResourceState::VERTEX_SHADER_RESOURCE) {
        new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        dst_access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
        dst_stage |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if next.contains(ResourceState::COPY_SOURCE) {
        new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
        dst_access |= vk::AccessFlags2::TRANSFER_READ;
        dst_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if next.contains(ResourceState::COPY_DESTINATION) {
        new_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        dst_access |= vk::AccessFlags2::TRANSFER_WRITE;
        dst_stage |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }

    if new_layout == vk::ImageLayout::UNDEFINED {
        return Err(RenderGraphError::UndeterminedLayout {
            current: current.bits(),
            next: next.bits(),
        });
    }

    if old_layout == new_layout {
        // Read-to-read needs no sync, but a write on either side still does
        if has_write_access(src_access) || has_write_access(dst_access) {
            batch
                .memory
                .insert((src_stage, src_access, dst_stage, dst_access));
        }
    } else {
        batch.image.push(vk::ImageMemoryBarrier2 {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
            p_next: ptr::null(),
            src_stage_mask: src_stage,
            src_access_mask: src_access,
            dst_stage_mask: dst_stage,
            dst_access_mask: dst_access,
            old_layout,
            new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: subresource_index,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            _marker: Default::default(),
        });
    }
    Ok(new_layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> vk::Image {
        vk::Image::null()
    }

    #[test]
    fn render_target_to_fragment_read_transitions_layout() {
        let mut batch = BarrierBatch::new();
        let layout = fill_image_barrier(
            &mut batch,
            image(),
            vk::ImageAspectFlags::COLOR,
            0,
            ResourceState::RENDER_TARGET | ResourceState::WRITE | ResourceState::READ,
            ResourceState::FRAGMENT_SHADER_RESOURCE | ResourceState::READ,
        )
        .unwrap();
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(batch.image.len(), 1);
        let barrier = &batch.image[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(barrier
            .src_stage_mask
            .contains(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT));
        assert!(barrier
            .dst_stage_mask
            .contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
    }

    #[test]
    fn undefined_to_depth_write_waits_on_previous_depth_ops() {
        let mut batch = BarrierBatch::new();
        let layout = fill_image_barrier(
            &mut batch,
            image(),
            vk::ImageAspectFlags::DEPTH,
            0,
            ResourceState::default(),
            ResourceState::DEPTH_READ | ResourceState::DEPTH_WRITE,
        )
        .unwrap();
        assert_eq!(layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let barrier = &batch.image[0];
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert!(barrier
            .src_access_mask
            .contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn read_to_read_same_layout_emits_nothing() {
        let mut batch = BarrierBatch::new();
        fill_image_barrier(
            &mut batch,
            image(),
            vk::ImageAspectFlags::COLOR,
            0,
            ResourceState::FRAGMENT_SHADER_RESOURCE | ResourceState::READ,
            ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::READ,
        )
        .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn read_to_read_with_layout_change_still_transitions() {
        let mut batch = BarrierBatch::new();
        // Depth read to compute sampled read changes layout; no write anywhere
        // but the image transition must still be recorded.
        let layout = fill_image_barrier(
            &mut batch,
            image(),
            vk::ImageAspectFlags::DEPTH,
            0,
            ResourceState::DEPTH_READ,
            ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::READ,
        )
        .unwrap();
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(batch.image.len(), 1);
        assert!(batch.memory.is_empty());
    }

    #[test]
    fn compute_read_only_falls_back_to_sampled_layout() {
        let mut batch = BarrierBatch::new();
        let layout = fill_image_barrier(
            &mut batch,
            image(),
            vk::ImageAspectFlags::COLOR,
            0,
            ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::WRITE | ResourceState::READ,
            ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::READ,
        )
        .unwrap();
        // Previous state was storage write (GENERAL), next is a pure read
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(batch.image.len(), 1);
        assert_eq!(batch.image[0].old_layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn buffer_read_to_read_skips_barrier() {
        let mut batch = BarrierBatch::new();
        fill_buffer_barrier(
            &mut batch,
            ResourceState::STORAGE_BUFFER | ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::READ,
            ResourceState::STORAGE_BUFFER | ResourceState::FRAGMENT_SHADER_RESOURCE | ResourceState::READ,
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn buffer_write_then_indirect_read() {
        let mut batch = BarrierBatch::new();
        fill_buffer_barrier(
            &mut batch,
            ResourceState::STORAGE_BUFFER | ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::WRITE,
            ResourceState::INDIRECT_ARGUMENT | ResourceState::READ,
        );
        assert_eq!(batch.memory.len(), 1);
        let &(src_stage, src_access, dst_stage, dst_access) =
            batch.memory.iter().next().unwrap();
        assert!(src_stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert!(src_access.contains(vk::AccessFlags2::SHADER_WRITE));
        assert!(dst_stage.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
        assert!(dst_access.contains(vk::AccessFlags2::INDIRECT_COMMAND_READ));
        assert!(!dst_access.contains(vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn uniform_read_prefers_uniform_access() {
        let mut batch = BarrierBatch::new();
        fill_buffer_barrier(
            &mut batch,
            ResourceState::STORAGE_BUFFER | ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::WRITE,
            ResourceState::UNIFORM_BUFFER | ResourceState::COMPUTE_SHADER_RESOURCE | ResourceState::READ,
        );
        let &(_, _, _, dst_access) = batch.memory.iter().next().unwrap();
        assert!(dst_access.contains(vk::AccessFlags2::UNIFORM_READ));
        assert!(!dst_access.contains(vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn identical_transitions_deduplicate() {
        let mut batch = BarrierBatch::new();
        for _ in 0..3 {
            fill_buffer_barrier(
                &mut batch,
                ResourceState::STORAGE_BUFFER
                    | ResourceState::COMPUTE_SHADER_RESOURCE
                    | ResourceState::WRITE,
                ResourceState::STORAGE_BUFFER
                    | ResourceState::COMPUTE_SHADER_RESOURCE
                    | ResourceState::READ,
            );
        }
        assert_eq!(batch.memory.len(), 1);
    }
}
