//! Per-level command recording: clear preambles, batched state transitions,
//! attachment assembly and pass callback invocation.

use std::ffi::CString;
use std::ptr;

use anyhow::Result;
use ash::vk;

use crate::context::{FrameData, ProfilerTask, RenderContext};
use crate::render_graph::barrier::{fill_buffer_barrier, fill_image_barrier, BarrierBatch};
use crate::render_graph::error::RenderGraphError;
use crate::render_graph::graph::RenderGraph;
use crate::render_graph::pass::{Pass, PassType};
use crate::render_graph::pool::TransientResourcePool;
use crate::render_graph::resource::{ResourceState, SubresourceId};

/// Passes sharing the same longest-path distance from the root. They execute
/// with no barriers between each other, in original insertion order.
#[derive(Debug, Clone)]
pub(crate) struct DependencyLevel {
    pub index: u32,
    pub passes: Vec<u32>,
}

impl DependencyLevel {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            passes: Vec::new(),
        }
    }
}

const PASS_COLORS: [[f32; 4]; 8] = [
    [0.90, 0.30, 0.25, 1.0],
    [0.25, 0.65, 0.90, 1.0],
    [0.35, 0.80, 0.40, 1.0],
    [0.95, 0.75, 0.20, 1.0],
    [0.70, 0.45, 0.90, 1.0],
    [0.25, 0.85, 0.80, 1.0],
    [0.95, 0.55, 0.70, 1.0],
    [0.60, 0.60, 0.60, 1.0],
];

/// Records and submits the whole built graph for the current frame
pub(crate) fn execute_graph(
    graph: &mut RenderGraph,
    ctx: &mut RenderContext,
    pool: &mut TransientResourcePool,
) -> Result<()> {
    let device = ctx.device().clone();
    let queue = ctx.general_queue();
    let pipeline_layout = ctx.pipeline_layout();
    let bindless_set = ctx.bindless().set_for_frame(ctx.current_frame_index());
    let frame = ctx.current_frame_mut();
    let cmd = frame.command_buffer;

    unsafe {
        device.get_handle().begin_command_buffer(
            cmd,
            &vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                p_next: ptr::null(),
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                p_inheritance_info: ptr::null(),
                _marker: Default::default(),
            },
        )?;
        // The bindless set serves both bind points for the whole frame
        for bind_point in [vk::PipelineBindPoint::GRAPHICS, vk::PipelineBindPoint::COMPUTE] {
            device.get_handle().cmd_bind_descriptor_sets(
                cmd,
                bind_point,
                pipeline_layout,
                0,
                &[bindless_set],
                &[],
            );
        }
    }

    // Reserve enough timestamp space: begin + end per pass
    let needed_timestamps = (graph.passes.len() * 2) as u32;
    if frame.timestamp_capacity < needed_timestamps {
        if let Some(old_pool) = frame.timestamp_query_pool.take() {
            let deletion_device = device.clone();
            device.defer_deletion(move || unsafe {
                deletion_device
                    .get_handle()
                    .destroy_query_pool(old_pool, None);
            })?;
        }
        let query_pool = unsafe {
            device.get_handle().create_query_pool(
                &vk::QueryPoolCreateInfo {
                    s_type: vk::StructureType::QUERY_POOL_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::QueryPoolCreateFlags::empty(),
                    query_type: vk::QueryType::TIMESTAMP,
                    query_count: needed_timestamps,
                    pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
                    _marker: Default::default(),
                },
                None,
            )?
        };
        frame.timestamp_query_pool = Some(query_pool);
        frame.timestamp_capacity = needed_timestamps;
    }
    let query_pool = frame.timestamp_query_pool.expect("query pool just ensured");
    unsafe {
        device
            .get_handle()
            .reset_query_pool(query_pool, 0, frame.timestamp_capacity)
    };
    frame.next_timestamp = 0;
    frame.cpu_profiler.clear();
    frame.gpu_profiler.clear();

    for level_index in 0..graph.dependency_levels.len() {
        execute_level(graph, level_index, pool, frame, &device, cmd, query_pool)?;
    }

    unsafe { device.get_handle().end_command_buffer(cmd)? };

    let wait_semaphore = frame
        .image_available
        .submit_info(vk::PipelineStageFlags2::TOP_OF_PIPE);
    let signal_semaphore = frame.render_finished.submit_info(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags2::ALL_TRANSFER
            | vk::PipelineStageFlags2::COMPUTE_SHADER
            | vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
    );
    let command_buffer_info = vk::CommandBufferSubmitInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
        p_next: ptr::null(),
        command_buffer: cmd,
        device_mask: 0,
        _marker: Default::default(),
    };
    let submit_info = vk::SubmitInfo2 {
        s_type: vk::StructureType::SUBMIT_INFO_2,
        p_next: ptr::null(),
        flags: vk::SubmitFlags::empty(),
        wait_semaphore_info_count: 1,
        p_wait_semaphore_infos: &wait_semaphore,
        command_buffer_info_count: 1,
        p_command_buffer_infos: &command_buffer_info,
        signal_semaphore_info_count: 1,
        p_signal_semaphore_infos: &signal_semaphore,
        _marker: Default::default(),
    };
    unsafe {
        device.get_handle().queue_submit2(
            queue.handle(),
            &[submit_info],
            frame.render_finished_fence.handle(),
        )?
    };
    Ok(())
}

/// A write whose alias resolves to the same underlying resource as a read in
/// the same pass: the read phase skips it, the write phase owns the barrier.
fn is_read_modify_write(graph: &RenderGraph, pass: &Pass, read: &SubresourceId) -> bool {
    pass.texture_writes.iter().any(|write| {
        write.subresource_index == read.subresource_index
            && write.id == read.id
            && resolve_or_self(graph, &write.name) == resolve_or_self(graph, &read.name)
    })
}

fn resolve_or_self(graph: &RenderGraph, name: &str) -> String {
    graph
        .resolve_resource_name(name)
        .unwrap_or_else(|_| name.to_string())
}

struct AssembledPass {
    name: CString,
    color: [f32; 4],
    is_graphics: bool,
    begins_rendering: bool,
    viewport: Option<vk::Viewport>,
    scissor: Option<vk::Rect2D>,
    color_attachments: Vec<vk::RenderingAttachmentInfo<'static>>,
    depth_attachment: Option<vk::RenderingAttachmentInfo<'static>>,
    layer_count: u32,
}

#[allow(clippy::too_many_arguments)]
fn execute_level(
    graph: &mut RenderGraph,
    level_index: usize,
    pool: &mut TransientResourcePool,
    frame: &mut FrameData,
    device: &crate::device::LogicalDevice,
    cmd: vk::CommandBuffer,
    query_pool: vk::QueryPool,
) -> Result<()> {
    let pass_ids = graph.dependency_levels[level_index].passes.clone();
    tracing::trace!(
        "level {}: {} passes",
        graph.dependency_levels[level_index].index,
        pass_ids.len()
    );

    record_clears_on_execute(graph, &pass_ids, pool, device, cmd)?;
    transition_resource_states(graph, &pass_ids, pool, device, cmd)?;

    for &pass_id in &pass_ids {
        let assembled = assemble_pass(graph, pass_id, pool)?;

        device.cmd_begin_label(cmd, &assembled.name);
        let cpu_start = frame.frame_start.elapsed().as_secs_f64();
        let begin_query = frame.next_timestamp;
        frame.next_timestamp += 1;
        unsafe {
            device.get_handle().cmd_write_timestamp2(
                cmd,
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                query_pool,
                begin_query,
            )
        };

        if assembled.is_graphics {
            let (viewport, scissor) = match (assembled.viewport, assembled.scissor) {
                (Some(viewport), Some(scissor)) => (viewport, scissor),
                _ => {
                    let name = graph.passes[pass_id as usize].name.clone();
                    return Err(RenderGraphError::MissingViewport(name).into());
                }
            };
            unsafe {
                device.get_handle().cmd_set_viewport_with_count(cmd, &[viewport]);
                device.get_handle().cmd_set_scissor_with_count(cmd, &[scissor]);
            }
            if assembled.begins_rendering {
                let rendering_info = vk::RenderingInfo {
                    s_type: vk::StructureType::RENDERING_INFO,
                    p_next: ptr::null(),
                    flags: vk::RenderingFlags::empty(),
                    render_area: vk::Rect2D {
                        offset: vk::Offset2D {
                            x: viewport.x as i32,
                            y: viewport.y as i32,
                        },
                        extent: vk::Extent2D {
                            width: viewport.width.abs() as u32,
                            height: viewport.height.abs() as u32,
                        },
                    },
                    layer_count: assembled.layer_count,
                    view_mask: 0,
                    color_attachment_count: assembled.color_attachments.len() as u32,
                    p_color_attachments: assembled.color_attachments.as_ptr(),
                    p_depth_attachment: assembled
                        .depth_attachment
                        .as_ref()
                        .map_or(ptr::null(), |attachment| attachment),
                    p_stencil_attachment: ptr::null(),
                    _marker: Default::default(),
                };
                unsafe { device.get_handle().cmd_begin_rendering(cmd, &rendering_info) };
            }
        }

        let mut execute_fn = graph.passes[pass_id as usize]
            .execute_fn
            .take()
            .expect("pass execute callback present");
        let callback_result = {
            let context = crate::render_graph::scheduler::ExecutionContext {
                graph: &*graph,
                pool: &*pool,
            };
            execute_fn(&context, cmd)
        };
        graph.passes[pass_id as usize].execute_fn = Some(execute_fn);
        callback_result?;

        if assembled.is_graphics && assembled.begins_rendering {
            unsafe { device.get_handle().cmd_end_rendering(cmd) };
        }

        let end_query = frame.next_timestamp;
        frame.next_timestamp += 1;
        unsafe {
            device.get_handle().cmd_write_timestamp2(
                cmd,
                vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                query_pool,
                end_query,
            )
        };
        let cpu_end = frame.frame_start.elapsed().as_secs_f64();
        let pass_name = graph.passes[pass_id as usize].name.clone();
        frame.cpu_profiler.push(ProfilerTask {
            name: pass_name.clone(),
            color: assembled.color,
            start: cpu_start,
            end: cpu_end,
        });
        // GPU tasks carry query indices until the next fence wait reads them
        frame.gpu_profiler.push(ProfilerTask {
            name: pass_name,
            color: assembled.color,
            start: begin_query as f64,
            end: end_query as f64,
        });

        device.cmd_end_label(cmd);
    }
    Ok(())
}

/// Clear-on-execute preamble: transition targets to `WRITE | COPY_DST`,
/// batch the barriers, then record the fills.
fn record_clears_on_execute(
    graph: &mut RenderGraph,
    pass_ids: &[u32],
    pool: &mut TransientResourcePool,
    device: &crate::device::LogicalDevice,
    cmd: vk::CommandBuffer,
) -> Result<()> {
    let mut batch = BarrierBatch::new();
    let mut fills: Vec<(vk::Buffer, u64, u64, u32)> = Vec::new();

    for &pass_id in pass_ids {
        for clear in &graph.passes[pass_id as usize].clears_on_execute {
            let handle = graph.buffer_handle(clear.id)?;
            let resource = pool.get_buffer_mut(handle);
            let next = ResourceState::WRITE | ResourceState::COPY_DESTINATION;
            fill_buffer_barrier(&mut batch, resource.state(0), next);
            resource.set_state(0, next);
            fills.push((
                resource.inner().handle()?,
                clear.offset,
                clear.size,
                clear.data,
            ));
        }
    }

    if batch.emit(device, cmd) {
        graph.stats.barrier_batch_count += 1;
        graph.stats.barrier_count += batch.barrier_count() as u32;
    }
    for (buffer, offset, size, data) in fills {
        unsafe {
            device
                .get_handle()
                .cmd_fill_buffer(cmd, buffer, offset, size, data)
        };
    }
    Ok(())
}

/// Computes every read/write transition of the level against the wrappers'
/// tracked states and emits them as one batched pipeline barrier.
fn transition_resource_states(
    graph: &mut RenderGraph,
    pass_ids: &[u32],
    pool: &mut TransientResourcePool,
    device: &crate::device::LogicalDevice,
    cmd: vk::CommandBuffer,
) -> Result<()> {
    let mut batch = BarrierBatch::new();

    for &pass_id in pass_ids {
        let pass = &graph.passes[pass_id as usize];

        for subresource in pass.buffer_reads.iter().chain(pass.buffer_writes.iter()) {
            let handle = graph.buffer_handle(subresource.id)?;
            let resource = pool.get_buffer_mut(handle);
            let next = pass.state_of(subresource);
            fill_buffer_barrier(&mut batch, resource.state(0), next);
            resource.set_state(0, next);
        }

        for subresource in &pass.texture_reads {
            // Read-modify-write is handled by the write loop below
            if is_read_modify_write(graph, pass, subresource) {
                continue;
            }
            transition_texture(graph, pass, subresource, pool, &mut batch)?;
        }
        for subresource in &pass.texture_writes {
            transition_texture(graph, pass, subresource, pool, &mut batch)?;
        }
    }

    if batch.emit(device, cmd) {
        graph.stats.barrier_batch_count += 1;
        graph.stats.barrier_count += batch.barrier_count() as u32;
    }
    Ok(())
}

fn transition_texture(
    graph: &RenderGraph,
    pass: &Pass,
    subresource: &SubresourceId,
    pool: &mut TransientResourcePool,
    batch: &mut BarrierBatch,
) -> Result<()> {
    let handle = graph.texture_handle(subresource.id)?;
    let resource = pool.get_texture_mut(handle);
    let aspect_mask = if resource.inner().get_description().is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    let image = resource.inner().handle()?;
    let next = pass.state_of(subresource);
    fill_image_barrier(
        batch,
        image,
        aspect_mask,
        subresource.subresource_index,
        resource.state(subresource.subresource_index),
        next,
    )?;
    resource.set_state(subresource.subresource_index, next);
    Ok(())
}

/// Gathers everything the recording loop needs from a pass so the pass
/// borrow can end before the callback is invoked.
fn assemble_pass(
    graph: &RenderGraph,
    pass_id: u32,
    pool: &TransientResourcePool,
) -> Result<AssembledPass> {
    let pass = &graph.passes[pass_id as usize];
    let is_graphics = pass.ty == PassType::Graphics;

    let mut assembled = AssembledPass {
        name: CString::new(pass.name.as_str()).unwrap_or_default(),
        color: PASS_COLORS[pass.id as usize % PASS_COLORS.len()],
        is_graphics,
        begins_rendering: is_graphics && pass.has_raster_attachments(),
        viewport: pass.viewport,
        scissor: pass.scissor,
        color_attachments: Vec::new(),
        depth_attachment: None,
        layer_count: 1,
    };
    if !assembled.begins_rendering {
        return Ok(assembled);
    }

    let raster_states =
        ResourceState::RENDER_TARGET | ResourceState::DEPTH_READ | ResourceState::DEPTH_WRITE;

    // Attachments read by the pass are loaded and left untouched
    for subresource in &pass.texture_reads {
        if is_read_modify_write(graph, pass, subresource) {
            continue;
        }
        if !pass.state_of(subresource).intersects(raster_states) {
            continue;
        }
        let texture = pool.get_texture(graph.texture_handle(subresource.id)?).inner();
        assembled.layer_count = assembled
            .layer_count
            .max(texture.get_description().layer_count);
        if texture.get_description().is_depth() {
            assembled.depth_attachment = Some(texture.attachment_info(
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ClearValue::default(),
                vk::AttachmentLoadOp::LOAD,
                vk::AttachmentStoreOp::DONT_CARE,
                subresource.subresource_index,
            )?);
        } else {
            assembled.color_attachments.push(texture.attachment_info(
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ClearValue::default(),
                vk::AttachmentLoadOp::LOAD,
                vk::AttachmentStoreOp::DONT_CARE,
                subresource.subresource_index,
            )?);
        }
    }

    // Written attachments use the declared ops and clear values
    let mut written_color_index = 0usize;
    for subresource in &pass.texture_writes {
        if !pass.state_of(subresource).intersects(raster_states) {
            continue;
        }
        let texture = pool.get_texture(graph.texture_handle(subresource.id)?).inner();
        assembled.layer_count = assembled
            .layer_count
            .max(texture.get_description().layer_count);
        if texture.get_description().is_depth() {
            let info = pass.depth_stencil.unwrap_or(crate::render_graph::pass::DepthStencilInfo {
                clear_value: None,
                depth_load_op: vk::AttachmentLoadOp::DONT_CARE,
                depth_store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            });
            assembled.depth_attachment = Some(texture.attachment_info(
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ClearValue {
                    depth_stencil: info.clear_value.unwrap_or_default(),
                },
                info.depth_load_op,
                info.depth_store_op,
                subresource.subresource_index,
            )?);
        } else {
            let info = pass
                .render_targets
                .get(written_color_index)
                .copied()
                .unwrap_or(crate::render_graph::pass::RenderTargetInfo {
                    clear_value: None,
                    load_op: vk::AttachmentLoadOp::DONT_CARE,
                    store_op: vk::AttachmentStoreOp::STORE,
                });
            written_color_index += 1;
            assembled.color_attachments.push(texture.attachment_info(
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ClearValue {
                    color: info.clear_value.unwrap_or_default(),
                },
                info.load_op,
                info.store_op,
                subresource.subresource_index,
            )?);
        }
    }

    Ok(assembled)
}
