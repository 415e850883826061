//! Cache of reusable GPU resources keyed by descriptor, turning per-frame
//! declarations into allocations amortized over frames.
//!
//! Host and ReBAR buffers are buffered per frame slot, device buffers and
//! textures are not.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use ash::vk;
use tracing::warn;

use crate::allocators::{location_for_properties, ArcAllocator};
use crate::descriptor::BindlessTable;
use crate::render_graph::aliaser::{
    fold_bucket_requirements, pack_buckets, Lifetime, ResourceInfo, ResourceMemoryAliaser,
};
use crate::render_graph::resource::{ResourceId, ResourceState};
use crate::resource::{Buffer, BufferDescription, ExtraBufferFlags, Texture, TextureDescription};
use crate::FRAMES_IN_FLIGHT;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub index: usize,
    pub flags: ExtraBufferFlags,
}

/// Which pool vector a transient resource lives in
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

/// Wraps a pooled GPU object together with its tracked per-subresource
/// states. Only the executor mutates the states, as barriers are placed.
#[derive(Debug)]
pub struct GraphResource<T> {
    inner: T,
    states: HashMap<u32, ResourceState>,
}

impl<T> GraphResource<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            states: HashMap::new(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn state(&self, subresource_index: u32) -> ResourceState {
        self.states
            .get(&subresource_index)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, subresource_index: u32, state: ResourceState) {
        self.states.insert(subresource_index, state);
    }

    pub fn reset_state(&mut self) {
        for state in self.states.values_mut() {
            *state = ResourceState::default();
        }
    }
}

pub(crate) struct PooledTexture {
    pub resource: GraphResource<Texture>,
    pub last_used_frame: u64,
}

pub(crate) struct PooledBuffer {
    pub resource: GraphResource<Buffer>,
    pub last_used_frame: u64,
}

/// Aggregate view of one memory bucket for the debug overlay
#[derive(Debug, Clone)]
pub struct BucketStatistics {
    pub size: u64,
    /// `(debug name, offset, size)` per aliased member
    pub members: Vec<(String, u64, u64)>,
}

pub struct TransientResourcePool {
    device: crate::device::LogicalDevice,
    allocator: ArcAllocator,
    bindless: BindlessTable,

    global_frame_number: u64,
    current_frame_index: usize,

    textures: Vec<PooledTexture>,
    device_buffers: Vec<PooledBuffer>,
    host_buffers: [Vec<PooledBuffer>; FRAMES_IN_FLIGHT],
    rebar_buffers: [Vec<PooledBuffer>; FRAMES_IN_FLIGHT],

    device_rma: ResourceMemoryAliaser,
    host_rma: [ResourceMemoryAliaser; FRAMES_IN_FLIGHT],
    rebar_rma: [ResourceMemoryAliaser; FRAMES_IN_FLIGHT],
}

impl TransientResourcePool {
    pub fn new(
        device: crate::device::LogicalDevice,
        allocator: ArcAllocator,
        bindless: BindlessTable,
    ) -> Self {
        Self {
            device,
            allocator,
            bindless,
            global_frame_number: 0,
            current_frame_index: 0,
            textures: Vec::new(),
            device_buffers: Vec::new(),
            host_buffers: Default::default(),
            rebar_buffers: Default::default(),
            device_rma: ResourceMemoryAliaser::new(),
            host_rma: Default::default(),
            rebar_rma: Default::default(),
        }
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame_index
    }

    pub fn global_frame_number(&self) -> u64 {
        self.global_frame_number
    }

    /// Advances the frame, evicts entries unused for `FRAMES_IN_FLIGHT`
    /// frames, resets state tracking on the retained ones and clears the
    /// current frame slot's aliaser bookkeeping.
    pub fn tick(&mut self) {
        self.global_frame_number += 1;
        self.current_frame_index = (self.global_frame_number % FRAMES_IN_FLIGHT as u64) as usize;

        let frame = self.global_frame_number;
        let keep = |last_used: u64| last_used + FRAMES_IN_FLIGHT as u64 >= frame;

        self.textures.retain_mut(|entry| {
            if !keep(entry.last_used_frame) {
                return false;
            }
            entry.resource.reset_state();
            true
        });
        let tick_buffers = |buffers: &mut Vec<PooledBuffer>| {
            buffers.retain_mut(|entry| {
                if !keep(entry.last_used_frame) {
                    return false;
                }
                entry.resource.reset_state();
                true
            });
        };
        tick_buffers(&mut self.device_buffers);
        tick_buffers(&mut self.host_buffers[self.current_frame_index]);
        tick_buffers(&mut self.rebar_buffers[self.current_frame_index]);

        self.device_rma.clear_state();
        self.host_rma[self.current_frame_index].clear_state();
        self.rebar_rma[self.current_frame_index].clear_state();
    }

    /// Returns a pooled texture compatible with `description`, resizing a
    /// reused one in place, or creates a fresh entry. Fresh and resized
    /// resources are marked for memory rebind.
    pub fn create_texture(
        &mut self,
        description: &TextureDescription,
        name: &str,
        id: ResourceId,
    ) -> Result<TextureHandle> {
        let force_no_aliasing = !description.create_flags.graph_bound();
        for (index, entry) in self.textures.iter_mut().enumerate() {
            if entry.last_used_frame == self.global_frame_number
                || !entry
                    .resource
                    .inner()
                    .get_description()
                    .reuse_compatible(description)
            {
                continue;
            }
            entry.last_used_frame = self.global_frame_number;
            let resized = entry.resource.inner_mut().resize(description.dimensions)?;
            if resized && !force_no_aliasing {
                self.device_rma.mark_rebind(id);
            }
            entry.resource.inner_mut().set_name(name);
            return Ok(TextureHandle(index));
        }

        let texture = Texture::new(
            self.device.clone(),
            self.allocator.clone(),
            self.bindless.clone(),
            description.clone(),
            Some(name.to_string()),
        )?;
        let handle = TextureHandle(self.textures.len());
        self.textures.push(PooledTexture {
            resource: GraphResource::new(texture),
            last_used_frame: self.global_frame_number,
        });
        if !force_no_aliasing {
            self.device_rma.mark_rebind(id);
        }
        Ok(handle)
    }

    /// Buffer analogue, dispatched to the device/host/ReBAR vector by the
    /// extra flags. ReBAR wins since it carries both device and host bits.
    pub fn create_buffer(
        &mut self,
        description: &BufferDescription,
        name: &str,
        id: ResourceId,
    ) -> Result<BufferHandle> {
        let frame_index = self.current_frame_index;
        let (buffers, rma) = if description
            .extra_flags
            .contains(ExtraBufferFlags::RESIZABLE_BAR)
        {
            (
                &mut self.rebar_buffers[frame_index],
                &mut self.rebar_rma[frame_index],
            )
        } else if description.extra_flags.contains(ExtraBufferFlags::HOST) {
            (
                &mut self.host_buffers[frame_index],
                &mut self.host_rma[frame_index],
            )
        } else {
            (&mut self.device_buffers, &mut self.device_rma)
        };

        let force_no_aliasing = !description.create_flags.graph_bound();
        for (index, entry) in buffers.iter_mut().enumerate() {
            if entry.last_used_frame == self.global_frame_number
                || !entry
                    .resource
                    .inner()
                    .get_description()
                    .reuse_compatible(description)
            {
                continue;
            }
            entry.last_used_frame = self.global_frame_number;
            let resized = entry
                .resource
                .inner_mut()
                .resize(description.capacity, description.element_size)?;
            if resized && !force_no_aliasing {
                rma.mark_rebind(id);
            }
            entry.resource.inner_mut().set_name(name);
            return Ok(BufferHandle {
                index,
                flags: description.extra_flags,
            });
        }

        let buffer = Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            *description,
            Some(name.to_string()),
        )?;
        let handle = BufferHandle {
            index: buffers.len(),
            flags: description.extra_flags,
        };
        buffers.push(PooledBuffer {
            resource: GraphResource::new(buffer),
            last_used_frame: self.global_frame_number,
        });
        if !force_no_aliasing {
            rma.mark_rebind(id);
        }
        Ok(handle)
    }

    pub fn get_texture(&self, handle: TextureHandle) -> &GraphResource<Texture> {
        &self.textures[handle.0].resource
    }

    pub fn get_texture_mut(&mut self, handle: TextureHandle) -> &mut GraphResource<Texture> {
        &mut self.textures[handle.0].resource
    }

    fn buffer_class(&self, handle: BufferHandle) -> &Vec<PooledBuffer> {
        if handle.flags.contains(ExtraBufferFlags::RESIZABLE_BAR) {
            &self.rebar_buffers[self.current_frame_index]
        } else if handle.flags.contains(ExtraBufferFlags::HOST) {
            &self.host_buffers[self.current_frame_index]
        } else {
            &self.device_buffers
        }
    }

    pub fn get_buffer(&self, handle: BufferHandle) -> &GraphResource<Buffer> {
        &self.buffer_class(handle)[handle.index].resource
    }

    pub fn get_buffer_mut(&mut self, handle: BufferHandle) -> &mut GraphResource<Buffer> {
        let frame_index = self.current_frame_index;
        let buffers = if handle.flags.contains(ExtraBufferFlags::RESIZABLE_BAR) {
            &mut self.rebar_buffers[frame_index]
        } else if handle.flags.contains(ExtraBufferFlags::HOST) {
            &mut self.host_buffers[frame_index]
        } else {
            &mut self.device_buffers
        };
        &mut buffers[handle.index].resource
    }

    /// Records the memory info of a created resource with the aliaser that
    /// owns its memory class.
    pub fn fill_resource_info(
        &mut self,
        handle: ResourceHandle,
        id: ResourceId,
        debug_name: &str,
        requirements: vk::MemoryRequirements,
        property_flags: vk::MemoryPropertyFlags,
    ) {
        let frame_index = self.current_frame_index;
        let rma = match handle {
            ResourceHandle::Texture(_) => &mut self.device_rma,
            ResourceHandle::Buffer(buffer) => {
                if buffer.flags.contains(ExtraBufferFlags::RESIZABLE_BAR) {
                    &mut self.rebar_rma[frame_index]
                } else if buffer.flags.contains(ExtraBufferFlags::HOST) {
                    &mut self.host_rma[frame_index]
                } else {
                    &mut self.device_rma
                }
            }
        };
        rma.fill_resource_info(handle, id, debug_name, requirements, property_flags);
    }

    /// Derives each resource's `[first, last]` pass interval in topological
    /// order and hands it to the aliaser holding that resource.
    pub fn calculate_effective_lifetimes(
        &mut self,
        topological_order: &[u32],
        resources_used_by_pass: &HashMap<ResourceId, HashSet<u32>>,
    ) {
        let frame_index = self.current_frame_index;
        for (&id, pass_ids) in resources_used_by_pass {
            let mut begin = u32::MAX;
            let mut end = u32::MIN;
            for pass_id in pass_ids {
                let Some(position) = topological_order.iter().position(|p| p == pass_id) else {
                    continue;
                };
                begin = begin.min(position as u32);
                end = end.max(position as u32);
            }
            if begin > end {
                continue;
            }

            let lifetime = Lifetime::new(begin, end);
            if self.rebar_rma[frame_index].contains(id) {
                self.rebar_rma[frame_index].set_lifetime(id, lifetime);
            } else if self.host_rma[frame_index].contains(id) {
                self.host_rma[frame_index].set_lifetime(id, lifetime);
            } else if self.device_rma.contains(id) {
                self.device_rma.set_lifetime(id, lifetime);
            } else {
                // Aliasing was opted out for this resource
                warn!("resource {id:?} is not present in any aliaser info map");
            }
        }
    }

    /// Runs aliaser finalization for every memory class of the current frame
    pub fn bind_resources_to_memory_regions(&mut self) -> Result<()> {
        let frame_index = self.current_frame_index;
        bind_rma(
            &mut self.device_rma,
            &mut self.textures,
            &mut self.device_buffers,
            &self.device,
            &self.allocator,
        )?;
        bind_rma(
            &mut self.rebar_rma[frame_index],
            &mut [],
            &mut self.rebar_buffers[frame_index],
            &self.device,
            &self.allocator,
        )?;
        bind_rma(
            &mut self.host_rma[frame_index],
            &mut [],
            &mut self.host_buffers[frame_index],
            &self.device,
            &self.allocator,
        )?;
        Ok(())
    }

    pub fn memory_statistics(&self) -> Vec<BucketStatistics> {
        let frame_index = self.current_frame_index;
        [
            &self.device_rma,
            &self.rebar_rma[frame_index],
            &self.host_rma[frame_index],
        ]
        .into_iter()
        .flat_map(|rma| rma.buckets.iter())
        .map(|bucket| BucketStatistics {
            size: bucket.requirements.size,
            members: bucket
                .aliased
                .iter()
                .map(|aliased| {
                    (
                        aliased.info.debug_name.clone(),
                        aliased.offset,
                        aliased.info.requirements.size,
                    )
                })
                .collect(),
        })
        .collect()
    }

    /// Frees every bucket allocation. Call after a device wait-idle.
    pub fn release_buckets(&mut self) -> Result<()> {
        let frame_index_range = 0..FRAMES_IN_FLIGHT;
        let mut release = |rma: &mut ResourceMemoryAliaser| -> Result<()> {
            for bucket in rma.buckets.drain(..) {
                if let Some(allocation) = bucket.allocation {
                    self.allocator.free(allocation)?;
                }
            }
            Ok(())
        };
        release(&mut self.device_rma)?;
        for frame in frame_index_range {
            release(&mut self.host_rma[frame])?;
            release(&mut self.rebar_rma[frame])?;
        }
        Ok(())
    }
}

/// Rebuilds and binds one aliaser's buckets when its defragmentation trigger
/// fires. `textures`/`buffers` are the pool vectors this aliaser's handles
/// index into.
fn bind_rma(
    rma: &mut ResourceMemoryAliaser,
    textures: &mut [PooledTexture],
    buffers: &mut [PooledBuffer],
    device: &crate::device::LogicalDevice,
    allocator: &ArcAllocator,
) -> Result<()> {
    let defragment = rma.needs_defragmentation();
    if !defragment && rma.needs_rebind.is_empty() {
        return Ok(());
    }

    for bucket in rma.buckets.drain(..) {
        if let Some(allocation) = bucket.allocation {
            let allocator = allocator.clone();
            device.defer_deletion(move || {
                allocator.free(allocation).ok();
            })?;
        }
    }

    // Resources whose memory was just freed must recreate their raw handles
    // before rebinding; ones in the rebind set were invalidated by a resize
    // already and their cached requirements are fresh.
    let mut unaliased: Vec<(ResourceId, ResourceInfo)> =
        Vec::with_capacity(rma.resource_info.len());
    for (&id, info) in &rma.resource_info {
        let mut info = info.clone();
        if defragment || !rma.needs_rebind.contains(&id) {
            match info.handle {
                ResourceHandle::Texture(handle) => {
                    let texture = textures[handle.0].resource.inner_mut();
                    texture.invalidate()?;
                    info.requirements = texture.memory_requirements()?;
                }
                ResourceHandle::Buffer(handle) => {
                    let buffer = buffers[handle.index].resource.inner_mut();
                    buffer.invalidate()?;
                    info.requirements = buffer.memory_requirements()?;
                }
            }
        }
        unaliased.push((id, info));
    }
    unaliased.sort_by_key(|&(id, ref info)| (info.requirements.size, id));

    let mut buckets = pack_buckets(unaliased, &rma.lifetimes);
    for bucket in &mut buckets {
        let (requirements, property_flags) = fold_bucket_requirements(bucket)?;
        bucket.requirements = requirements;
        bucket.property_flags = property_flags;

        let allocation = allocator.allocate(
            "render graph memory bucket",
            &requirements,
            location_for_properties(property_flags),
        )?;
        let memory = allocation.memory()?;
        let base_offset = allocation.offset()?;
        for aliased in &bucket.aliased {
            match aliased.info.handle {
                ResourceHandle::Texture(handle) => {
                    let texture = textures[handle.0].resource.inner_mut();
                    texture.bind_memory(memory, base_offset + aliased.offset)?;
                    texture.rg_finalize()?;
                }
                ResourceHandle::Buffer(handle) => {
                    let buffer = buffers[handle.index].resource.inner_mut();
                    buffer.bind_memory(memory, base_offset + aliased.offset)?;
                    buffer.rg_finalize(&allocation, aliased.offset)?;
                }
            }
        }
        bucket.allocation = Some(allocation);
    }
    rma.buckets = buckets;
    rma.needs_rebind.clear();
    Ok(())
}
