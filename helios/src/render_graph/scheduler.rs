use anyhow::Result;
use ash::vk;

use crate::render_graph::error::RenderGraphError;
use crate::render_graph::graph::RenderGraph;
use crate::render_graph::pass::{
    DepthStencilInfo, Pass, ClearOnExecute, RenderTargetInfo, MAX_COLOR_RENDER_TARGETS,
};
use crate::render_graph::pool::TransientResourcePool;
use crate::render_graph::resource::{MipSet, ResourceId, ResourceState, SubresourceId};
use crate::resource::{Buffer, BufferDescription, Texture, TextureDescription};

/// Per-pass builder handed to setup callbacks; declares the resources a pass
/// creates, reads and writes.
pub struct ResourceScheduler<'a> {
    pub(crate) graph: &'a mut RenderGraph,
    pub(crate) pass: &'a mut Pass,
}

impl ResourceScheduler<'_> {
    /// Declares a fresh graph texture. The declaring pass starts it in the
    /// undefined state.
    pub fn create_texture(&mut self, name: &str, description: TextureDescription) -> Result<()> {
        let id = self.graph.create_resource_id(name)?;
        self.graph
            .texture_creates
            .insert(name.to_string(), description);
        self.pass
            .states
            .insert(SubresourceId::new(name, id, 0), ResourceState::default());
        Ok(())
    }

    /// Declares a fresh graph buffer. The declaring pass starts it in the
    /// undefined state.
    pub fn create_buffer(&mut self, name: &str, description: BufferDescription) -> Result<()> {
        let id = self.graph.create_resource_id(name)?;
        self.graph
            .buffer_creates
            .insert(name.to_string(), description);
        self.pass
            .states
            .insert(SubresourceId::new(name, id, 0), ResourceState::default());
        Ok(())
    }

    /// Declares a read of the selected mips, accumulating `state | READ` per
    /// subresource. Aliases resolve to the underlying resource id.
    pub fn read_texture(
        &mut self,
        name: &str,
        mip_set: MipSet,
        state: ResourceState,
    ) -> Result<ResourceId> {
        let id = self.graph.get_resource_id(name)?;
        let mips = mip_set.resolve(self.graph.texture_mip_count(name)?)?;
        for mip in mips {
            let subresource = SubresourceId::new(name, id, mip);
            self.pass.texture_reads.push(subresource.clone());
            *self.pass.states.entry(subresource).or_default() |= state | ResourceState::READ;
        }
        self.graph.register_pass_use(id, self.pass.id);
        Ok(id)
    }

    /// Declares a write of the selected mips, accumulating
    /// `state | WRITE | READ`. Supplying `new_alias` binds a new name to the
    /// same resource and records the original subresources as reads, making
    /// the pass a read-modify-write boundary.
    pub fn write_texture(
        &mut self,
        name: &str,
        mip_set: MipSet,
        state: ResourceState,
        new_alias: Option<&str>,
    ) -> Result<ResourceId> {
        let id = self.graph.get_resource_id(name)?;
        if let Some(alias) = new_alias {
            if self.graph.alias_map.contains_key(alias) {
                return Err(RenderGraphError::AliasAlreadyExists(alias.to_string()).into());
            }
            self.graph
                .alias_map
                .insert(alias.to_string(), name.to_string());
        }

        let mips = mip_set.resolve(self.graph.texture_mip_count(name)?)?;
        for mip in mips {
            let written_name = new_alias.unwrap_or(name);
            let subresource = SubresourceId::new(written_name, id, mip);
            self.pass.texture_writes.push(subresource.clone());
            *self.pass.states.entry(subresource).or_default() |=
                state | ResourceState::WRITE | ResourceState::READ;

            if new_alias.is_some() {
                self.pass
                    .texture_reads
                    .push(SubresourceId::new(name, id, mip));
            }
        }
        self.graph.register_pass_use(id, self.pass.id);
        Ok(id)
    }

    /// Depth-stencil variant of [`Self::write_texture`]; also records the
    /// pass's depth attachment descriptor.
    #[allow(clippy::too_many_arguments)]
    pub fn write_depth_stencil(
        &mut self,
        name: &str,
        mip_set: MipSet,
        depth_load_op: vk::AttachmentLoadOp,
        depth_store_op: vk::AttachmentStoreOp,
        clear_value: vk::ClearDepthStencilValue,
        stencil_load_op: vk::AttachmentLoadOp,
        stencil_store_op: vk::AttachmentStoreOp,
        new_alias: Option<&str>,
    ) -> Result<ResourceId> {
        let id = self.write_texture(
            name,
            mip_set,
            ResourceState::DEPTH_READ | ResourceState::DEPTH_WRITE,
            new_alias,
        )?;
        self.pass.depth_stencil = Some(DepthStencilInfo {
            clear_value: Some(clear_value),
            depth_load_op,
            depth_store_op,
            stencil_load_op,
            stencil_store_op,
        });
        Ok(id)
    }

    /// Color-attachment variant of [`Self::write_texture`]; appends the
    /// pass's render-target descriptor.
    pub fn write_render_target(
        &mut self,
        name: &str,
        mip_set: MipSet,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        clear_value: vk::ClearColorValue,
        new_alias: Option<&str>,
    ) -> Result<ResourceId> {
        if self.pass.render_targets.len() >= MAX_COLOR_RENDER_TARGETS {
            return Err(RenderGraphError::ColorAttachmentLimit(MAX_COLOR_RENDER_TARGETS).into());
        }
        let id = self.write_texture(name, mip_set, ResourceState::RENDER_TARGET, new_alias)?;
        self.pass.render_targets.push(RenderTargetInfo {
            clear_value: Some(clear_value),
            load_op,
            store_op,
        });
        Ok(id)
    }

    pub fn read_buffer(&mut self, name: &str, state: ResourceState) -> Result<ResourceId> {
        let id = self.graph.get_resource_id(name)?;
        let subresource = SubresourceId::new(name, id, 0);
        self.pass.buffer_reads.push(subresource.clone());
        *self.pass.states.entry(subresource).or_default() |= state | ResourceState::READ;
        self.graph.register_pass_use(id, self.pass.id);
        Ok(id)
    }

    pub fn write_buffer(&mut self, name: &str, state: ResourceState) -> Result<ResourceId> {
        let id = self.graph.get_resource_id(name)?;
        let subresource = SubresourceId::new(name, id, 0);
        self.pass.buffer_writes.push(subresource.clone());
        *self.pass.states.entry(subresource).or_default() |=
            state | ResourceState::WRITE | ResourceState::READ;
        self.graph.register_pass_use(id, self.pass.id);
        Ok(id)
    }

    /// Records a buffer fill that runs before the level's barrier batch.
    /// Only valid inside a pass that also writes the resource.
    pub fn clear_on_execute(&mut self, name: &str, data: u32, size: u64, offset: u64) -> Result<()> {
        debug_assert!(size > 0, "fill size should be > 0");
        let id = self.graph.get_resource_id(name)?;
        let writes_resource = self
            .pass
            .buffer_writes
            .iter()
            .chain(self.pass.texture_writes.iter())
            .any(|subresource| subresource.id == id);
        if !writes_resource {
            return Err(RenderGraphError::ClearWithoutWrite(name.to_string()).into());
        }
        self.pass.clears_on_execute.push(ClearOnExecute {
            id,
            data,
            size,
            offset,
        });
        Ok(())
    }

    /// Required for graphics passes
    pub fn set_viewport_scissors(&mut self, viewport: vk::Viewport, scissor: vk::Rect2D) {
        self.pass.viewport = Some(viewport);
        self.pass.scissor = Some(scissor);
    }

    pub fn texture_mip_count(&self, name: &str) -> Result<u32> {
        self.graph.texture_mip_count(name)
    }
}

/// Execute-phase view handed to pass callbacks together with the command
/// buffer; resolves resource ids to concrete GPU objects.
pub struct ExecutionContext<'a> {
    pub(crate) graph: &'a RenderGraph,
    pub(crate) pool: &'a TransientResourcePool,
}

impl ExecutionContext<'_> {
    pub fn get_texture(&self, id: ResourceId) -> Result<&Texture> {
        let handle = self.graph.texture_handle(id)?;
        Ok(self.pool.get_texture(handle).inner())
    }

    pub fn get_buffer(&self, id: ResourceId) -> Result<&Buffer> {
        let handle = self.graph.buffer_handle(id)?;
        Ok(self.pool.get_buffer(handle).inner())
    }

    pub fn texture_mip_count(&self, name: &str) -> Result<u32> {
        self.graph.texture_mip_count(name)
    }
}
