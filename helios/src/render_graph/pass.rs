use std::collections::HashMap;

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::render_graph::resource::{ResourceId, ResourceState, SubresourceId};
use crate::render_graph::scheduler::{ExecutionContext, ResourceScheduler};

pub const MAX_COLOR_RENDER_TARGETS: usize = 8;

/// Pass kind. The async variants are accepted for API parity but submit on
/// the single general queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassType {
    Compute,
    Transfer,
    Graphics,
    AsyncCompute,
    DedicatedTransfer,
}

pub type SetupFn<'a> = Box<dyn FnOnce(&mut ResourceScheduler) -> Result<()> + 'a>;
pub type ExecuteFn = Box<dyn FnMut(&ExecutionContext, vk::CommandBuffer) -> Result<()>>;

#[derive(Derivative, Copy, Clone)]
#[derivative(Debug)]
pub struct RenderTargetInfo {
    #[derivative(Debug = "ignore")]
    pub clear_value: Option<vk::ClearColorValue>,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
}

#[derive(Debug, Copy, Clone)]
pub struct DepthStencilInfo {
    pub clear_value: Option<vk::ClearDepthStencilValue>,
    pub depth_load_op: vk::AttachmentLoadOp,
    pub depth_store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
}

/// Pre-execute buffer fill, recorded before the level's barrier batch
#[derive(Debug, Copy, Clone)]
pub struct ClearOnExecute {
    pub id: ResourceId,
    pub data: u32,
    pub size: u64,
    pub offset: u64,
}

/// One recorded node of the frame graph
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Pass {
    pub(crate) id: u32,
    pub(crate) queue_index: u8,
    pub(crate) name: String,
    pub(crate) ty: PassType,
    pub(crate) dependency_level: u32,

    #[derivative(Debug = "ignore")]
    pub(crate) execute_fn: Option<ExecuteFn>,

    /// Accumulated access intent per touched subresource
    pub(crate) states: HashMap<SubresourceId, ResourceState>,
    pub(crate) texture_reads: Vec<SubresourceId>,
    pub(crate) texture_writes: Vec<SubresourceId>,
    pub(crate) buffer_reads: Vec<SubresourceId>,
    pub(crate) buffer_writes: Vec<SubresourceId>,

    pub(crate) render_targets: Vec<RenderTargetInfo>,
    pub(crate) depth_stencil: Option<DepthStencilInfo>,
    pub(crate) viewport: Option<vk::Viewport>,
    pub(crate) scissor: Option<vk::Rect2D>,
    pub(crate) clears_on_execute: Vec<ClearOnExecute>,
}

impl Pass {
    pub(crate) fn new(
        id: u32,
        queue_index: u8,
        name: impl Into<String>,
        ty: PassType,
        execute_fn: ExecuteFn,
    ) -> Self {
        Self {
            id,
            queue_index,
            name: name.into(),
            ty,
            dependency_level: 0,
            execute_fn: Some(execute_fn),
            states: HashMap::new(),
            texture_reads: Vec::new(),
            texture_writes: Vec::new(),
            buffer_reads: Vec::new(),
            buffer_writes: Vec::new(),
            render_targets: Vec::new(),
            depth_stencil: None,
            viewport: None,
            scissor: None,
            clears_on_execute: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pass_type(&self) -> PassType {
        self.ty
    }

    pub fn dependency_level(&self) -> u32 {
        self.dependency_level
    }

    pub fn queue_index(&self) -> u8 {
        self.queue_index
    }

    pub(crate) fn state_of(&self, subresource: &SubresourceId) -> ResourceState {
        self.states.get(subresource).copied().unwrap_or_default()
    }

    /// Whether this pass's attachments warrant a dynamic rendering scope
    pub(crate) fn has_raster_attachments(&self) -> bool {
        self.depth_stencil.is_some() || !self.render_targets.is_empty()
    }
}
