pub mod aliaser;
pub mod barrier;
pub mod error;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod pool;
pub mod resource;
pub mod scheduler;

pub use aliaser::{Lifetime, ResourceMemoryAliaser};
pub use error::RenderGraphError;
pub use graph::{RenderGraph, RenderGraphStatistics};
pub use pass::{PassType, MAX_COLOR_RENDER_TARGETS};
pub use pool::{BufferHandle, ResourceHandle, TextureHandle, TransientResourcePool};
pub use resource::{MipSet, ResourceId, ResourceState, SubresourceId};
pub use scheduler::{ExecutionContext, ResourceScheduler};
