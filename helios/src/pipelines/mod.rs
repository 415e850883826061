pub mod pipeline;
pub mod pipeline_cache;
pub mod pipeline_layout;

pub use pipeline::{ComputePipelineOptions, GraphicsPipelineOptions, Pipeline, PipelineVariant};
pub use pipeline_cache::PipelineCache;
pub use pipeline_layout::PipelineLayout;
