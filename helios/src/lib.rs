pub mod allocators;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod render_graph;
pub mod resource;
pub mod sync;
pub mod traits;
pub mod util;
pub mod wsi;

pub use error::HeliosError;

// Re-exports
pub use ash;
pub use ash_window;
pub use gpu_allocator;
pub use raw_window_handle;
#[cfg(feature = "winit")]
pub use winit;

/// Number of frames the CPU may run ahead of the GPU. Drives the transient
/// pool eviction window, bindless descriptor buffering and deferred deletion.
pub const FRAMES_IN_FLIGHT: usize = 2;
