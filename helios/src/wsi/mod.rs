pub mod surface;
pub mod swapchain;

pub use surface::Surface;
pub use swapchain::{Acquire, Swapchain};
