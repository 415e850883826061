pub mod logical_device;
pub mod physical_device;
pub mod queue;

pub use logical_device::{LogicalDevice, LogicalDeviceCreateInfo};
pub use physical_device::PhysicalDevice;
pub use queue::Queue;
