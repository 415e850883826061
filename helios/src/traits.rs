use anyhow::Result;
use ash::vk;

/// Manually releases the underlying Vulkan objects of a type.
///
/// With the `raii` feature enabled, [`Drop`] impls call this automatically.
pub trait Destructible {
    fn destroy(&mut self);
}

/// Access to the raw Vulkan handle behind a wrapper
pub trait AsRaw {
    type RawType;

    /// # Safety
    /// Mutating or destroying the raw handle bypasses the wrapper's tracking.
    unsafe fn as_raw(&self) -> &Self::RawType;
}

/// Types that can receive a debug-utils object name
pub trait Nameable {
    const OBJECT_TYPE: vk::ObjectType;

    fn set_name(&mut self, debug_utils: &ash::ext::debug_utils::Device, name: &str) -> Result<()>;
}
